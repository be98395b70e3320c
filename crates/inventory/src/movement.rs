//! Movement ledger entries: the system of record for every stock event.
//!
//! A `Movement` is immutable once recorded. Corrections are new compensating
//! movements, never edits.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{
    ActorId, DomainError, DomainResult, Entity, LocationId, MovementId, PartNumberId, ProjectId,
};

use crate::catalog::PartNumber;

/// Closed set of movement types.
///
/// Every consumer matches exhaustively; adding a variant is a compile-time change
/// everywhere a movement is interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    #[serde(rename = "ENTRADA")]
    Entrada,
    #[serde(rename = "SAIDA")]
    Saida,
    #[serde(rename = "TRANSFERENCIA")]
    Transferencia,
    #[serde(rename = "RESERVA")]
    Reserva,
    #[serde(rename = "LIBERACAO")]
    Liberacao,
    #[serde(rename = "AJUSTE_POSITIVO")]
    AjustePositivo,
    #[serde(rename = "AJUSTE_NEGATIVO")]
    AjusteNegativo,
    #[serde(rename = "EXPEDIÇÃO", alias = "EXPEDICAO")]
    Expedicao,
    #[serde(rename = "REVERSA")]
    Reversa,
}

/// A movement type string outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown movement type: {0}")]
pub struct UnknownMovementType(pub String);

impl MovementType {
    pub const ALL: [MovementType; 9] = [
        MovementType::Entrada,
        MovementType::Saida,
        MovementType::Transferencia,
        MovementType::Reserva,
        MovementType::Liberacao,
        MovementType::AjustePositivo,
        MovementType::AjusteNegativo,
        MovementType::Expedicao,
        MovementType::Reversa,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Entrada => "ENTRADA",
            MovementType::Saida => "SAIDA",
            MovementType::Transferencia => "TRANSFERENCIA",
            MovementType::Reserva => "RESERVA",
            MovementType::Liberacao => "LIBERACAO",
            MovementType::AjustePositivo => "AJUSTE_POSITIVO",
            MovementType::AjusteNegativo => "AJUSTE_NEGATIVO",
            MovementType::Expedicao => "EXPEDIÇÃO",
            MovementType::Reversa => "REVERSA",
        }
    }

    /// Types that add to `quantity_total` at the destination.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            MovementType::Entrada | MovementType::AjustePositivo | MovementType::Reversa
        )
    }

    /// Types that remove stock from the source and must be covered by
    /// `quantity_available` there.
    pub fn is_outbound(self) -> bool {
        matches!(
            self,
            MovementType::Saida
                | MovementType::Transferencia
                | MovementType::Expedicao
                | MovementType::AjusteNegativo
        )
    }

    /// Types whose source availability is checked before append.
    pub fn requires_availability(self) -> bool {
        self.is_outbound() || self == MovementType::Reserva
    }

    /// Types that only touch `quantity_reserved`.
    pub fn is_reservation(self) -> bool {
        matches!(self, MovementType::Reserva | MovementType::Liberacao)
    }

    pub fn requires_source(self) -> bool {
        match self {
            MovementType::Entrada | MovementType::AjustePositivo | MovementType::Reversa => false,
            MovementType::Saida
            | MovementType::Transferencia
            | MovementType::Reserva
            | MovementType::Liberacao
            | MovementType::AjusteNegativo
            | MovementType::Expedicao => true,
        }
    }

    pub fn requires_destination(self) -> bool {
        matches!(
            self,
            MovementType::Entrada
                | MovementType::AjustePositivo
                | MovementType::Reversa
                | MovementType::Transferencia
        )
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = UnknownMovementType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        let found = match normalized.as_str() {
            "ENTRADA" => MovementType::Entrada,
            "SAIDA" | "SAÍDA" => MovementType::Saida,
            "TRANSFERENCIA" | "TRANSFERÊNCIA" => MovementType::Transferencia,
            "RESERVA" => MovementType::Reserva,
            "LIBERACAO" | "LIBERAÇÃO" => MovementType::Liberacao,
            "AJUSTE_POSITIVO" => MovementType::AjustePositivo,
            "AJUSTE_NEGATIVO" => MovementType::AjusteNegativo,
            "EXPEDIÇÃO" | "EXPEDICAO" => MovementType::Expedicao,
            "REVERSA" => MovementType::Reversa,
            _ => return Err(UnknownMovementType(s.to_string())),
        };
        Ok(found)
    }
}

/// A request to record a movement, as submitted by an external collaborator.
///
/// Evidence has already been validated upstream; only structural completeness
/// is checked here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub part_number_id: PartNumberId,
    pub quantity: i64,
    #[serde(default)]
    pub source_location_id: Option<LocationId>,
    #[serde(default)]
    pub destination_location_id: Option<LocationId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub serials: Vec<String>,
    pub actor_id: ActorId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub evidence_ref: Option<String>,
}

impl MovementRequest {
    pub fn new(
        movement_type: MovementType,
        part_number_id: PartNumberId,
        quantity: i64,
        actor_id: ActorId,
    ) -> Self {
        Self {
            movement_type,
            part_number_id,
            quantity,
            source_location_id: None,
            destination_location_id: None,
            project_id: None,
            serials: Vec::new(),
            actor_id,
            reason: None,
            evidence_ref: None,
        }
    }

    pub fn from_location(mut self, location: LocationId) -> Self {
        self.source_location_id = Some(location);
        self
    }

    pub fn to_location(mut self, location: LocationId) -> Self {
        self.destination_location_id = Some(location);
        self
    }

    pub fn for_project(mut self, project: ProjectId) -> Self {
        self.project_id = Some(project);
        self
    }

    pub fn with_serials<S: Into<String>>(mut self, serials: impl IntoIterator<Item = S>) -> Self {
        self.serials = serials.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Structural checks that need no catalog or balance lookups.
    pub fn validate_shape(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }

        let ty = self.movement_type;
        if ty.requires_source() && self.source_location_id.is_none() {
            return Err(DomainError::validation(format!("{ty} requires a source location")));
        }
        if ty.requires_destination() && self.destination_location_id.is_none() {
            return Err(DomainError::validation(format!(
                "{ty} requires a destination location"
            )));
        }
        if ty == MovementType::Transferencia
            && self.source_location_id == self.destination_location_id
        {
            return Err(DomainError::validation(
                "TRANSFERENCIA source and destination must differ",
            ));
        }

        let mut seen = HashSet::with_capacity(self.serials.len());
        for serial in &self.serials {
            if serial.trim().is_empty() {
                return Err(DomainError::validation("serials cannot be blank"));
            }
            if !seen.insert(serial.trim()) {
                return Err(DomainError::validation(format!("duplicate serial '{serial}'")));
            }
        }
        Ok(())
    }

    /// Serial rules against the part number's tracking mode.
    pub fn validate_serials(&self, part: &PartNumber) -> DomainResult<()> {
        if !part.serialized {
            if !self.serials.is_empty() {
                return Err(DomainError::validation(format!(
                    "part number {} is not serialized; serials are not accepted",
                    part.code
                )));
            }
            return Ok(());
        }

        let optional = self.movement_type.is_reservation();
        if optional && self.serials.is_empty() {
            return Ok(());
        }
        if self.serials.len() as i64 != self.quantity {
            return Err(DomainError::validation(format!(
                "serialized part number {} needs exactly {} serials, got {}",
                part.code,
                self.quantity,
                self.serials.len()
            )));
        }
        Ok(())
    }

    /// Serials as stored: trimmed.
    pub fn normalized_serials(&self) -> Vec<String> {
        self.serials.iter().map(|s| s.trim().to_string()).collect()
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Position in the ledger (1-based, gap-free, assigned at append).
    pub sequence: u64,
    pub movement_type: MovementType,
    pub part_number_id: PartNumberId,
    pub quantity: i64,
    pub source_location_id: Option<LocationId>,
    pub destination_location_id: Option<LocationId>,
    pub project_id: Option<ProjectId>,
    pub serials: Vec<String>,
    pub actor_id: ActorId,
    pub reason: Option<String>,
    pub evidence_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Movement {
    pub fn recorded(
        id: MovementId,
        sequence: u64,
        request: &MovementRequest,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            movement_type: request.movement_type,
            part_number_id: request.part_number_id,
            quantity: request.quantity,
            source_location_id: request.source_location_id,
            destination_location_id: request.destination_location_id,
            project_id: request.project_id,
            serials: request.normalized_serials(),
            actor_id: request.actor_id,
            reason: request.reason.clone(),
            evidence_ref: request.evidence_ref.clone(),
            occurred_at,
        }
    }

    pub fn references_serial(&self, serial: &str) -> bool {
        self.serials.iter().any(|s| s == serial)
    }

    pub fn touches_location(&self, location: &LocationId) -> bool {
        self.source_location_id.as_ref() == Some(location)
            || self.destination_location_id.as_ref() == Some(location)
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Ledger query filter. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub part_number_id: Option<PartNumberId>,
    pub location_id: Option<LocationId>,
    pub project_id: Option<ProjectId>,
    pub movement_type: Option<MovementType>,
    pub serial: Option<String>,
}

impl MovementFilter {
    pub fn matches(&self, m: &Movement) -> bool {
        self.part_number_id.is_none_or(|p| p == m.part_number_id)
            && self.location_id.is_none_or(|l| m.touches_location(&l))
            && self.project_id.is_none_or(|p| m.project_id == Some(p))
            && self.movement_type.is_none_or(|t| t == m.movement_type)
            && self.serial.as_deref().is_none_or(|s| m.references_serial(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(serialized: bool) -> PartNumber {
        PartNumber {
            id: PartNumberId::new(),
            code: "SW-9200".to_string(),
            description: String::new(),
            serialized,
            min_stock: 0,
            max_stock: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_accented_and_plain_spellings() {
        assert_eq!("EXPEDIÇÃO".parse::<MovementType>().unwrap(), MovementType::Expedicao);
        assert_eq!("expedicao".parse::<MovementType>().unwrap(), MovementType::Expedicao);
        assert_eq!("Transferência".parse::<MovementType>().unwrap(), MovementType::Transferencia);
        assert_eq!(
            "TELEPORTE".parse::<MovementType>().unwrap_err(),
            UnknownMovementType("TELEPORTE".to_string())
        );
    }

    #[test]
    fn every_type_round_trips_through_its_code() {
        for ty in MovementType::ALL {
            assert_eq!(ty.as_str().parse::<MovementType>().unwrap(), ty);
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(serde_json::from_str::<MovementType>(&json).unwrap(), ty);
        }
    }

    #[test]
    fn shape_requires_positive_quantity_and_locations() {
        let pn = PartNumberId::new();
        let actor = ActorId::new();

        let zero = MovementRequest::new(MovementType::Entrada, pn, 0, actor).to_location(LocationId::new());
        assert!(zero.validate_shape().is_err());

        let no_dest = MovementRequest::new(MovementType::Entrada, pn, 1, actor);
        assert!(no_dest.validate_shape().is_err());

        let loc = LocationId::new();
        let same = MovementRequest::new(MovementType::Transferencia, pn, 1, actor)
            .from_location(loc)
            .to_location(loc);
        assert!(same.validate_shape().is_err());

        let dup = MovementRequest::new(MovementType::Entrada, pn, 2, actor)
            .to_location(loc)
            .with_serials(["SN1", " SN1 "]);
        assert!(dup.validate_shape().is_err());
    }

    #[test]
    fn serial_count_must_match_quantity_for_serialized_parts() {
        let pn = part(true);
        let req = MovementRequest::new(MovementType::Entrada, pn.id, 2, ActorId::new())
            .to_location(LocationId::new())
            .with_serials(["SN1"]);
        assert!(req.validate_serials(&pn).is_err());

        let reserve = MovementRequest::new(MovementType::Reserva, pn.id, 2, ActorId::new())
            .from_location(LocationId::new());
        assert!(reserve.validate_serials(&pn).is_ok());

        let bulk = part(false);
        let with_serials = MovementRequest::new(MovementType::Entrada, bulk.id, 1, ActorId::new())
            .to_location(LocationId::new())
            .with_serials(["SN1"]);
        assert!(with_serials.validate_serials(&bulk).is_err());
    }
}
