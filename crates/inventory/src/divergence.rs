//! Discrepancies between expected and physically observed quantities.
//!
//! Divergences are only ever resolved through an explicit, approved action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, CampaignId, DivergenceId, DomainError, DomainResult, Entity, LocationId, MovementId,
    PartNumberId, ProjectId,
};

use crate::count::CountResult;
use crate::movement::{MovementRequest, MovementType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceKind {
    /// Fewer units than expected.
    Shortage,
    /// More units than expected.
    Surplus,
}

impl DivergenceKind {
    pub fn of_variance(variance: i64) -> Option<Self> {
        match variance.signum() {
            -1 => Some(DivergenceKind::Shortage),
            1 => Some(DivergenceKind::Surplus),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceStatus {
    Open,
    Investigating,
    Resolved,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum DivergenceOrigin {
    Campaign(CampaignId),
    Movement(MovementId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionKind {
    /// Book a compensating adjustment for the variance.
    AdjustStock,
    /// The count was wrong; stock stays as recorded.
    CountError,
}

/// External approval decision fed into gated operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approved: bool,
    pub approver_id: ActorId,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: ResolutionKind,
    pub resolved_by: ActorId,
    pub approved_by: ActorId,
    pub resolved_at: DateTime<Utc>,
    pub adjustment_movement_id: Option<MovementId>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub id: DivergenceId,
    pub kind: DivergenceKind,
    pub part_number_id: PartNumberId,
    pub location_id: LocationId,
    pub project_id: Option<ProjectId>,
    pub expected_quantity: i64,
    pub actual_quantity: i64,
    pub status: DivergenceStatus,
    pub origin: DivergenceOrigin,
    pub reported_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub resolution: Option<Resolution>,
}

impl Entity for Divergence {
    type Id = DivergenceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Divergence {
    /// `None` when the counted line has no variance.
    pub fn from_count(
        id: DivergenceId,
        line: &CountResult,
        project_id: Option<ProjectId>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let kind = DivergenceKind::of_variance(line.variance()?)?;
        Some(Self {
            id,
            kind,
            part_number_id: line.part_number_id,
            location_id: line.location_id,
            project_id,
            expected_quantity: line.expected_quantity?,
            actual_quantity: line.counted_quantity?,
            status: DivergenceStatus::Open,
            origin: DivergenceOrigin::Campaign(line.campaign_id),
            reported_by: line.counted_by?,
            created_at: now,
            resolution: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_movement(
        id: DivergenceId,
        movement_id: MovementId,
        part_number_id: PartNumberId,
        location_id: LocationId,
        project_id: Option<ProjectId>,
        expected: i64,
        actual: i64,
        reported_by: ActorId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if expected < 0 || actual < 0 {
            return Err(DomainError::validation("quantities cannot be negative"));
        }
        let kind = DivergenceKind::of_variance(actual - expected)
            .ok_or_else(|| DomainError::validation("expected and actual quantities are equal"))?;
        Ok(Self {
            id,
            kind,
            part_number_id,
            location_id,
            project_id,
            expected_quantity: expected,
            actual_quantity: actual,
            status: DivergenceStatus::Open,
            origin: DivergenceOrigin::Movement(movement_id),
            reported_by,
            created_at: now,
            resolution: None,
        })
    }

    pub fn variance(&self) -> i64 {
        self.actual_quantity - self.expected_quantity
    }

    pub fn is_resolved(&self) -> bool {
        self.status == DivergenceStatus::Resolved
    }

    /// A recount of the same line refreshes the observed quantity in place.
    /// A recount that matches expected leaves the kind untouched; resolution
    /// then goes through `CountError`.
    pub fn recounted(&self, actual: i64) -> DomainResult<Self> {
        self.ensure_unresolved()?;
        let kind = DivergenceKind::of_variance(actual - self.expected_quantity).unwrap_or(self.kind);
        Ok(Self {
            kind,
            actual_quantity: actual,
            ..self.clone()
        })
    }

    pub fn start_investigation(&self) -> DomainResult<Self> {
        match self.status {
            DivergenceStatus::Open => Ok(Self {
                status: DivergenceStatus::Investigating,
                ..self.clone()
            }),
            other => Err(DomainError::conflict(format!(
                "divergence {} cannot start investigation from {:?}",
                self.id, other
            ))),
        }
    }

    /// The adjustment an `AdjustStock` resolution books. `None` when the
    /// variance has been corrected to zero by a recount.
    pub fn compensating_adjustment(
        &self,
        actor: ActorId,
        serials: Vec<String>,
    ) -> Option<MovementRequest> {
        let variance = self.variance();
        let mut req = match variance.signum() {
            -1 => MovementRequest::new(
                MovementType::AjusteNegativo,
                self.part_number_id,
                -variance,
                actor,
            )
            .from_location(self.location_id),
            1 => MovementRequest::new(
                MovementType::AjustePositivo,
                self.part_number_id,
                variance,
                actor,
            )
            .to_location(self.location_id),
            _ => return None,
        };
        req.project_id = self.project_id;
        req.serials = serials;
        req.reason = Some(format!("divergence {} resolution", self.id));
        req.evidence_ref = Some(self.id.to_string());
        Some(req)
    }

    pub fn resolved(&self, resolution: Resolution) -> DomainResult<Self> {
        self.ensure_unresolved()?;
        Ok(Self {
            status: DivergenceStatus::Resolved,
            resolution: Some(resolution),
            ..self.clone()
        })
    }

    fn ensure_unresolved(&self) -> DomainResult<()> {
        if self.is_resolved() {
            return Err(DomainError::conflict(format!(
                "divergence {} is already resolved",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceFilter {
    pub status: Option<DivergenceStatus>,
    pub part_number_id: Option<PartNumberId>,
    pub location_id: Option<LocationId>,
    pub campaign_id: Option<CampaignId>,
}

impl DivergenceFilter {
    pub fn matches(&self, d: &Divergence) -> bool {
        self.status.is_none_or(|s| s == d.status)
            && self.part_number_id.is_none_or(|p| p == d.part_number_id)
            && self.location_id.is_none_or(|l| l == d.location_id)
            && self
                .campaign_id
                .is_none_or(|c| d.origin == DivergenceOrigin::Campaign(c))
    }
}
