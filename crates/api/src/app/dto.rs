use serde::Deserialize;

use stockledger_core::{ActorId, LocationId, PartNumberId, ProjectId};
use stockledger_infra::{LedgerResult, MovementLedger};
use stockledger_inventory::{
    Approval, CampaignScope, MovementFilter, MovementRequest, ResolutionKind,
};

// -------------------------
// Request DTOs
// -------------------------

/// Movement as posted on the wire. The type stays a raw string so unknown
/// codes surface as `unknown_movement_type` instead of a body rejection.
#[derive(Debug, Deserialize)]
pub struct RecordMovementRequest {
    pub movement_type: String,
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

impl RecordMovementRequest {
    pub fn into_request(self) -> LedgerResult<MovementRequest> {
        let movement_type = MovementLedger::parse_movement_type(&self.movement_type)?;
        Ok(MovementRequest {
            movement_type,
            part_number_id: self.part_number_id,
            quantity: self.quantity,
            source_location_id: self.source_location_id,
            destination_location_id: self.destination_location_id,
            project_id: self.project_id,
            serials: self.serials,
            actor_id: self.actor_id,
            reason: self.reason,
            evidence_ref: self.evidence_ref,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: ActorId,
}

#[derive(Debug, Deserialize)]
pub struct StockLevelsRequest {
    pub min_stock: i64,
    #[serde(default)]
    pub max_stock: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetParentRequest {
    pub parent_id: Option<LocationId>,
}

#[derive(Debug, Deserialize)]
pub struct StartCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub scope: CampaignScope,
    pub started_by: ActorId,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCountRequest {
    pub part_number_id: PartNumberId,
    pub location_id: LocationId,
    pub counted_quantity: i64,
    pub counted_by: ActorId,
}

#[derive(Debug, Deserialize)]
pub struct ReportDivergenceRequest {
    #[serde(default)]
    pub location_id: Option<LocationId>,
    pub expected_quantity: i64,
    pub actual_quantity: i64,
    pub reported_by: ActorId,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDivergenceRequest {
    pub kind: ResolutionKind,
    pub resolved_by: ActorId,
    #[serde(default)]
    pub approval: Option<Approval>,
    #[serde(default)]
    pub serials: Vec<String>,
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct MovementParams {
    #[serde(default)]
    pub part_number_id: Option<PartNumberId>,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub movement_type: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl MovementParams {
    pub fn into_filter(self) -> LedgerResult<MovementFilter> {
        let movement_type = self
            .movement_type
            .as_deref()
            .map(MovementLedger::parse_movement_type)
            .transpose()?;
        Ok(MovementFilter {
            part_number_id: self.part_number_id,
            location_id: self.location_id,
            project_id: self.project_id,
            movement_type,
            serial: self.serial,
        })
    }
}
