//! Divergence detector: records differences between expected and observed
//! stock and resolves them through approved compensating movements.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use stockledger_core::{ActorId, Clock, DivergenceId, LocationId, MovementId, ProjectId};
use stockledger_inventory::{
    Approval, CountResult, Divergence, DivergenceFilter, DivergenceOrigin, Resolution,
    ResolutionKind,
};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MovementLedger;
use crate::store::KeyValueStore;

pub struct DivergenceDetector {
    ledger: Arc<MovementLedger>,
    divergences: Arc<dyn KeyValueStore<DivergenceId, Divergence>>,
    clock: Arc<dyn Clock>,
    /// Serializes every read-modify-write of divergence records.
    writes: Mutex<()>,
}

impl DivergenceDetector {
    pub fn new(
        ledger: Arc<MovementLedger>,
        divergences: Arc<dyn KeyValueStore<DivergenceId, Divergence>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            divergences,
            clock,
            writes: Mutex::new(()),
        }
    }

    fn serialize(&self) -> LedgerResult<MutexGuard<'_, ()>> {
        self.writes.lock().map_err(|_| LedgerError::poisoned("divergence writes"))
    }

    pub fn get_divergence(&self, id: DivergenceId) -> LedgerResult<Divergence> {
        self.divergences
            .get(&id)?
            .ok_or_else(|| LedgerError::NotFound(format!("divergence {id}")))
    }

    pub fn list_divergences(&self, filter: &DivergenceFilter) -> LedgerResult<Vec<Divergence>> {
        let mut found: Vec<Divergence> = self
            .divergences
            .list()?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        found.sort_by_key(|d| d.created_at);
        Ok(found)
    }

    /// React to a counted line. At most one divergence exists per
    /// `(campaign, part number, location)`: a recount refreshes the open one
    /// instead of creating another.
    pub fn observe_count(
        &self,
        line: &CountResult,
        project_id: Option<ProjectId>,
    ) -> LedgerResult<Option<Divergence>> {
        let _writes = self.serialize()?;

        let origin = DivergenceOrigin::Campaign(line.campaign_id);
        let existing = self.divergences.list()?.into_iter().find(|d| {
            d.origin == origin
                && d.part_number_id == line.part_number_id
                && d.location_id == line.location_id
        });

        match existing {
            Some(d) if d.is_resolved() => Ok(Some(d)),
            Some(d) => {
                let Some(counted) = line.counted_quantity else {
                    return Ok(Some(d));
                };
                let refreshed = d.recounted(counted)?;
                self.divergences.save(&refreshed)?;
                info!(divergence_id = %refreshed.id, actual = counted, "divergence updated by recount");
                Ok(Some(refreshed))
            }
            None => {
                let Some(created) = Divergence::from_count(DivergenceId::new(), line, project_id, self.clock.now())
                else {
                    return Ok(None);
                };
                self.divergences.save(&created)?;
                info!(
                    divergence_id = %created.id,
                    kind = ?created.kind,
                    variance = created.variance(),
                    part_number_id = %created.part_number_id,
                    location_id = %created.location_id,
                    "divergence opened from count"
                );
                Ok(Some(created))
            }
        }
    }

    /// Report a difference found while executing a movement, e.g. a receipt
    /// that arrived short. The location defaults to the movement's destination.
    pub fn report_movement_divergence(
        &self,
        movement_id: MovementId,
        location_id: Option<LocationId>,
        expected: i64,
        actual: i64,
        reported_by: ActorId,
    ) -> LedgerResult<Divergence> {
        let movement = self
            .ledger
            .movements()
            .get(&movement_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("movement {movement_id}")))?;
        let location_id = location_id
            .or(movement.destination_location_id)
            .or(movement.source_location_id)
            .ok_or_else(|| LedgerError::Validation("movement has no location".into()))?;
        if !movement.touches_location(&location_id) {
            return Err(LedgerError::Validation(format!(
                "movement {movement_id} does not touch location {location_id}"
            )));
        }

        let _writes = self.serialize()?;
        let origin = DivergenceOrigin::Movement(movement_id);
        if self
            .divergences
            .list()?
            .iter()
            .any(|d| d.origin == origin && d.location_id == location_id)
        {
            warn!(movement_id = %movement_id, "duplicate divergence report rejected");
            return Err(LedgerError::DuplicateDivergence(format!(
                "movement {movement_id} at location {location_id}"
            )));
        }

        let divergence = Divergence::from_movement(
            DivergenceId::new(),
            movement_id,
            movement.part_number_id,
            location_id,
            movement.project_id,
            expected,
            actual,
            reported_by,
            self.clock.now(),
        )?;
        self.divergences.save(&divergence)?;
        info!(divergence_id = %divergence.id, movement_id = %movement_id, "divergence reported from movement");
        Ok(divergence)
    }

    pub fn start_investigation(&self, id: DivergenceId) -> LedgerResult<Divergence> {
        let _writes = self.serialize()?;
        let next = self.get_divergence(id)?.start_investigation()?;
        self.divergences.save(&next)?;
        Ok(next)
    }

    /// Resolve a divergence. Requires an affirmative approval; `AdjustStock`
    /// books the compensating adjustment before the divergence is closed.
    pub fn resolve_divergence(
        &self,
        id: DivergenceId,
        kind: ResolutionKind,
        resolved_by: ActorId,
        approval: Option<Approval>,
        serials: Vec<String>,
    ) -> LedgerResult<Divergence> {
        let approval = approval.ok_or_else(|| LedgerError::ApprovalRequired(format!("divergence {id}")))?;
        if !approval.approved {
            return Err(LedgerError::ApprovalRejected(approval.approver_id));
        }

        let _writes = self.serialize()?;
        let current = self.get_divergence(id)?;
        if current.is_resolved() {
            return Err(LedgerError::Validation(format!("divergence {id} is already resolved")));
        }

        let adjustment = match kind {
            ResolutionKind::AdjustStock => match current.compensating_adjustment(resolved_by, serials) {
                Some(request) => {
                    self.ensure_single_row(&current)?;
                    Some(self.ledger.record_movement(request)?.id)
                }
                None => None,
            },
            ResolutionKind::CountError => None,
        };

        let resolved = current.resolved(Resolution {
            kind,
            resolved_by,
            approved_by: approval.approver_id,
            resolved_at: self.clock.now(),
            adjustment_movement_id: adjustment,
            note: approval.note,
        })?;
        self.divergences.save(&resolved)?;

        info!(
            divergence_id = %id,
            resolution = ?kind,
            adjustment_movement_id = ?adjustment,
            "divergence resolved"
        );
        Ok(resolved)
    }

    /// An unscoped divergence may only be adjusted when all of its stock sits
    /// in the unscoped balance row; otherwise the adjustment would land on a
    /// row the count never measured on its own.
    fn ensure_single_row(&self, divergence: &Divergence) -> LedgerResult<()> {
        if divergence.project_id.is_some() {
            return Ok(());
        }
        let scoped = self.ledger.balances().select(|b| {
            b.key.part_number_id == divergence.part_number_id
                && b.key.location_id == divergence.location_id
                && b.key.project_id.is_some()
                && b.quantity_total != 0
        })?;
        if scoped.is_empty() {
            return Ok(());
        }
        warn!(
            divergence_id = %divergence.id,
            project_rows = scoped.len(),
            "adjustment refused for divergence spanning project balances"
        );
        Err(LedgerError::Validation(format!(
            "divergence {} covers stock held under {} project(s); recount with a project scope before adjusting",
            divergence.id,
            scoped.len()
        )))
    }
}
