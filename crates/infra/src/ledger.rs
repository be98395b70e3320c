//! The movement ledger unit of work.
//!
//! `record_movement` is the only way stock changes. Under the per-key locks of
//! every balance row and serial it touches, it:
//!
//! 1. validates the request against the catalog,
//! 2. checks source availability,
//! 3. stages the new balance rows and asset transitions,
//! 4. appends the movement (the ledger assigns its sequence),
//! 5. commits the staged balances and assets.
//!
//! Any failure before step 4 leaves no trace. Steps 4 and 5 cannot disagree
//! because the locks keep every staged row current until the commit.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use stockledger_core::{Clock, DomainError, ExpectedVersion, MovementId};
use stockledger_inventory::{
    apply_deltas, deltas_for_request, Asset, Balance, BalanceKey, Movement, MovementRequest,
    MovementType,
};

use crate::catalog::CatalogRegistry;
use crate::error::{LedgerError, LedgerResult};
use crate::locks::{KeyGuard, KeyLocks, LockKey};
use crate::store::{AssetStore, BalanceStore, LedgerAppend, MovementStore};

pub struct MovementLedger {
    pub(crate) movements: Arc<dyn MovementStore>,
    pub(crate) catalog: Arc<CatalogRegistry>,
    pub(crate) balances: BalanceStore,
    pub(crate) assets: AssetStore,
    locks: KeyLocks<LockKey>,
    /// Writers share it; projection rebuilds take it exclusively.
    pub(crate) rebuild_gate: RwLock<()>,
    pub(crate) clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl MovementLedger {
    pub fn new(
        movements: Arc<dyn MovementStore>,
        catalog: Arc<CatalogRegistry>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            movements,
            catalog,
            balances: BalanceStore::new(),
            assets: AssetStore::new(),
            locks: KeyLocks::new(),
            rebuild_gate: RwLock::new(()),
            clock,
            lock_timeout,
        }
    }

    pub fn balances(&self) -> &BalanceStore {
        &self.balances
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn movements(&self) -> &dyn MovementStore {
        self.movements.as_ref()
    }

    /// Parse a movement type coming from outside. Unknown types are an
    /// integration error and are logged loudly.
    pub fn parse_movement_type(raw: &str) -> LedgerResult<MovementType> {
        raw.parse::<MovementType>().map_err(|e| {
            error!(movement_type = %raw, "rejected unknown movement type");
            LedgerError::from(e)
        })
    }

    /// Every key a request needs exclusive access to.
    pub fn lock_keys(request: &MovementRequest) -> LedgerResult<Vec<LockKey>> {
        let mut keys: Vec<LockKey> = deltas_for_request(request)?
            .into_iter()
            .map(|d| LockKey::Balance(d.key))
            .collect();
        keys.extend(
            request
                .normalized_serials()
                .into_iter()
                .map(LockKey::Serial),
        );
        Ok(keys)
    }

    pub fn lock(&self, keys: Vec<LockKey>) -> LedgerResult<KeyGuard<'_, LockKey>> {
        self.locks.acquire(keys, self.lock_timeout)
    }

    /// Record one movement as an atomic unit of work.
    pub fn record_movement(&self, request: MovementRequest) -> LedgerResult<Movement> {
        let guard = self.lock(Self::lock_keys(&request)?)?;
        self.record_locked(&guard, request)
    }

    /// Record a movement while the caller already holds its keys, so the
    /// caller can check and update its own state inside the same critical
    /// section.
    #[instrument(
        skip(self, guard, request),
        fields(movement_type = %request.movement_type, quantity = request.quantity),
        err(level = "debug")
    )]
    pub fn record_locked(
        &self,
        guard: &KeyGuard<'_, LockKey>,
        request: MovementRequest,
    ) -> LedgerResult<Movement> {
        let _gate = self.shared_gate()?;

        for key in Self::lock_keys(&request)? {
            if !guard.covers(&key) {
                return Err(LedgerError::Store(format!("unit of work does not hold {key:?}")));
            }
        }

        self.validate(&request)?;
        self.check_availability(&request)?;

        let now = self.clock.now();
        let staged_balances = self.stage_balances(&request, now)?;

        let id = MovementId::new();
        let staged_assets = self.stage_assets(id, &request, now)?;

        let rows: Vec<Balance> = staged_balances.iter().map(|(_, b)| b.clone()).collect();
        let movement = self.movements.append(LedgerAppend {
            id,
            request: &request,
            occurred_at: now,
            balances: &rows,
        })?;

        self.balances.commit(&staged_balances)?;
        self.assets.commit(staged_assets)?;

        info!(
            movement_id = %movement.id,
            sequence = movement.sequence,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            part_number_id = %movement.part_number_id,
            "movement recorded"
        );
        Ok(movement)
    }

    /// Movements cannot be edited. Always fails.
    pub fn update_movement(&self, id: MovementId) -> LedgerResult<Movement> {
        error!(movement_id = %id, "attempted to update an immutable movement");
        Err(LedgerError::ImmutableMovementViolation(id))
    }

    /// Movements cannot be removed. Always fails.
    pub fn delete_movement(&self, id: MovementId) -> LedgerResult<()> {
        error!(movement_id = %id, "attempted to delete an immutable movement");
        Err(LedgerError::ImmutableMovementViolation(id))
    }

    pub(crate) fn shared_gate(&self) -> LedgerResult<RwLockReadGuard<'_, ()>> {
        self.rebuild_gate.read().map_err(|_| LedgerError::poisoned("rebuild gate"))
    }

    fn validate(&self, request: &MovementRequest) -> LedgerResult<()> {
        request.validate_shape()?;

        let part = self.catalog.part_number(&request.part_number_id)?;
        if !part.active && request.movement_type.is_inbound() {
            return Err(LedgerError::Validation(format!(
                "part number {} is inactive and cannot receive {}",
                part.code, request.movement_type
            )));
        }
        request.validate_serials(&part)?;

        for location in [request.source_location_id, request.destination_location_id]
            .into_iter()
            .flatten()
        {
            self.catalog.location(&location)?;
        }
        if let Some(project) = request.project_id {
            self.catalog.project(&project)?;
        }
        Ok(())
    }

    fn check_availability(&self, request: &MovementRequest) -> LedgerResult<()> {
        if !request.movement_type.requires_availability() {
            return Ok(());
        }
        let Some(source) = request.source_location_id else {
            return Ok(());
        };
        let key = BalanceKey::new(request.part_number_id, source, request.project_id);
        let snapshot = self.balances.snapshot(&key)?;
        if snapshot.available < request.quantity {
            debug!(
                balance = %key,
                requested = request.quantity,
                available = snapshot.available,
                "insufficient stock"
            );
            return Err(LedgerError::InsufficientStock {
                key,
                requested: request.quantity,
                snapshot,
            });
        }
        Ok(())
    }

    fn stage_balances(
        &self,
        request: &MovementRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> LedgerResult<Vec<(ExpectedVersion, Balance)>> {
        let deltas = deltas_for_request(request)?;

        let mut current: HashMap<BalanceKey, Balance> = HashMap::new();
        for delta in &deltas {
            if let Some(row) = self.balances.get(&delta.key)? {
                current.insert(delta.key, row);
            }
        }

        let staged = apply_deltas(&deltas, now, |k| current.get(k).cloned()).map_err(|e| match e {
            DomainError::InvariantViolation(_) => {
                let key = deltas[0].key;
                LedgerError::InsufficientStock {
                    key,
                    requested: request.quantity,
                    snapshot: current.get(&key).map(|b| b.snapshot()).unwrap_or_default(),
                }
            }
            other => other.into(),
        })?;

        Ok(staged
            .into_iter()
            .map(|row| {
                let base = current.get(&row.key).map_or(0, |b| b.version);
                (ExpectedVersion::Exact(base), row)
            })
            .collect())
    }

    fn stage_assets(
        &self,
        id: MovementId,
        request: &MovementRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> LedgerResult<Vec<Asset>> {
        if request.serials.is_empty() {
            return Ok(Vec::new());
        }

        // Asset transitions only read id, type, locations and time, none of
        // which depend on the sequence the ledger will assign.
        let provisional = Movement::recorded(id, 0, request, now);
        let dest_kind = provisional
            .destination_location_id
            .and_then(|d| self.catalog.location_kind(&d));

        let mut staged = Vec::with_capacity(provisional.serials.len());
        for serial in &provisional.serials {
            let current = self.assets.get(serial)?;
            let next = Asset::apply_movement(current.as_ref(), serial, &provisional, dest_kind).map_err(
                |e| match e {
                    DomainError::Conflict(msg) => LedgerError::SerialConflict(msg),
                    other => other.into(),
                },
            )?;
            staged.push(next);
        }
        Ok(staged)
    }
}
