//! `InventoryEngine` wires the components over one set of stores and exposes
//! every operation collaborators call.

use std::sync::Arc;

use tracing::info;

use stockledger_core::{
    ActorId, CampaignId, Clock, DivergenceId, LocationId, MovementId, PartNumberId, ReservationId,
    SystemClock,
};
use stockledger_inventory::{
    Approval, CampaignScope, CountResult, Divergence, DivergenceFilter, InventoryCampaign,
    Movement, MovementFilter, MovementRequest, NewReservation, Reservation, ReservationFilter,
    ResolutionKind,
};

use crate::catalog::CatalogRegistry;
use crate::config::EngineConfig;
use crate::counts::{CountManager, CountSubmission};
use crate::divergences::DivergenceDetector;
use crate::error::LedgerResult;
use crate::ledger::MovementLedger;
use crate::queries::{BalanceQuery, BalanceReport, InventoryQueries, LowStockEntry, SerialWhereabouts};
use crate::replay::{ProjectionDrift, ReplayReport};
use crate::reservations::ReservationManager;
use crate::retry::retry_on_conflict;
use crate::store::Stores;
use crate::workers::{ExpirySweeper, SweeperHandle};

pub struct InventoryEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    catalog: Arc<CatalogRegistry>,
    ledger: Arc<MovementLedger>,
    reservations: Arc<ReservationManager>,
    divergences: Arc<DivergenceDetector>,
    counts: CountManager,
    queries: InventoryQueries,
}

impl InventoryEngine {
    /// Build the engine and rebuild balances and assets from the ledger.
    pub fn open(config: EngineConfig, stores: Stores, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let catalog = Arc::new(CatalogRegistry::load(stores.clone(), clock.clone())?);
        let ledger = Arc::new(MovementLedger::new(
            stores.movements.clone(),
            catalog.clone(),
            clock.clone(),
            config.lock_timeout,
        ));
        let reservations = Arc::new(ReservationManager::open(
            ledger.clone(),
            stores.reservations.clone(),
            clock.clone(),
            config.default_reservation_ttl,
        )?);
        let divergences = Arc::new(DivergenceDetector::new(
            ledger.clone(),
            stores.divergences.clone(),
            clock.clone(),
        ));
        let counts = CountManager::new(
            ledger.clone(),
            catalog.clone(),
            divergences.clone(),
            &stores,
            clock.clone(),
        );
        let queries = InventoryQueries::new(ledger.clone(), catalog.clone());

        let report = ledger.rebuild_projections()?;
        info!(
            movements = report.movements_replayed,
            balance_rows = report.balance_rows,
            "inventory engine ready"
        );

        Ok(Self {
            config,
            clock,
            catalog,
            ledger,
            reservations,
            divergences,
            counts,
            queries,
        })
    }

    /// In-memory engine on the system clock (dev/tests).
    pub fn in_memory(config: EngineConfig) -> LedgerResult<Self> {
        Self::open(config, Stores::in_memory(), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogRegistry {
        &self.catalog
    }

    pub fn ledger(&self) -> &MovementLedger {
        &self.ledger
    }

    pub fn queries(&self) -> &InventoryQueries {
        &self.queries
    }

    /// Start the background expiry sweeper on the configured interval.
    pub fn spawn_sweeper(&self) -> LedgerResult<SweeperHandle> {
        ExpirySweeper::new(self.reservations.clone(), self.clock.clone(), self.config.sweep_interval).spawn()
    }

    // Movements

    /// Record a movement, retrying lock contention per the configured policy.
    pub fn record_movement(&self, request: MovementRequest) -> LedgerResult<Movement> {
        retry_on_conflict(&self.config.retry, || self.ledger.record_movement(request.clone()))
    }

    pub fn update_movement(&self, id: MovementId) -> LedgerResult<Movement> {
        self.ledger.update_movement(id)
    }

    pub fn delete_movement(&self, id: MovementId) -> LedgerResult<()> {
        self.ledger.delete_movement(id)
    }

    pub fn get_movement(&self, id: MovementId) -> LedgerResult<Movement> {
        self.queries.get_movement(&id)
    }

    pub fn list_movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        self.queries.list_movements(filter)
    }

    // Balances and assets

    pub fn get_balance(&self, query: &BalanceQuery) -> LedgerResult<BalanceReport> {
        self.queries.get_balance(query)
    }

    pub fn where_is_serial(&self, serial: &str) -> LedgerResult<SerialWhereabouts> {
        self.queries.where_is_serial(serial)
    }

    pub fn list_below_minimum(&self) -> LedgerResult<Vec<LowStockEntry>> {
        self.queries.list_below_minimum()
    }

    pub fn rebuild_projections(&self) -> LedgerResult<ReplayReport> {
        self.ledger.rebuild_projections()
    }

    pub fn verify_projections(&self) -> LedgerResult<ProjectionDrift> {
        self.ledger.verify_projections()
    }

    // Reservations

    pub fn create_reservation(&self, req: &NewReservation) -> LedgerResult<Reservation> {
        retry_on_conflict(&self.config.retry, || self.reservations.create_reservation(req))
    }

    pub fn release_reservation(&self, id: ReservationId, actor: ActorId) -> LedgerResult<Reservation> {
        retry_on_conflict(&self.config.retry, || self.reservations.release_reservation(id, actor))
    }

    pub fn get_reservation(&self, id: ReservationId) -> LedgerResult<Reservation> {
        self.reservations.get_reservation(id)
    }

    pub fn list_reservations(&self, filter: &ReservationFilter) -> LedgerResult<Vec<Reservation>> {
        self.reservations.list_reservations(filter)
    }

    /// Release reservations expired as of the engine clock.
    pub fn sweep_expired_reservations(&self) -> LedgerResult<Vec<ReservationId>> {
        self.reservations.sweep_expired(self.clock.now())
    }

    // Counts

    pub fn start_campaign(
        &self,
        name: &str,
        scope: CampaignScope,
        started_by: ActorId,
    ) -> LedgerResult<InventoryCampaign> {
        self.counts.start_campaign(name, scope, started_by)
    }

    pub fn submit_count(
        &self,
        campaign_id: CampaignId,
        part_number_id: PartNumberId,
        location_id: LocationId,
        counted: i64,
        counted_by: ActorId,
    ) -> LedgerResult<CountSubmission> {
        self.counts
            .submit_count(campaign_id, part_number_id, location_id, counted, counted_by)
    }

    pub fn complete_campaign(&self, id: CampaignId) -> LedgerResult<InventoryCampaign> {
        self.counts.complete_campaign(id)
    }

    pub fn cancel_campaign(&self, id: CampaignId) -> LedgerResult<InventoryCampaign> {
        self.counts.cancel_campaign(id)
    }

    pub fn get_campaign(&self, id: CampaignId) -> LedgerResult<InventoryCampaign> {
        self.counts.get_campaign(id)
    }

    pub fn list_campaigns(&self) -> LedgerResult<Vec<InventoryCampaign>> {
        self.counts.list_campaigns()
    }

    pub fn campaign_lines(&self, id: CampaignId) -> LedgerResult<Vec<CountResult>> {
        self.counts.campaign_lines(id)
    }

    // Divergences

    pub fn report_movement_divergence(
        &self,
        movement_id: MovementId,
        location_id: Option<LocationId>,
        expected: i64,
        actual: i64,
        reported_by: ActorId,
    ) -> LedgerResult<Divergence> {
        self.divergences
            .report_movement_divergence(movement_id, location_id, expected, actual, reported_by)
    }

    pub fn start_investigation(&self, id: DivergenceId) -> LedgerResult<Divergence> {
        self.divergences.start_investigation(id)
    }

    pub fn resolve_divergence(
        &self,
        id: DivergenceId,
        kind: ResolutionKind,
        resolved_by: ActorId,
        approval: Option<Approval>,
        serials: Vec<String>,
    ) -> LedgerResult<Divergence> {
        self.divergences
            .resolve_divergence(id, kind, resolved_by, approval, serials)
    }

    pub fn get_divergence(&self, id: DivergenceId) -> LedgerResult<Divergence> {
        self.divergences.get_divergence(id)
    }

    pub fn list_divergences(&self, filter: &DivergenceFilter) -> LedgerResult<Vec<Divergence>> {
        self.divergences.list_divergences(filter)
    }
}
