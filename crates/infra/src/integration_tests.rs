//! Cross-component scenarios through `InventoryEngine`.
//!
//! Movement → balances/assets → reservations → counts → divergences, over the
//! in-memory stores and a manual clock.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use stockledger_core::{ActorId, LocationId, ManualClock, PartNumberId, ProjectId, ReservationId};
    use stockledger_inventory::{
        Approval, AssetStatus, BalanceKey, CampaignScope, DivergenceFilter, DivergenceStatus,
        LocationKind, MovementFilter, MovementRequest, MovementType, NewLocation, NewPartNumber,
        NewProject, NewReservation, Reservation, ReservationFilter, ResolutionKind,
    };

    use crate::config::EngineConfig;
    use crate::engine::InventoryEngine;
    use crate::error::LedgerError;
    use crate::ledger::MovementLedger;
    use crate::queries::BalanceQuery;
    use crate::error::LedgerResult;
    use crate::store::{InMemoryKeyValueStore, KeyValueStore, Stores};

    struct Fixture {
        engine: Arc<InventoryEngine>,
        clock: Arc<ManualClock>,
        stores: Stores,
        actor: ActorId,
        barueri: LocationId,
        recife: LocationId,
    }

    fn fixture() -> Fixture {
        fixture_over(Stores::in_memory())
    }

    fn fixture_over(stores: Stores) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));
        let engine = InventoryEngine::open(EngineConfig::default(), stores.clone(), clock.clone()).unwrap();
        let barueri = location(&engine, "CD-Barueri", LocationKind::Warehouse, None);
        let recife = location(&engine, "CD-Recife", LocationKind::Warehouse, None);
        Fixture {
            engine: Arc::new(engine),
            clock,
            stores,
            actor: ActorId::new(),
            barueri,
            recife,
        }
    }

    fn location(engine: &InventoryEngine, code: &str, kind: LocationKind, parent: Option<LocationId>) -> LocationId {
        engine
            .catalog()
            .register_location(&NewLocation {
                code: code.to_string(),
                name: String::new(),
                kind,
                parent_id: parent,
            })
            .unwrap()
            .id
    }

    fn part(engine: &InventoryEngine, code: &str, serialized: bool, min_stock: i64) -> PartNumberId {
        engine
            .catalog()
            .register_part_number(&NewPartNumber {
                code: code.to_string(),
                description: String::new(),
                serialized,
                min_stock,
                max_stock: None,
            })
            .unwrap()
            .id
    }

    impl Fixture {
        fn receive(&self, pn: PartNumberId, qty: i64, at: LocationId) {
            self.engine
                .record_movement(MovementRequest::new(MovementType::Entrada, pn, qty, self.actor).to_location(at))
                .unwrap();
        }

        fn saida(&self, pn: PartNumberId, qty: i64, from: LocationId) -> Result<(), LedgerError> {
            self.engine
                .record_movement(MovementRequest::new(MovementType::Saida, pn, qty, self.actor).from_location(from))
                .map(|_| ())
        }

        fn balance(&self, pn: PartNumberId, at: LocationId) -> (i64, i64, i64) {
            let s = self
                .engine
                .ledger()
                .balances()
                .snapshot(&BalanceKey::new(pn, at, None))
                .unwrap();
            (s.total, s.reserved, s.available)
        }

        fn reserve(&self, pn: PartNumberId, qty: i64, ttl_secs: Option<i64>) -> Reservation {
            self.try_reserve(pn, qty, ttl_secs).unwrap()
        }

        fn try_reserve(&self, pn: PartNumberId, qty: i64, ttl_secs: Option<i64>) -> LedgerResult<Reservation> {
            self.engine.create_reservation(&NewReservation {
                part_number_id: pn,
                location_id: self.barueri,
                project_id: None,
                quantity: qty,
                purpose: "field install".into(),
                ttl_secs,
                actor_id: self.actor,
            })
        }

        fn movements_of(&self, movement_type: MovementType) -> usize {
            self.engine
                .list_movements(&MovementFilter {
                    movement_type: Some(movement_type),
                    ..MovementFilter::default()
                })
                .unwrap()
                .len()
        }
    }

    /// Reservation store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyReservations {
        inner: InMemoryKeyValueStore<ReservationId, Reservation>,
        failing: AtomicBool,
    }

    impl FlakyReservations {
        fn fail(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }
    }

    impl KeyValueStore<ReservationId, Reservation> for FlakyReservations {
        fn get(&self, key: &ReservationId) -> LedgerResult<Option<Reservation>> {
            self.inner.get(key)
        }

        fn upsert(&self, key: ReservationId, value: Reservation) -> LedgerResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Store("reservation store unavailable".into()));
            }
            self.inner.upsert(key, value)
        }

        fn list(&self) -> LedgerResult<Vec<Reservation>> {
            self.inner.list()
        }
    }

    fn flaky_fixture() -> (Fixture, Arc<FlakyReservations>) {
        let flaky = Arc::new(FlakyReservations::default());
        let mut stores = Stores::in_memory();
        stores.reservations = flaky.clone();
        (fixture_over(stores), flaky)
    }

    #[test]
    fn entry_creates_the_balance_row() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);
        assert_eq!(f.balance(pn, f.barueri), (10, 0, 10));
    }

    #[test]
    fn insufficient_stock_leaves_no_trace_and_reports_the_snapshot() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 2, f.barueri);

        let err = f.saida(pn, 5, f.barueri).unwrap_err();
        assert_eq!(err.kind(), "insufficient_stock");
        assert_eq!(err.snapshot().map(|s| s.available), Some(2));
        assert_eq!(f.balance(pn, f.barueri), (2, 0, 2));
        assert_eq!(f.engine.list_movements(&MovementFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn transfer_is_never_observed_half_applied() {
        let f = fixture();
        let pn = part(&f.engine, "CBL-CAT6", false, 0);
        f.receive(pn, 10, f.barueri);

        let done = Arc::new(AtomicBool::new(false));
        let observer = {
            let engine = f.engine.clone();
            let done = done.clone();
            let (a, b) = (f.barueri, f.recife);
            thread::spawn(move || {
                let mut seen = 0;
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    let rows = engine.ledger().balances().select(|r| r.key.part_number_id == pn).unwrap();
                    let total: i64 = rows
                        .iter()
                        .filter(|r| r.key.location_id == a || r.key.location_id == b)
                        .map(|r| r.quantity_total)
                        .sum();
                    assert_eq!(total, 10, "observed a partial transfer");
                    seen += 1;
                    if finished {
                        break seen;
                    }
                }
            })
        };

        for _ in 0..25 {
            f.engine
                .record_movement(
                    MovementRequest::new(MovementType::Transferencia, pn, 4, f.actor)
                        .from_location(f.barueri)
                        .to_location(f.recife),
                )
                .unwrap();
            f.engine
                .record_movement(
                    MovementRequest::new(MovementType::Transferencia, pn, 4, f.actor)
                        .from_location(f.recife)
                        .to_location(f.barueri),
                )
                .unwrap();
        }
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Transferencia, pn, 4, f.actor)
                    .from_location(f.barueri)
                    .to_location(f.recife),
            )
            .unwrap();
        done.store(true, Ordering::SeqCst);
        assert!(observer.join().unwrap() > 0);

        assert_eq!(f.balance(pn, f.barueri), (6, 0, 6));
        assert_eq!(f.balance(pn, f.recife), (4, 0, 4));
    }

    #[test]
    fn concurrent_outbound_movements_never_oversell() {
        for _ in 0..20 {
            let f = fixture();
            let pn = part(&f.engine, "SW-9200", false, 0);
            f.receive(pn, 5, f.barueri);

            let barrier = Arc::new(Barrier::new(2));
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let engine = f.engine.clone();
                    let barrier = barrier.clone();
                    let (actor, from) = (f.actor, f.barueri);
                    thread::spawn(move || {
                        barrier.wait();
                        engine.record_movement(
                            MovementRequest::new(MovementType::Saida, pn, 3, actor).from_location(from),
                        )
                    })
                })
                .collect();
            let outcomes: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(outcomes
                .iter()
                .any(|r| matches!(r, Err(LedgerError::InsufficientStock { .. }))));
            assert_eq!(f.balance(pn, f.barueri), (2, 0, 2));
        }
    }

    #[test]
    fn movements_cannot_be_updated_or_deleted() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        let m = f
            .engine
            .record_movement(MovementRequest::new(MovementType::Entrada, pn, 3, f.actor).to_location(f.barueri))
            .unwrap();

        assert_eq!(
            f.engine.update_movement(m.id).unwrap_err(),
            LedgerError::ImmutableMovementViolation(m.id)
        );
        assert_eq!(
            f.engine.delete_movement(m.id).unwrap_err().kind(),
            "immutable_movement_violation"
        );
        assert_eq!(f.engine.get_movement(m.id).unwrap(), m);
        assert_eq!(f.balance(pn, f.barueri), (3, 0, 3));
    }

    #[test]
    fn unknown_movement_types_are_rejected() {
        let err = MovementLedger::parse_movement_type("DEVOLUCAO").unwrap_err();
        assert_eq!(err, LedgerError::UnknownMovementType("DEVOLUCAO".into()));
        assert_eq!(MovementLedger::parse_movement_type("EXPEDICAO").unwrap(), MovementType::Expedicao);
    }

    #[test]
    fn replay_reproduces_the_live_projection_and_survives_restart() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", true, 0);
        let cable = part(&f.engine, "CBL-CAT6", false, 0);
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Entrada, pn, 3, f.actor)
                    .to_location(f.barueri)
                    .with_serials(["SN-1", "SN-2", "SN-3"]),
            )
            .unwrap();
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Transferencia, pn, 1, f.actor)
                    .from_location(f.barueri)
                    .to_location(f.recife)
                    .with_serials(["SN-2"]),
            )
            .unwrap();
        f.receive(cable, 40, f.recife);
        f.saida(cable, 15, f.recife).unwrap();
        f.reserve(pn, 1, None);

        let live = f.engine.ledger().balances().list().unwrap();
        let assets = f.engine.ledger().assets().list().unwrap();
        assert!(f.engine.verify_projections().unwrap().is_clean());

        let report = f.engine.rebuild_projections().unwrap();
        assert_eq!(report.movements_replayed, 5);
        assert_eq!(f.engine.ledger().balances().list().unwrap(), live);

        let reopened = InventoryEngine::open(EngineConfig::default(), f.stores.clone(), f.clock.clone()).unwrap();
        assert_eq!(reopened.ledger().balances().list().unwrap(), live);
        assert_eq!(reopened.ledger().assets().list().unwrap(), assets);
    }

    #[test]
    fn reservation_lifecycle_with_simulated_expiry() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);

        let r = f.reserve(pn, 2, Some(60));
        assert_eq!(f.balance(pn, f.barueri), (10, 2, 8));

        f.clock.advance(Duration::seconds(60));
        assert!(f.engine.sweep_expired_reservations().unwrap().is_empty(), "expiry is strict");

        f.clock.advance(Duration::seconds(1));
        assert_eq!(f.engine.sweep_expired_reservations().unwrap(), vec![r.id]);
        assert_eq!(f.balance(pn, f.barueri), (10, 0, 10));
        assert!(!f.engine.get_reservation(r.id).unwrap().active);
    }

    #[test]
    fn explicit_release_makes_the_later_sweep_a_no_op() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);
        let r = f.reserve(pn, 2, Some(60));

        let released = f.engine.release_reservation(r.id, f.actor).unwrap();
        assert!(!released.active);
        assert_eq!(f.balance(pn, f.barueri), (10, 0, 10));

        f.clock.advance(Duration::hours(2));
        assert!(f.engine.sweep_expired_reservations().unwrap().is_empty());
        assert_eq!(f.engine.release_reservation(r.id, f.actor).unwrap(), released);
        assert_eq!(f.balance(pn, f.barueri), (10, 0, 10));

        let liberacoes = f
            .engine
            .list_movements(&MovementFilter {
                movement_type: Some(MovementType::Liberacao),
                ..MovementFilter::default()
            })
            .unwrap();
        assert_eq!(liberacoes.len(), 1);
    }

    #[test]
    fn reservations_are_bounded_by_availability() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 3, f.barueri);
        f.reserve(pn, 2, None);

        let err = f
            .engine
            .create_reservation(&NewReservation {
                part_number_id: pn,
                location_id: f.barueri,
                project_id: None,
                quantity: 2,
                purpose: "second install".into(),
                ttl_secs: None,
                actor_id: f.actor,
            })
            .unwrap_err();
        assert_eq!(err.snapshot().map(|s| s.available), Some(1));
        assert_eq!(f.saida(pn, 2, f.barueri).unwrap_err().kind(), "insufficient_stock");
        assert_eq!(
            f.engine.list_reservations(&ReservationFilter::default()).unwrap().len(),
            1
        );
        assert!(matches!(
            f.engine.release_reservation(stockledger_core::ReservationId::new(), f.actor),
            Err(LedgerError::ReservationNotFound(_))
        ));
    }

    #[test]
    fn repeated_count_submission_opens_a_single_divergence() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);

        let campaign = f
            .engine
            .start_campaign("March cycle count", CampaignScope::default(), f.actor)
            .unwrap();
        assert_eq!(campaign.stats.total_items, 1);

        let first = f.engine.submit_count(campaign.id, pn, f.barueri, 9, f.actor).unwrap();
        let second = f.engine.submit_count(campaign.id, pn, f.barueri, 9, f.actor).unwrap();
        assert_eq!(first.divergence.map(|d| d.id), second.divergence.as_ref().map(|d| d.id));

        let open = f
            .engine
            .list_divergences(&DivergenceFilter {
                campaign_id: Some(campaign.id),
                ..DivergenceFilter::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].variance(), -1);
        assert_eq!(second.campaign.stats.counted_items, 1);
        assert_eq!(second.campaign.stats.divergence_count, 1);
    }

    #[test]
    fn recount_keeps_the_first_expected_snapshot() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);
        let campaign = f.engine.start_campaign("spot", CampaignScope::default(), f.actor).unwrap();

        f.engine.submit_count(campaign.id, pn, f.barueri, 8, f.actor).unwrap();
        f.receive(pn, 5, f.barueri);
        let recount = f.engine.submit_count(campaign.id, pn, f.barueri, 9, f.actor).unwrap();

        assert_eq!(recount.line.expected_quantity, Some(10));
        assert_eq!(recount.divergence.unwrap().actual_quantity, 9);
    }

    #[test]
    fn divergence_resolution_is_gated_and_books_the_adjustment() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);
        let campaign = f.engine.start_campaign("audit", CampaignScope::default(), f.actor).unwrap();
        let divergence = f
            .engine
            .submit_count(campaign.id, pn, f.barueri, 7, f.actor)
            .unwrap()
            .divergence
            .unwrap();

        let supervisor = ActorId::new();
        assert_eq!(
            f.engine
                .resolve_divergence(divergence.id, ResolutionKind::AdjustStock, f.actor, None, vec![])
                .unwrap_err()
                .kind(),
            "approval_required"
        );
        let rejected = Approval {
            approved: false,
            approver_id: supervisor,
            note: None,
        };
        assert_eq!(
            f.engine
                .resolve_divergence(divergence.id, ResolutionKind::AdjustStock, f.actor, Some(rejected), vec![])
                .unwrap_err(),
            LedgerError::ApprovalRejected(supervisor)
        );
        assert_eq!(f.balance(pn, f.barueri), (10, 0, 10));

        f.engine.start_investigation(divergence.id).unwrap();
        let approved = Approval {
            approved: true,
            approver_id: supervisor,
            note: Some("shelf recounted twice".into()),
        };
        let resolved = f
            .engine
            .resolve_divergence(divergence.id, ResolutionKind::AdjustStock, f.actor, Some(approved.clone()), vec![])
            .unwrap();
        assert_eq!(resolved.status, DivergenceStatus::Resolved);
        assert_eq!(f.balance(pn, f.barueri), (7, 0, 7));

        let adjustment = resolved.resolution.unwrap().adjustment_movement_id.unwrap();
        let m = f.engine.get_movement(adjustment).unwrap();
        assert_eq!((m.movement_type, m.quantity), (MovementType::AjusteNegativo, 3));

        assert!(f
            .engine
            .resolve_divergence(divergence.id, ResolutionKind::CountError, f.actor, Some(approved), vec![])
            .is_err());
    }

    #[test]
    fn count_error_resolution_books_nothing() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 4, f.barueri);
        let campaign = f.engine.start_campaign("audit", CampaignScope::default(), f.actor).unwrap();
        let d = f
            .engine
            .submit_count(campaign.id, pn, f.barueri, 6, f.actor)
            .unwrap()
            .divergence
            .unwrap();
        let before = f.engine.list_movements(&MovementFilter::default()).unwrap().len();

        let resolved = f
            .engine
            .resolve_divergence(
                d.id,
                ResolutionKind::CountError,
                f.actor,
                Some(Approval {
                    approved: true,
                    approver_id: ActorId::new(),
                    note: None,
                }),
                vec![],
            )
            .unwrap();
        assert_eq!(resolved.resolution.unwrap().adjustment_movement_id, None);
        assert_eq!(f.engine.list_movements(&MovementFilter::default()).unwrap().len(), before);
        assert_eq!(f.balance(pn, f.barueri), (4, 0, 4));
    }

    #[test]
    fn campaign_scope_covers_descendants_and_closes_once() {
        let f = fixture();
        let shelf = location(&f.engine, "CD-Barueri-A1", LocationKind::Warehouse, Some(f.barueri));
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 2, shelf);
        f.receive(pn, 3, f.recife);

        let scope = CampaignScope {
            location_id: Some(f.barueri),
            project_id: None,
        };
        let campaign = f.engine.start_campaign("Barueri", scope, f.actor).unwrap();
        let lines = f.engine.campaign_lines(campaign.id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].location_id, shelf);

        assert_eq!(
            f.engine.submit_count(campaign.id, pn, f.recife, 3, f.actor).unwrap_err().kind(),
            "validation_error"
        );
        f.engine.complete_campaign(campaign.id).unwrap();
        assert!(f.engine.submit_count(campaign.id, pn, shelf, 2, f.actor).is_err());
        assert!(f.engine.cancel_campaign(campaign.id).is_err());
    }

    #[test]
    fn movement_divergences_are_reported_once() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        let m = f
            .engine
            .record_movement(MovementRequest::new(MovementType::Entrada, pn, 10, f.actor).to_location(f.barueri))
            .unwrap();

        let d = f
            .engine
            .report_movement_divergence(m.id, None, 10, 8, f.actor)
            .unwrap();
        assert_eq!(d.location_id, f.barueri);
        assert_eq!(
            f.engine
                .report_movement_divergence(m.id, None, 10, 8, f.actor)
                .unwrap_err()
                .kind(),
            "duplicate_divergence"
        );
        assert!(f
            .engine
            .report_movement_divergence(m.id, Some(f.recife), 10, 8, f.actor)
            .is_err());
    }

    #[test]
    fn serial_lifecycle_and_timeline() {
        let f = fixture();
        let carrier = location(&f.engine, "TRANSP-01", LocationKind::Carrier, None);
        let hub = location(&f.engine, "REV-HUB", LocationKind::ReverseHub, None);
        let pn = part(&f.engine, "ONT-500", true, 0);

        let missing_serials = f
            .engine
            .record_movement(MovementRequest::new(MovementType::Entrada, pn, 1, f.actor).to_location(f.barueri));
        assert_eq!(missing_serials.unwrap_err().kind(), "validation_error");

        let steps = [
            MovementRequest::new(MovementType::Entrada, pn, 1, f.actor)
                .to_location(f.barueri)
                .with_serials(["ONT-0001"]),
            MovementRequest::new(MovementType::Saida, pn, 1, f.actor)
                .from_location(f.barueri)
                .with_serials(["ONT-0001"]),
            MovementRequest::new(MovementType::Reversa, pn, 1, f.actor)
                .to_location(carrier)
                .with_serials(["ONT-0001"]),
            MovementRequest::new(MovementType::Transferencia, pn, 1, f.actor)
                .from_location(carrier)
                .to_location(hub)
                .with_serials(["ONT-0001"]),
        ];
        for step in steps {
            f.engine.record_movement(step).unwrap();
        }

        let again = f.engine.record_movement(
            MovementRequest::new(MovementType::Entrada, pn, 1, f.actor)
                .to_location(f.barueri)
                .with_serials(["ONT-0001"]),
        );
        assert_eq!(again.unwrap_err().kind(), "serial_conflict");

        let whereabouts = f.engine.where_is_serial(" ONT-0001 ").unwrap();
        assert_eq!(whereabouts.asset.status, AssetStatus::InReverse);
        assert_eq!(whereabouts.location.map(|l| l.id), Some(hub));
        let statuses: Vec<AssetStatus> = whereabouts.timeline.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                AssetStatus::InStock,
                AssetStatus::InUse,
                AssetStatus::AwaitingReverse,
                AssetStatus::InReverse
            ]
        );
        assert_eq!(f.engine.where_is_serial("NOPE").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn inactive_part_numbers_can_be_drained_but_not_restocked() {
        let f = fixture();
        let pn = part(&f.engine, "SW-OLD", false, 0);
        f.receive(pn, 4, f.barueri);
        f.engine.catalog().deactivate_part_number(pn).unwrap();

        let err = f
            .engine
            .record_movement(MovementRequest::new(MovementType::Entrada, pn, 1, f.actor).to_location(f.barueri))
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        f.saida(pn, 4, f.barueri).unwrap();
        assert_eq!(f.balance(pn, f.barueri), (0, 0, 0));
    }

    #[test]
    fn balances_aggregate_over_children_and_projects() {
        let f = fixture();
        let shelf = location(&f.engine, "CD-Barueri-A1", LocationKind::Warehouse, Some(f.barueri));
        let project: ProjectId = f
            .engine
            .catalog()
            .register_project(&NewProject {
                code: "PRJ-ACME".into(),
                client_name: "Acme Telecom".into(),
            })
            .unwrap()
            .id;
        let pn = part(&f.engine, "SW-9200", false, 20);
        f.receive(pn, 5, f.barueri);
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Entrada, pn, 7, f.actor)
                    .to_location(shelf)
                    .for_project(project),
            )
            .unwrap();

        let query = |location_id, project_id, include_children| BalanceQuery {
            part_number_id: pn,
            location_id,
            project_id,
            include_children,
        };
        let total = |q: BalanceQuery| f.engine.get_balance(&q).unwrap().snapshot.total;

        assert_eq!(total(query(Some(f.barueri), None, false)), 5);
        assert_eq!(total(query(Some(f.barueri), None, true)), 12);
        assert_eq!(total(query(None, Some(project), false)), 7);
        assert_eq!(total(query(None, None, false)), 12);

        let low = f.engine.list_below_minimum().unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].available, 12);
    }

    #[test]
    fn reopened_engine_still_expires_open_reservations() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 10, f.barueri);
        let open = f.reserve(pn, 2, Some(60));
        let released = f.reserve(pn, 3, Some(60));
        f.engine.release_reservation(released.id, f.actor).unwrap();

        let reopened = InventoryEngine::open(EngineConfig::default(), f.stores.clone(), f.clock.clone()).unwrap();
        f.clock.advance(Duration::minutes(2));
        assert_eq!(reopened.sweep_expired_reservations().unwrap(), vec![open.id]);
        assert!(reopened.sweep_expired_reservations().unwrap().is_empty());
        assert_eq!(f.movements_of(MovementType::Liberacao), 2);
    }

    #[test]
    fn out_of_range_ttls_are_refused_before_stock_is_held() {
        let f = fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 5, f.barueri);

        for ttl in [i64::MAX, 9_000_000_000_000] {
            let err = f.try_reserve(pn, 2, Some(ttl)).unwrap_err();
            assert_eq!(err.kind(), "validation_error", "ttl {ttl}");
        }
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));
        assert_eq!(f.movements_of(MovementType::Reserva), 0);
        assert!(f.engine.list_reservations(&ReservationFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn unsaved_reservation_gives_its_hold_back() {
        let (f, flaky) = flaky_fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 5, f.barueri);

        flaky.fail(true);
        assert_eq!(f.try_reserve(pn, 2, Some(60)).unwrap_err().kind(), "store_error");
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));
        assert_eq!(f.movements_of(MovementType::Reserva), 1);
        assert_eq!(f.movements_of(MovementType::Liberacao), 1);
        assert!(f.engine.list_reservations(&ReservationFilter::default()).unwrap().is_empty());

        flaky.fail(false);
        f.reserve(pn, 5, Some(60));
        assert_eq!(f.balance(pn, f.barueri), (5, 5, 0));
        assert!(f.engine.verify_projections().unwrap().is_clean());
    }

    #[test]
    fn release_retried_after_an_unsaved_row_books_one_liberacao() {
        let (f, flaky) = flaky_fixture();
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 5, f.barueri);
        let r = f.reserve(pn, 2, Some(60));

        flaky.fail(true);
        assert_eq!(f.engine.release_reservation(r.id, f.actor).unwrap_err().kind(), "store_error");
        assert!(f.engine.get_reservation(r.id).unwrap().active);
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));

        // The sweep hits the same row while the store is still down.
        f.clock.advance(Duration::minutes(5));
        assert!(f.engine.sweep_expired_reservations().unwrap().is_empty());
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));

        flaky.fail(false);
        let released = f.engine.release_reservation(r.id, f.actor).unwrap();
        assert!(!released.active);
        assert_eq!(f.movements_of(MovementType::Liberacao), 1);
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));

        let liberacao = f
            .engine
            .list_movements(&MovementFilter {
                movement_type: Some(MovementType::Liberacao),
                ..MovementFilter::default()
            })
            .unwrap()
            .remove(0);
        assert_eq!(released.release_movement_id, Some(liberacao.id));
        assert!(f.engine.sweep_expired_reservations().unwrap().is_empty());
    }

    #[test]
    fn project_held_serial_cannot_leave_through_the_unscoped_row() {
        let f = fixture();
        let project = f
            .engine
            .catalog()
            .register_project(&NewProject {
                code: "PRJ-ACME".into(),
                client_name: "Acme Telecom".into(),
            })
            .unwrap()
            .id;
        let pn = part(&f.engine, "ONT-500", true, 0);
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Entrada, pn, 1, f.actor)
                    .to_location(f.barueri)
                    .for_project(project)
                    .with_serials(["ONT-0001"]),
            )
            .unwrap();
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Entrada, pn, 1, f.actor)
                    .to_location(f.barueri)
                    .with_serials(["ONT-0002"]),
            )
            .unwrap();

        let unscoped = f.engine.record_movement(
            MovementRequest::new(MovementType::Saida, pn, 1, f.actor)
                .from_location(f.barueri)
                .with_serials(["ONT-0001"]),
        );
        assert_eq!(unscoped.unwrap_err().kind(), "serial_conflict");
        let project_row = BalanceKey::new(pn, f.barueri, Some(project));
        assert_eq!(f.engine.ledger().balances().snapshot(&project_row).unwrap().total, 1);
        assert_eq!(f.balance(pn, f.barueri), (1, 0, 1));
        assert_eq!(f.engine.where_is_serial("ONT-0001").unwrap().asset.status, AssetStatus::InStock);

        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Saida, pn, 1, f.actor)
                    .from_location(f.barueri)
                    .for_project(project)
                    .with_serials(["ONT-0001"]),
            )
            .unwrap();
        assert_eq!(f.engine.ledger().balances().snapshot(&project_row).unwrap().total, 0);
        assert_eq!(f.balance(pn, f.barueri), (1, 0, 1));
        assert!(f.engine.verify_projections().unwrap().is_clean());
    }

    #[test]
    fn unscoped_count_over_project_stock_is_adjusted_per_project() {
        let f = fixture();
        let project = f
            .engine
            .catalog()
            .register_project(&NewProject {
                code: "PRJ-ACME".into(),
                client_name: "Acme Telecom".into(),
            })
            .unwrap()
            .id;
        let pn = part(&f.engine, "SW-9200", false, 0);
        f.receive(pn, 5, f.barueri);
        f.engine
            .record_movement(
                MovementRequest::new(MovementType::Entrada, pn, 7, f.actor)
                    .to_location(f.barueri)
                    .for_project(project),
            )
            .unwrap();
        let project_row = BalanceKey::new(pn, f.barueri, Some(project));
        let approval = || {
            Some(Approval {
                approved: true,
                approver_id: ActorId::new(),
                note: None,
            })
        };

        let wide = f.engine.start_campaign("wall to wall", CampaignScope::default(), f.actor).unwrap();
        let shortage = f
            .engine
            .submit_count(wide.id, pn, f.barueri, 10, f.actor)
            .unwrap()
            .divergence
            .unwrap();
        assert_eq!((shortage.expected_quantity, shortage.project_id), (12, None));

        let refused = f
            .engine
            .resolve_divergence(shortage.id, ResolutionKind::AdjustStock, f.actor, approval(), vec![])
            .unwrap_err();
        assert_eq!(refused.kind(), "validation_error");
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));
        assert_eq!(f.engine.ledger().balances().snapshot(&project_row).unwrap().total, 7);
        assert!(!f.engine.get_divergence(shortage.id).unwrap().is_resolved());

        f.engine
            .resolve_divergence(shortage.id, ResolutionKind::CountError, f.actor, approval(), vec![])
            .unwrap();
        f.engine.complete_campaign(wide.id).unwrap();

        let scoped = CampaignScope {
            location_id: Some(f.barueri),
            project_id: Some(project),
        };
        let recount = f.engine.start_campaign("acme recount", scoped, f.actor).unwrap();
        let divergence = f
            .engine
            .submit_count(recount.id, pn, f.barueri, 5, f.actor)
            .unwrap()
            .divergence
            .unwrap();
        assert_eq!((divergence.expected_quantity, divergence.project_id), (7, Some(project)));
        f.engine
            .resolve_divergence(divergence.id, ResolutionKind::AdjustStock, f.actor, approval(), vec![])
            .unwrap();
        assert_eq!(f.engine.ledger().balances().snapshot(&project_row).unwrap().total, 5);
        assert_eq!(f.balance(pn, f.barueri), (5, 0, 5));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(i64),
        Release(usize),
        Ship(i64),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..6).prop_map(Op::Reserve),
            (0usize..8).prop_map(Op::Release),
            (1i64..4).prop_map(Op::Ship),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn reserved_always_equals_active_reservations(ops in prop::collection::vec(arb_op(), 1..20)) {
            let f = fixture();
            let pn = part(&f.engine, "SW-9200", false, 0);
            f.receive(pn, 20, f.barueri);

            let mut held = Vec::new();
            for op in ops {
                match op {
                    Op::Reserve(q) => {
                        let req = NewReservation {
                            part_number_id: pn,
                            location_id: f.barueri,
                            project_id: None,
                            quantity: q,
                            purpose: "prop".into(),
                            ttl_secs: None,
                            actor_id: f.actor,
                        };
                        if let Ok(r) = f.engine.create_reservation(&req) {
                            held.push(r.id);
                        }
                    }
                    Op::Release(i) if !held.is_empty() => {
                        let id = held[i % held.len()];
                        f.engine.release_reservation(id, f.actor).unwrap();
                    }
                    Op::Release(_) => {}
                    Op::Ship(q) => {
                        let _ = f.saida(pn, q, f.barueri);
                    }
                }

                let (total, reserved, available) = f.balance(pn, f.barueri);
                let active: i64 = f
                    .engine
                    .list_reservations(&ReservationFilter { active_only: true, ..ReservationFilter::default() })
                    .unwrap()
                    .iter()
                    .map(|r| r.quantity)
                    .sum();
                prop_assert_eq!(reserved, active);
                prop_assert_eq!(available, total - reserved);
                prop_assert!(available >= 0);
            }
        }
    }
}
