//! Reservation manager: holds against available stock, booked as
//! RESERVA/LIBERACAO movements so balances stay a pure fold of the ledger.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use stockledger_core::{ActorId, Clock, ReservationId};
use stockledger_inventory::{
    Movement, MovementFilter, MovementRequest, MovementType, NewReservation, ReleaseReason,
    Reservation, ReservationFilter,
};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MovementLedger;
use crate::locks::{KeyGuard, LockKey};
use crate::store::KeyValueStore;

/// Actor recorded on movements the engine books on its own behalf.
pub fn system_actor() -> ActorId {
    ActorId::from_uuid(Uuid::nil())
}

fn evidence_for(id: ReservationId) -> String {
    format!("reservation:{id}")
}

pub struct ReservationManager {
    ledger: Arc<MovementLedger>,
    reservations: Arc<dyn KeyValueStore<ReservationId, Reservation>>,
    clock: Arc<dyn Clock>,
    default_ttl: chrono::Duration,
    /// Active holds ordered by expiry; sweeps never read released history.
    active: Mutex<BTreeSet<(DateTime<Utc>, ReservationId)>>,
}

impl ReservationManager {
    /// Build the manager and index the reservations still active in the store.
    pub fn open(
        ledger: Arc<MovementLedger>,
        reservations: Arc<dyn KeyValueStore<ReservationId, Reservation>>,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> LedgerResult<Self> {
        let default_ttl = chrono::Duration::from_std(default_ttl)
            .map_err(|_| LedgerError::Validation("default reservation ttl is out of range".into()))?;
        let active: BTreeSet<_> = reservations
            .list()?
            .into_iter()
            .filter(|r| r.active)
            .map(|r| (r.expires_at, r.id))
            .collect();
        debug!(active = active.len(), "reservation index loaded");

        Ok(Self {
            ledger,
            reservations,
            clock,
            default_ttl,
            active: Mutex::new(active),
        })
    }

    fn index(&self) -> LedgerResult<MutexGuard<'_, BTreeSet<(DateTime<Utc>, ReservationId)>>> {
        self.active.lock().map_err(|_| LedgerError::poisoned("reservation index"))
    }

    pub fn create_reservation(&self, req: &NewReservation) -> LedgerResult<Reservation> {
        req.validate()?;
        // Everything that can reject the request runs before stock is held.
        let expires_at = req.expires_at(self.default_ttl, self.clock.now())?;

        let id = ReservationId::new();
        let mut movement = MovementRequest::new(MovementType::Reserva, req.part_number_id, req.quantity, req.actor_id)
            .from_location(req.location_id)
            .with_reason(req.purpose.trim());
        movement.project_id = req.project_id;
        movement.evidence_ref = Some(evidence_for(id));

        let guard = self.ledger.lock(MovementLedger::lock_keys(&movement)?)?;
        let booked = self.ledger.record_locked(&guard, movement)?;
        let reservation = Reservation::open(id, req, expires_at, booked.id, booked.occurred_at);
        if let Err(e) = self.reservations.save(&reservation) {
            self.undo_hold(&guard, &reservation);
            return Err(e);
        }
        self.index()?.insert((reservation.expires_at, id));

        info!(
            reservation_id = %id,
            balance = %reservation.key,
            quantity = reservation.quantity,
            expires_at = %reservation.expires_at,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Give back a hold whose reservation row never reached the store.
    fn undo_hold(&self, guard: &KeyGuard<'_, LockKey>, reservation: &Reservation) {
        let movement = self.release_movement(reservation, system_actor(), "reservation not persisted");
        match self.ledger.record_locked(guard, movement) {
            Ok(m) => warn!(
                reservation_id = %reservation.id,
                movement_id = %m.id,
                "reservation row not saved; hold returned"
            ),
            Err(e) => error!(
                reservation_id = %reservation.id,
                error = %e,
                "reservation row not saved and hold could not be returned"
            ),
        }
    }

    fn release_movement(&self, reservation: &Reservation, actor: ActorId, reason: &str) -> MovementRequest {
        let mut movement = MovementRequest::new(
            MovementType::Liberacao,
            reservation.key.part_number_id,
            reservation.quantity,
            actor,
        )
        .from_location(reservation.key.location_id)
        .with_reason(reason);
        movement.project_id = reservation.key.project_id;
        movement.evidence_ref = Some(evidence_for(reservation.id));
        movement
    }

    /// LIBERACAO already booked for `reservation`, if a previous release got
    /// as far as the ledger but not the reservation row.
    fn booked_release(&self, reservation: &Reservation) -> LedgerResult<Option<Movement>> {
        let evidence = evidence_for(reservation.id);
        let filter = MovementFilter {
            part_number_id: Some(reservation.key.part_number_id),
            location_id: Some(reservation.key.location_id),
            project_id: reservation.key.project_id,
            movement_type: Some(MovementType::Liberacao),
            serial: None,
        };
        Ok(self
            .ledger
            .movements()
            .list(&filter)?
            .into_iter()
            .find(|m| m.evidence_ref.as_deref() == Some(evidence.as_str())))
    }

    /// Release an active reservation. Releasing one that is already inactive
    /// returns it unchanged.
    pub fn release_reservation(&self, id: ReservationId, actor: ActorId) -> LedgerResult<Reservation> {
        self.release(id, actor, ReleaseReason::Explicit)
    }

    pub fn get_reservation(&self, id: ReservationId) -> LedgerResult<Reservation> {
        self.reservations
            .get(&id)?
            .ok_or(LedgerError::ReservationNotFound(id))
    }

    pub fn list_reservations(&self, filter: &ReservationFilter) -> LedgerResult<Vec<Reservation>> {
        let mut found: Vec<Reservation> = self
            .reservations
            .list()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    /// Release everything whose expiry is strictly before `now`. Returns the
    /// ids released by this sweep; failures are logged and retried next sweep.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> LedgerResult<Vec<ReservationId>> {
        let floor = ReservationId::from_uuid(Uuid::nil());
        let expired: Vec<ReservationId> = self
            .index()?
            .range(..(now, floor))
            .map(|(_, id)| *id)
            .collect();

        let mut released = Vec::with_capacity(expired.len());
        for id in expired {
            match self.release(id, system_actor(), ReleaseReason::Expired) {
                Ok(r) if r.release_reason == Some(ReleaseReason::Expired) => released.push(id),
                Ok(_) => debug!(reservation_id = %id, "reservation released concurrently"),
                Err(e) => warn!(reservation_id = %id, error = %e, "failed to expire reservation"),
            }
        }
        if !released.is_empty() {
            info!(count = released.len(), "expired reservations released");
        }
        Ok(released)
    }

    fn forget(&self, reservation: &Reservation) -> LedgerResult<()> {
        self.index()?.remove(&(reservation.expires_at, reservation.id));
        Ok(())
    }

    fn release(&self, id: ReservationId, actor: ActorId, reason: ReleaseReason) -> LedgerResult<Reservation> {
        let current = self.get_reservation(id)?;
        if !current.active {
            self.forget(&current)?;
            return Ok(current);
        }

        let guard = self.ledger.lock(vec![LockKey::Balance(current.key)])?;
        // Someone may have released it while we waited for the lock.
        let current = self.get_reservation(id)?;
        if !current.active {
            self.forget(&current)?;
            return Ok(current);
        }

        let booked = match self.booked_release(&current)? {
            Some(earlier) => {
                debug!(reservation_id = %id, movement_id = %earlier.id, "reusing booked release");
                earlier
            }
            None => {
                let text = match reason {
                    ReleaseReason::Explicit => "reservation released",
                    ReleaseReason::Expired => "reservation expired",
                };
                self.ledger
                    .record_locked(&guard, self.release_movement(&current, actor, text))?
            }
        };
        let released = current.released(reason, booked.id, self.clock.now())?;
        self.reservations.save(&released)?;
        self.forget(&released)?;

        info!(reservation_id = %id, reason = ?reason, "reservation released");
        Ok(released)
    }
}
