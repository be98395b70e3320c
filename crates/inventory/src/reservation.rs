//! Time-bounded holds against available balance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, DomainError, DomainResult, Entity, LocationId, MovementId, PartNumberId, ProjectId,
    ReservationId,
};

use crate::balance::BalanceKey;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Explicit,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub key: BalanceKey,
    pub quantity: i64,
    pub purpose: String,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub reserve_movement_id: MovementId,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
    pub release_movement_id: Option<MovementId>,
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request to hold stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub part_number_id: PartNumberId,
    pub location_id: LocationId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub quantity: i64,
    pub purpose: String,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub ttl_secs: Option<i64>,
    pub actor_id: ActorId,
}

impl NewReservation {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.part_number_id, self.location_id, self.project_id)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("reservation quantity must be positive"));
        }
        if let Some(ttl) = self.ttl_secs {
            if ttl <= 0 {
                return Err(DomainError::validation("reservation ttl must be positive"));
            }
            if Duration::try_seconds(ttl).is_none() {
                return Err(DomainError::validation(format!("reservation ttl {ttl}s is out of range")));
            }
        }
        if self.purpose.trim().is_empty() {
            return Err(DomainError::validation("reservation purpose cannot be empty"));
        }
        Ok(())
    }

    /// When a hold placed at `now` lapses. `default_ttl` applies when the
    /// request carries none.
    pub fn expires_at(&self, default_ttl: Duration, now: DateTime<Utc>) -> DomainResult<DateTime<Utc>> {
        let ttl = match self.ttl_secs {
            Some(secs) => Duration::try_seconds(secs)
                .ok_or_else(|| DomainError::validation(format!("reservation ttl {secs}s is out of range")))?,
            None => default_ttl,
        };
        now.checked_add_signed(ttl)
            .ok_or_else(|| DomainError::validation("reservation expiry is out of range"))
    }
}

impl Reservation {
    pub fn open(
        id: ReservationId,
        req: &NewReservation,
        expires_at: DateTime<Utc>,
        reserve_movement_id: MovementId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            key: req.key(),
            quantity: req.quantity,
            purpose: req.purpose.trim().to_string(),
            actor_id: req.actor_id,
            created_at: now,
            expires_at,
            active: true,
            reserve_movement_id,
            released_at: None,
            release_reason: None,
            release_movement_id: None,
        }
    }

    /// Active and strictly past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at < now
    }

    pub fn released(
        &self,
        reason: ReleaseReason,
        release_movement_id: MovementId,
        at: DateTime<Utc>,
    ) -> DomainResult<Reservation> {
        if !self.active {
            return Err(DomainError::conflict(format!(
                "reservation {} is already released",
                self.id
            )));
        }
        Ok(Reservation {
            active: false,
            released_at: Some(at),
            release_reason: Some(reason),
            release_movement_id: Some(release_movement_id),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFilter {
    pub part_number_id: Option<PartNumberId>,
    pub location_id: Option<LocationId>,
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub active_only: bool,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.part_number_id.is_none_or(|p| p == r.key.part_number_id)
            && self.location_id.is_none_or(|l| l == r.key.location_id)
            && self.project_id.is_none_or(|p| r.key.project_id == Some(p))
            && (!self.active_only || r.active)
    }
}
