//! Application-level error taxonomy.
//!
//! `LedgerError` is what every engine operation returns. Domain failures are
//! folded in through `From<DomainError>`; call sites that know better (serial
//! conflicts, insufficient stock) build the specific variant themselves.

use thiserror::Error;

use stockledger_core::{ActorId, DomainError, MovementId, ReservationId};
use stockledger_inventory::{BalanceKey, BalanceSnapshot, UnknownMovementType};

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient stock at {key}: requested {requested}, available {}", snapshot.available)]
    InsufficientStock {
        key: BalanceKey,
        requested: i64,
        snapshot: BalanceSnapshot,
    },

    /// Movements are append-only; corrections are compensating movements.
    #[error("movement {0} is immutable")]
    ImmutableMovementViolation(MovementId),

    #[error("unknown movement type: {0}")]
    UnknownMovementType(String),

    #[error("divergence already exists: {0}")]
    DuplicateDivergence(String),

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Transient. Retry with backoff.
    #[error("concurrent balance conflict: {0}")]
    ConcurrentBalanceConflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serial conflict: {0}")]
    SerialConflict(String),

    #[error("approval required: {0}")]
    ApprovalRequired(String),

    #[error("approval rejected by {0}")]
    ApprovalRejected(ActorId),

    #[error("store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Stable snake_case kind used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::ImmutableMovementViolation(_) => "immutable_movement_violation",
            LedgerError::UnknownMovementType(_) => "unknown_movement_type",
            LedgerError::DuplicateDivergence(_) => "duplicate_divergence",
            LedgerError::ReservationNotFound(_) => "reservation_not_found",
            LedgerError::ConcurrentBalanceConflict(_) => "concurrent_balance_conflict",
            LedgerError::Validation(_) => "validation_error",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::SerialConflict(_) => "serial_conflict",
            LedgerError::ApprovalRequired(_) => "approval_required",
            LedgerError::ApprovalRejected(_) => "approval_rejected",
            LedgerError::Store(_) => "store_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentBalanceConflict(_))
    }

    /// Balance snapshot attached to the failure, if any.
    pub fn snapshot(&self) -> Option<BalanceSnapshot> {
        match self {
            LedgerError::InsufficientStock { snapshot, .. } => Some(*snapshot),
            _ => None,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        LedgerError::Store(format!("{what} lock poisoned"))
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::Validation(msg),
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::Conflict(msg) => LedgerError::Validation(msg),
        }
    }
}

impl From<UnknownMovementType> for LedgerError {
    fn from(err: UnknownMovementType) -> Self {
        LedgerError::UnknownMovementType(err.0)
    }
}
