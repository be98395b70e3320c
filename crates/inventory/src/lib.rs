//! Inventory ledger domain.
//!
//! This crate contains the business rules for stock movements, balances,
//! serialized assets, reservations and counts, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod asset;
pub mod balance;
pub mod catalog;
pub mod count;
pub mod divergence;
pub mod movement;
pub mod reservation;

pub use asset::{next_status, Asset, AssetProjection, AssetStatus};
pub use balance::{
    apply_deltas, deltas_for, deltas_for_movement, deltas_for_request, Balance, BalanceDelta,
    BalanceEffect, BalanceKey, BalanceProjection, BalanceSnapshot,
};
pub use catalog::{
    normalize_code, Location, LocationArena, LocationKind, NewLocation, NewPartNumber, NewProject,
    PartNumber, Project,
};
pub use count::{
    compute_stats, CampaignScope, CampaignStats, CampaignStatus, CountLineKey, CountResult,
    InventoryCampaign,
};
pub use divergence::{
    Approval, Divergence, DivergenceFilter, DivergenceKind, DivergenceOrigin, DivergenceStatus,
    Resolution, ResolutionKind,
};
pub use movement::{Movement, MovementFilter, MovementRequest, MovementType, UnknownMovementType};
pub use reservation::{NewReservation, ReleaseReason, Reservation, ReservationFilter};
