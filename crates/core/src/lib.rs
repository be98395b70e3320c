//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ActorId, AssetId, CampaignId, DivergenceId, LocationId, MovementId, PartNumberId, ProjectId,
    ReservationId,
};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
