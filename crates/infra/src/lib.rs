//! Infrastructure layer: the movement ledger unit of work, its stores
//! (in-memory and Postgres), and the managers built on top of it.

pub mod catalog;
pub mod config;
pub mod counts;
pub mod divergences;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod queries;
pub mod replay;
pub mod reservations;
pub mod retry;
pub mod store;
pub mod workers;

mod integration_tests;

pub use catalog::CatalogRegistry;
pub use config::EngineConfig;
pub use counts::{CountManager, CountSubmission};
pub use divergences::DivergenceDetector;
pub use engine::InventoryEngine;
pub use error::{LedgerError, LedgerResult};
pub use ledger::MovementLedger;
pub use queries::{BalanceQuery, BalanceReport, InventoryQueries, LowStockEntry, SerialWhereabouts, TimelineEntry};
pub use replay::{ProjectionDrift, ReplayReport};
pub use reservations::{system_actor, ReservationManager};
pub use retry::RetryPolicy;
pub use store::Stores;
