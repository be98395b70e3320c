//! Storage boundary: the append-only ledger, keyed record stores, and the
//! in-process balance/asset projections.

pub mod kv;
pub mod movements;
pub mod postgres;
pub mod projections;

use std::sync::Arc;

use stockledger_core::{CampaignId, DivergenceId, LocationId, PartNumberId, ProjectId, ReservationId};
use stockledger_inventory::{
    CountLineKey, CountResult, Divergence, InventoryCampaign, Location, PartNumber, Project,
    Reservation,
};

pub use kv::{InMemoryKeyValueStore, KeyValueStore};
pub use movements::{InMemoryMovementStore, LedgerAppend, MovementStore};
pub use postgres::{PostgresCountResultStore, PostgresDocumentStore, PostgresMovementStore};
pub use projections::{AssetStore, BalanceStore};

/// Every store the engine writes to.
#[derive(Clone)]
pub struct Stores {
    pub movements: Arc<dyn MovementStore>,
    pub part_numbers: Arc<dyn KeyValueStore<PartNumberId, PartNumber>>,
    pub locations: Arc<dyn KeyValueStore<LocationId, Location>>,
    pub projects: Arc<dyn KeyValueStore<ProjectId, Project>>,
    pub reservations: Arc<dyn KeyValueStore<ReservationId, Reservation>>,
    pub campaigns: Arc<dyn KeyValueStore<CampaignId, InventoryCampaign>>,
    pub count_results: Arc<dyn KeyValueStore<CountLineKey, CountResult>>,
    pub divergences: Arc<dyn KeyValueStore<DivergenceId, Divergence>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            movements: Arc::new(InMemoryMovementStore::new()),
            part_numbers: Arc::new(InMemoryKeyValueStore::new()),
            locations: Arc::new(InMemoryKeyValueStore::new()),
            projects: Arc::new(InMemoryKeyValueStore::new()),
            reservations: Arc::new(InMemoryKeyValueStore::new()),
            campaigns: Arc::new(InMemoryKeyValueStore::new()),
            count_results: Arc::new(InMemoryKeyValueStore::new()),
            divergences: Arc::new(InMemoryKeyValueStore::new()),
        }
    }

    /// Postgres-backed stores. The pool must already carry the schema
    /// (see `postgres::connect`).
    pub fn postgres(pool: sqlx::PgPool, handle: tokio::runtime::Handle) -> Self {
        let docs = |collection: &'static str| (pool.clone(), handle.clone(), collection);
        Self {
            movements: Arc::new(PostgresMovementStore::new(pool.clone(), handle.clone())),
            part_numbers: document_store(docs("part_numbers")),
            locations: document_store(docs("locations")),
            projects: document_store(docs("projects")),
            reservations: document_store(docs("reservations")),
            campaigns: document_store(docs("campaigns")),
            count_results: Arc::new(PostgresCountResultStore::new(pool.clone(), handle.clone())),
            divergences: document_store(docs("divergences")),
        }
    }
}

fn document_store<K, V>(
    (pool, handle, collection): (sqlx::PgPool, tokio::runtime::Handle, &'static str),
) -> Arc<dyn KeyValueStore<K, V>>
where
    K: std::fmt::Display + 'static,
    V: serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    Arc::new(PostgresDocumentStore::new(pool, handle, collection))
}
