//! Engine construction and the bridge from async handlers to the
//! synchronous engine.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use tracing::{error, info};

use stockledger_core::SystemClock;
use stockledger_infra::store::postgres;
use stockledger_infra::{EngineConfig, InventoryEngine, LedgerResult, Stores};

use crate::app::errors;

#[derive(Clone)]
pub struct AppServices {
    engine: Arc<InventoryEngine>,
}

impl AppServices {
    pub fn new(engine: Arc<InventoryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<InventoryEngine> {
        &self.engine
    }

    /// Run an engine operation on the blocking pool. Engine calls take locks
    /// and, with Postgres, block on queries, so they never run on a runtime
    /// worker.
    pub async fn run<T, F>(&self, op: F) -> Result<T, Response>
    where
        F: FnOnce(&InventoryEngine) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        match tokio::task::spawn_blocking(move || op(engine.as_ref())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(errors::ledger_error_to_response(err)),
            Err(join) => {
                error!(error = %join, "engine task panicked");
                Err(errors::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "engine task failed",
                ))
            }
        }
    }
}

/// Postgres stores when `database_url` is set, in-memory otherwise.
pub async fn build_services(config: EngineConfig) -> anyhow::Result<AppServices> {
    let stores = match config.database_url.as_deref() {
        Some(url) => {
            let pool = postgres::connect(url).await?;
            info!("using postgres ledger");
            Stores::postgres(pool, tokio::runtime::Handle::current())
        }
        None => {
            info!("DATABASE_URL not set; using in-memory ledger");
            Stores::in_memory()
        }
    };

    // Opening replays the ledger, which blocks on the store.
    let engine = tokio::task::spawn_blocking(move || {
        InventoryEngine::open(config, stores, Arc::new(SystemClock))
    })
    .await??;
    Ok(AppServices::new(Arc::new(engine)))
}
