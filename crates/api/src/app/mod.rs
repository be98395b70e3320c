//! HTTP API application wiring (axum router + engine services).
//!
//! - `services.rs`: engine construction and the blocking-call bridge
//! - `routes/`: HTTP routes + handlers (one file per component)
//! - `dto.rs`: request DTOs and their mapping to engine types
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: AppServices) -> Router {
    routes::router()
        .layer(Extension(Arc::new(services)))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::trace_requests)))
}
