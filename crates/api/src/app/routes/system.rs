use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::Response,
    routing::post,
    Router,
};

use crate::app::routes::common::ok;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub fn admin_router() -> Router {
    Router::new()
        .route("/rebuild", post(rebuild_projections))
        .route("/verify", post(verify_projections))
}

/// Drop the materialized balances and assets and fold them again from the
/// ledger.
pub async fn rebuild_projections(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|engine| engine.rebuild_projections()).await {
        Ok(report) => ok(report),
        Err(resp) => resp,
    }
}

pub async fn verify_projections(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|engine| engine.verify_projections()).await {
        Ok(drift) => ok(serde_json::json!({
            "clean": drift.is_clean(),
            "drift": drift,
        })),
        Err(resp) => resp,
    }
}
