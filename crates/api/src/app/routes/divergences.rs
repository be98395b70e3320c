use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::{DivergenceId, MovementId};
use stockledger_inventory::DivergenceFilter;

use crate::app::dto;
use crate::app::routes::common::{created, ok, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_divergences))
        .route("/:id", get(get_divergence))
        .route("/:id/investigate", post(start_investigation))
        .route("/:id/resolve", post(resolve_divergence))
}

pub async fn list_divergences(
    Extension(services): Extension<Arc<AppServices>>,
    Query(filter): Query<DivergenceFilter>,
) -> Response {
    match services.run(move |e| e.list_divergences(&filter)).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_divergence(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: DivergenceId = match parse_id(&id, "divergence") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.get_divergence(id)).await {
        Ok(divergence) => ok(divergence),
        Err(resp) => resp,
    }
}

pub async fn start_investigation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: DivergenceId = match parse_id(&id, "divergence") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.start_investigation(id)).await {
        Ok(divergence) => ok(divergence),
        Err(resp) => resp,
    }
}

/// Resolution needs an approval; AdjustStock books the compensating movement.
pub async fn resolve_divergence(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ResolveDivergenceRequest>,
) -> Response {
    let id: DivergenceId = match parse_id(&id, "divergence") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .run(move |e| e.resolve_divergence(id, body.kind, body.resolved_by, body.approval, body.serials))
        .await
    {
        Ok(divergence) => ok(divergence),
        Err(resp) => resp,
    }
}

/// Mounted under `/movements/:id/divergences`.
pub async fn report_movement_divergence(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReportDivergenceRequest>,
) -> Response {
    let id: MovementId = match parse_id(&id, "movement") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .run(move |e| {
            e.report_movement_divergence(
                id,
                body.location_id,
                body.expected_quantity,
                body.actual_quantity,
                body.reported_by,
            )
        })
        .await
    {
        Ok(divergence) => created(divergence),
        Err(resp) => resp,
    }
}
