use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::MovementId;

use crate::app::routes::common::{created, ok, parse_id};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(record_movement).get(list_movements))
        .route(
            "/:id",
            get(get_movement).put(update_movement).delete(delete_movement),
        )
        .route(
            "/:id/divergences",
            post(crate::app::routes::divergences::report_movement_divergence),
        )
}

pub async fn record_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RecordMovementRequest>,
) -> Response {
    let request = match body.into_request() {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    match services.run(move |e| e.record_movement(request)).await {
        Ok(movement) => created(movement),
        Err(resp) => resp,
    }
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::MovementParams>,
) -> Response {
    let filter = match params.into_filter() {
        Ok(f) => f,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    match services.run(move |e| e.list_movements(&filter)).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: MovementId = match parse_id(&id, "movement") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.get_movement(id)).await {
        Ok(movement) => ok(movement),
        Err(resp) => resp,
    }
}

/// Movements are immutable; this always answers 405 whatever the body holds.
pub async fn update_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: MovementId = match parse_id(&id, "movement") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.update_movement(id)).await {
        Ok(movement) => ok(movement),
        Err(resp) => resp,
    }
}

/// Movements are immutable; this always answers 405.
pub async fn delete_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: MovementId = match parse_id(&id, "movement") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.delete_movement(id)).await {
        Ok(()) => ok(serde_json::json!({ "deleted": true })),
        Err(resp) => resp,
    }
}
