use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::ReservationId;
use stockledger_inventory::{NewReservation, ReservationFilter};

use crate::app::dto;
use crate::app::routes::common::{created, ok, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_reservation).get(list_reservations))
        .route("/sweep", post(sweep_expired))
        .route("/:id", get(get_reservation))
        .route("/:id/release", post(release_reservation))
}

pub async fn create_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewReservation>,
) -> Response {
    match services.run(move |e| e.create_reservation(&body)).await {
        Ok(reservation) => created(reservation),
        Err(resp) => resp,
    }
}

pub async fn list_reservations(
    Extension(services): Extension<Arc<AppServices>>,
    Query(filter): Query<ReservationFilter>,
) -> Response {
    match services.run(move |e| e.list_reservations(&filter)).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: ReservationId = match parse_id(&id, "reservation") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.get_reservation(id)).await {
        Ok(reservation) => ok(reservation),
        Err(resp) => resp,
    }
}

/// Idempotent: releasing an already released reservation returns it as is.
pub async fn release_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ActorRequest>,
) -> Response {
    let id: ReservationId = match parse_id(&id, "reservation") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .run(move |e| e.release_reservation(id, body.actor_id))
        .await
    {
        Ok(reservation) => ok(reservation),
        Err(resp) => resp,
    }
}

pub async fn sweep_expired(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|e| e.sweep_expired_reservations()).await {
        Ok(released) => ok(serde_json::json!({ "released": released })),
        Err(resp) => resp,
    }
}
