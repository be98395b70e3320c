use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
    routing::get,
    Router,
};

use stockledger_infra::BalanceQuery;

use crate::app::routes::common::ok;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/balances", get(get_balance))
        .route("/balances/below-minimum", get(list_below_minimum))
        .route("/serials/:serial", get(where_is_serial))
}

/// `?part_number_id=..&location_id=..&project_id=..&include_children=true`
pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<BalanceQuery>,
) -> Response {
    match services.run(move |e| e.get_balance(&query)).await {
        Ok(report) => ok(report),
        Err(resp) => resp,
    }
}

pub async fn list_below_minimum(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|e| e.list_below_minimum()).await {
        Ok(entries) => ok(entries),
        Err(resp) => resp,
    }
}

pub async fn where_is_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Path(serial): Path<String>,
) -> Response {
    match services.run(move |e| e.where_is_serial(&serial)).await {
        Ok(whereabouts) => ok(whereabouts),
        Err(resp) => resp,
    }
}
