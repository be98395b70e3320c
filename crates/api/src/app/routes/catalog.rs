use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};

use stockledger_core::{LocationId, PartNumberId, ProjectId};
use stockledger_inventory::{NewLocation, NewPartNumber, NewProject};

use crate::app::dto;
use crate::app::routes::common::{created, ok, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/part-numbers", post(register_part_number).get(list_part_numbers))
        .route("/part-numbers/:id", get(get_part_number))
        .route("/part-numbers/:id/deactivate", post(deactivate_part_number))
        .route("/part-numbers/:id/stock-levels", put(set_stock_levels))
        .route("/locations", post(register_location).get(list_locations))
        .route("/locations/:id", get(get_location))
        .route("/locations/:id/parent", put(set_location_parent))
        .route("/locations/:id/ancestors", get(location_ancestors))
        .route("/locations/:id/descendants", get(location_descendants))
        .route("/projects", post(register_project).get(list_projects))
        .route("/projects/:id", get(get_project))
}

pub async fn register_part_number(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewPartNumber>,
) -> Response {
    match services.run(move |e| e.catalog().register_part_number(&body)).await {
        Ok(pn) => created(pn),
        Err(resp) => resp,
    }
}

pub async fn list_part_numbers(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|e| e.catalog().list_part_numbers()).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_part_number(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: PartNumberId = match parse_id(&id, "part number") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.catalog().part_number(&id)).await {
        Ok(pn) => ok(pn),
        Err(resp) => resp,
    }
}

pub async fn deactivate_part_number(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: PartNumberId = match parse_id(&id, "part number") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.catalog().deactivate_part_number(id)).await {
        Ok(pn) => ok(pn),
        Err(resp) => resp,
    }
}

pub async fn set_stock_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::StockLevelsRequest>,
) -> Response {
    let id: PartNumberId = match parse_id(&id, "part number") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .run(move |e| e.catalog().set_stock_levels(id, body.min_stock, body.max_stock))
        .await
    {
        Ok(pn) => ok(pn),
        Err(resp) => resp,
    }
}

pub async fn register_location(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewLocation>,
) -> Response {
    match services.run(move |e| e.catalog().register_location(&body)).await {
        Ok(location) => created(location),
        Err(resp) => resp,
    }
}

pub async fn list_locations(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|e| e.catalog().list_locations()).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_location(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: LocationId = match parse_id(&id, "location") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.catalog().location(&id)).await {
        Ok(location) => ok(location),
        Err(resp) => resp,
    }
}

/// Re-parent a location. Cycles are rejected.
pub async fn set_location_parent(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetParentRequest>,
) -> Response {
    let id: LocationId = match parse_id(&id, "location") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .run(move |e| e.catalog().set_location_parent(id, body.parent_id))
        .await
    {
        Ok(location) => ok(location),
        Err(resp) => resp,
    }
}

pub async fn location_ancestors(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: LocationId = match parse_id(&id, "location") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.catalog().ancestors(&id)).await {
        Ok(chain) => ok(chain),
        Err(resp) => resp,
    }
}

pub async fn location_descendants(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: LocationId = match parse_id(&id, "location") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.catalog().descendants(&id)).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn register_project(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewProject>,
) -> Response {
    match services.run(move |e| e.catalog().register_project(&body)).await {
        Ok(project) => created(project),
        Err(resp) => resp,
    }
}

pub async fn list_projects(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|e| e.catalog().list_projects()).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_project(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: ProjectId = match parse_id(&id, "project") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.catalog().project(&id)).await {
        Ok(project) => ok(project),
        Err(resp) => resp,
    }
}
