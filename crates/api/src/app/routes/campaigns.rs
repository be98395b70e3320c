use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::CampaignId;

use crate::app::dto;
use crate::app::routes::common::{created, ok, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(start_campaign).get(list_campaigns))
        .route("/:id", get(get_campaign))
        .route("/:id/lines", get(campaign_lines))
        .route("/:id/counts", post(submit_count))
        .route("/:id/complete", post(complete_campaign))
        .route("/:id/cancel", post(cancel_campaign))
}

pub async fn start_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StartCampaignRequest>,
) -> Response {
    match services
        .run(move |e| e.start_campaign(&body.name, body.scope, body.started_by))
        .await
    {
        Ok(campaign) => created(campaign),
        Err(resp) => resp,
    }
}

pub async fn list_campaigns(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.run(|e| e.list_campaigns()).await {
        Ok(all) => ok(all),
        Err(resp) => resp,
    }
}

pub async fn get_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: CampaignId = match parse_id(&id, "campaign") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.get_campaign(id)).await {
        Ok(campaign) => ok(campaign),
        Err(resp) => resp,
    }
}

pub async fn campaign_lines(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: CampaignId = match parse_id(&id, "campaign") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.campaign_lines(id)).await {
        Ok(lines) => ok(lines),
        Err(resp) => resp,
    }
}

/// A nonzero variance opens (or refreshes) the line's divergence, returned
/// alongside the line.
pub async fn submit_count(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SubmitCountRequest>,
) -> Response {
    let id: CampaignId = match parse_id(&id, "campaign") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .run(move |e| {
            e.submit_count(
                id,
                body.part_number_id,
                body.location_id,
                body.counted_quantity,
                body.counted_by,
            )
        })
        .await
    {
        Ok(submission) => ok(submission),
        Err(resp) => resp,
    }
}

pub async fn complete_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: CampaignId = match parse_id(&id, "campaign") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.complete_campaign(id)).await {
        Ok(campaign) => ok(campaign),
        Err(resp) => resp,
    }
}

pub async fn cancel_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: CampaignId = match parse_id(&id, "campaign") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.run(move |e| e.cancel_campaign(id)).await {
        Ok(campaign) => ok(campaign),
        Err(resp) => resp,
    }
}
