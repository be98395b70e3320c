use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;

use crate::app::errors;

/// Parse a path id, answering 400 with the usual error body on failure.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
    })
}

pub fn ok<T: Serialize>(value: T) -> Response {
    axum::response::IntoResponse::into_response((StatusCode::OK, axum::Json(value)))
}

pub fn created<T: Serialize>(value: T) -> Response {
    axum::response::IntoResponse::into_response((StatusCode::CREATED, axum::Json(value)))
}
