use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockledger_inventory::BalanceSnapshot;
use stockledger_infra::LedgerError;

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InsufficientStock { .. }
        | LedgerError::ConcurrentBalanceConflict(_)
        | LedgerError::DuplicateDivergence(_)
        | LedgerError::SerialConflict(_) => StatusCode::CONFLICT,
        LedgerError::NotFound(_) | LedgerError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Validation(_) | LedgerError::UnknownMovementType(_) => StatusCode::BAD_REQUEST,
        LedgerError::ApprovalRequired(_) | LedgerError::ApprovalRejected(_) => StatusCode::FORBIDDEN,
        LedgerError::ImmutableMovementViolation(_) => StatusCode::METHOD_NOT_ALLOWED,
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    error_body(status_for(&err), err.kind(), err.to_string(), err.snapshot())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    error_body(status, code, message.into(), None)
}

fn error_body(
    status: StatusCode,
    code: &'static str,
    message: String,
    balance: Option<BalanceSnapshot>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message,
            "balance": balance,
        })),
    )
        .into_response()
}
