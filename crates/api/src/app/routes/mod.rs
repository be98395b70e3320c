use axum::{routing::get, Router};

pub mod balances;
pub mod campaigns;
pub mod catalog;
pub mod common;
pub mod divergences;
pub mod movements;
pub mod reservations;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/catalog", catalog::router())
        .nest("/movements", movements::router())
        .merge(balances::router())
        .nest("/reservations", reservations::router())
        .nest("/campaigns", campaigns::router())
        .nest("/divergences", divergences::router())
        .nest("/admin", system::admin_router())
}
