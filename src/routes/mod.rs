//! Route modules for the Invoice Intake Server

pub mod health;
pub mod invoices;
pub mod ocr;
pub mod tracker;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let max_upload = state.config().server.max_upload_bytes;

    // Browser front-ends are served from anywhere
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(tracker::router())
        .merge(health::router())
        .merge(upload::router())
        .merge(invoices::router())
        .merge(ocr::router())
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
