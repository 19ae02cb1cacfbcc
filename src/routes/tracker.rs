//! Tracker page

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};

use crate::error::Result;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(serve_tracker))
}

/// Serve the tracker HTML from disk, re-read on every request
async fn serve_tracker(State(state): State<AppState>) -> Result<Response> {
    match tokio::fs::read_to_string(&state.config().server.tracker_html).await {
        Ok(html) => Ok(Html(html).into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((
            StatusCode::NOT_FOUND,
            Html("<h1>tracker.html not found</h1>"),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}
