//! OCR diagnostics

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::ocr::OcrProvider;
use crate::state::AppState;

#[derive(Serialize)]
struct ProvidersResponse {
    providers: Vec<OcrProvider>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ocr/providers", get(list_providers))
}

/// List OCR providers that currently answer their availability probe
async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.ingest().ocr().available_providers().await,
    })
}
