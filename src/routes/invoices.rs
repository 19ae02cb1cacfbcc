//! Invoice API routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::InvoiceRepository;
use crate::error::{AppError, Result};
use crate::invoice::{Invoice, InvoiceUpdate};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub count: usize,
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub message: &'static str,
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub message: &'static str,
    pub rows: usize,
}

/// Create the invoices router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(list_invoices))
        .route("/invoices/", get(list_invoices))
        .route(
            "/invoices/:id",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .route("/mirror/rebuild", post(rebuild_mirror))
}

fn not_found() -> AppError {
    AppError::NotFound("Invoice not found".to_string())
}

/// List all invoices
async fn list_invoices(State(state): State<AppState>) -> Result<Json<InvoiceListResponse>> {
    let invoices = InvoiceRepository::new(state.db()).list().await?;
    Ok(Json(InvoiceListResponse {
        count: invoices.len(),
        invoices,
    }))
}

/// Get a specific invoice
async fn get_invoice(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Invoice>> {
    let invoice = InvoiceRepository::new(state.db())
        .get(id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(invoice))
}

/// Update an invoice and its spreadsheet row
async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(data): Json<InvoiceUpdate>,
) -> Result<Json<MutationResponse>> {
    let repo = InvoiceRepository::new(state.db());
    let previous = repo.get(id).await?.ok_or_else(not_found)?;
    let updated = repo.update(id, &data).await?.ok_or_else(not_found)?;

    if let Err(e) = state
        .mirror()
        .update(&updated, previous.invoice_number.as_deref())
        .await
    {
        tracing::warn!(invoice_id = id, "Failed to update spreadsheet row: {}", e);
    }

    tracing::info!(invoice_id = id, "Invoice updated");
    Ok(Json(MutationResponse {
        message: "Invoice updated successfully",
        id,
    }))
}

/// Delete an invoice and its spreadsheet row
async fn delete_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MutationResponse>> {
    let deleted = InvoiceRepository::new(state.db())
        .delete(id)
        .await?
        .ok_or_else(not_found)?;

    match state
        .mirror()
        .remove(id, deleted.invoice_number.as_deref())
        .await
    {
        Ok(true) => {}
        Ok(false) => tracing::debug!(invoice_id = id, "No spreadsheet row to remove"),
        Err(e) => tracing::warn!(invoice_id = id, "Failed to remove spreadsheet row: {}", e),
    }

    tracing::info!(invoice_id = id, "Invoice deleted");
    Ok(Json(MutationResponse {
        message: "Invoice deleted successfully",
        id,
    }))
}

/// Regenerate the spreadsheet from the database
async fn rebuild_mirror(State(state): State<AppState>) -> Result<Json<RebuildResponse>> {
    let invoices = InvoiceRepository::new(state.db()).list().await?;
    let rows = state.mirror().rebuild(&invoices).await?;

    tracing::info!(rows, "Spreadsheet rebuilt");
    Ok(Json(RebuildResponse {
        message: "Spreadsheet rebuilt from database",
        rows,
    }))
}
