//! Upload Routes
//!
//! Endpoints:
//! - POST /upload-invoice/ - OCR, extract and store an invoice image or PDF

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::invoice::{Invoice, InvoiceSource};
use crate::state::AppState;

const FILE_FIELDS: [&str; 2] = ["file", "invoice"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub data: UploadData,
}

/// A single invoice for images; one per page for multi-page PDFs
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UploadData {
    Single(Invoice),
    Pages(Vec<Invoice>),
}

impl From<Vec<Invoice>> for UploadData {
    fn from(mut invoices: Vec<Invoice>) -> Self {
        if invoices.len() == 1 {
            UploadData::Single(invoices.remove(0))
        } else {
            UploadData::Pages(invoices)
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-invoice/", post(upload_invoice))
        .route("/upload-invoice", post(upload_invoice))
}

/// Upload an invoice image or PDF
async fn upload_invoice(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if !FILE_FIELDS.contains(&name.as_str()) {
            tracing::debug!("Ignoring multipart field '{}'", name);
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload".to_string());

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file data: {}", e)))?;

        if data.is_empty() {
            return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
        }

        let invoices = state
            .ingest()
            .ingest(&file_name, data.to_vec(), InvoiceSource::Upload)
            .await?;

        return Ok(Json(UploadResponse {
            message: "Invoice processed and saved successfully!",
            data: invoices.into(),
        }));
    }

    Err(AppError::BadRequest(
        "No file provided. Use field name 'file'".to_string(),
    ))
}
