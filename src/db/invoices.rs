//! Invoice database operations

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::invoice::{format_date, ExtractedInvoice, Invoice, InvoiceSource, InvoiceUpdate, DEFAULT_STATUS};

const INVOICE_COLUMNS: &str = "id, client_name, invoice_number, invoice_date, due_date, \
     subtotal, tax, total, status, source, source_file, created_at";

/// Invoice repository
pub struct InvoiceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> InvoiceRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a specific invoice
    pub async fn get(&self, id: i64) -> Result<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(invoice)
    }

    /// List every invoice in insertion order
    pub async fn list(&self) -> Result<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY id ASC"
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(invoices)
    }

    /// Store freshly extracted fields as a new unpaid invoice
    pub async fn insert(
        &self,
        data: &ExtractedInvoice,
        source: InvoiceSource,
        source_file: Option<&str>,
    ) -> Result<Invoice> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO invoices (client_name, invoice_number, invoice_date, due_date,
                                  subtotal, tax, total, status, source, source_file, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&data.client_name)
        .bind(&data.invoice_number)
        .bind(&data.invoice_date)
        .bind(&data.due_date)
        .bind(data.subtotal)
        .bind(data.tax)
        .bind(data.total)
        .bind(DEFAULT_STATUS)
        .bind(source.as_str())
        .bind(source_file)
        .bind(&now)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created invoice".to_string()))
    }

    /// Replace the editable fields of an invoice.
    ///
    /// Dates are normalized the same way as on ingest. Returns `None` when
    /// no invoice has that id.
    pub async fn update(&self, id: i64, data: &InvoiceUpdate) -> Result<Option<Invoice>> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET client_name = ?, invoice_number = ?, invoice_date = ?, due_date = ?,
                subtotal = ?, tax = ?, total = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(&data.client_name)
        .bind(&data.invoice_number)
        .bind(format_date(&data.invoice_date))
        .bind(format_date(&data.due_date))
        .bind(data.subtotal)
        .bind(data.tax)
        .bind(data.total)
        .bind(&data.status)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get(id).await
    }

    /// Delete an invoice, returning the row that was removed
    pub async fn delete(&self, id: i64) -> Result<Option<Invoice>> {
        let Some(existing) = self.get(id).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM invoices WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(Some(existing))
    }

    /// Count stored invoices
    pub async fn count(&self) -> Result<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM invoices")
            .fetch_one(self.pool)
            .await?;

        Ok(result.0)
    }
}
