//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_name TEXT,
    invoice_number TEXT,
    -- YYYY-MM-DD
    invoice_date TEXT,
    due_date TEXT,
    subtotal REAL,
    tax REAL,
    total REAL,
    status TEXT NOT NULL DEFAULT 'Unpaid',
    -- 'upload' or 'email'
    source TEXT NOT NULL DEFAULT 'upload',
    source_file TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_invoices_number ON invoices(invoice_number);
CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status);
"#;
