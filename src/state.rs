//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::ingest::IngestService;
use crate::spreadsheet::SpreadsheetMirror;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    ingest: Arc<IngestService>,
    mirror: Arc<SpreadsheetMirror>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: SqlitePool,
        ingest: Arc<IngestService>,
        mirror: Arc<SpreadsheetMirror>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                ingest,
                mirror,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the ingest pipeline
    pub fn ingest(&self) -> &IngestService {
        &self.inner.ingest
    }

    /// Get the spreadsheet mirror
    pub fn mirror(&self) -> &SpreadsheetMirror {
        &self.inner.mirror
    }
}
