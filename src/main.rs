//! Invoice Intake Server
//!
//! Accepts invoice images and PDFs over HTTP or email, extracts their fields,
//! and keeps them in SQLite plus a spreadsheet mirror.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoice_intake_server::config::Config;
use invoice_intake_server::db::{self, InvoiceRepository};
use invoice_intake_server::extract::extractor_from_config;
use invoice_intake_server::ingest::IngestService;
use invoice_intake_server::mail::MailPoller;
use invoice_intake_server::ocr::{OcrService, OcrServiceConfig};
use invoice_intake_server::pdf::PdfRasterizer;
use invoice_intake_server::routes;
use invoice_intake_server::spreadsheet::SpreadsheetMirror;
use invoice_intake_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "invoice_intake_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    tracing::info!("Starting Invoice Intake Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    // Bring the spreadsheet in line with the database
    let mirror = Arc::new(SpreadsheetMirror::new(config.spreadsheet.path.clone()));
    mirror.ensure().await.context("Failed to create spreadsheet")?;
    let invoices = InvoiceRepository::new(&db_pool).list().await?;
    match mirror.rebuild(&invoices).await {
        Ok(rows) => tracing::info!("Spreadsheet {} synced with {} invoices", mirror.path().display(), rows),
        Err(e) => tracing::warn!("Spreadsheet sync failed: {}. Retry with POST /mirror/rebuild", e),
    }

    // OCR and extraction
    let ocr = OcrService::new(OcrServiceConfig::from(&config.ocr));
    let available = ocr.available_providers().await;
    if available.is_empty() {
        tracing::warn!("No OCR providers available; uploads will fail until one is");
    } else {
        tracing::info!("OCR providers available: {:?}", available);
    }

    let extractor = extractor_from_config(&config.llm);
    if config.llm.api_key.is_some() {
        tracing::info!("Field extraction via {} ({})", config.llm.base_url, config.llm.model);
    }

    let ingest = Arc::new(IngestService::new(
        db_pool.clone(),
        ocr,
        extractor,
        PdfRasterizer::new(config.ocr.pdf_render_scale, config.ocr.pdf_max_pages),
        mirror.clone(),
    ));

    // Mail poller
    let poller = if config.mail.is_enabled() {
        Some(MailPoller::new(config.mail.clone(), ingest.clone()).start())
    } else {
        tracing::info!("EMAIL_USER/EMAIL_PASS not set, mail polling disabled");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;

    let app = routes::app(AppState::new(config, db_pool, ingest, mirror));

    // Start server with graceful shutdown
    tracing::info!("Invoice Intake Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = poller {
        handle.abort();
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
