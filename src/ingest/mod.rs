//! Ingest pipeline
//!
//! One attachment or upload in, zero or more stored invoices out:
//! rasterize (PDF only) → OCR → field extraction → database → spreadsheet.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::db::InvoiceRepository;
use crate::error::{AppError, Result};
use crate::extract::FieldExtractor;
use crate::invoice::{Invoice, InvoiceSource};
use crate::ocr::OcrService;
use crate::pdf::{is_pdf, PdfRasterizer};
use crate::spreadsheet::SpreadsheetMirror;

/// Whether a file name looks like something the pipeline can read
pub fn is_supported_attachment(file_name: &str) -> bool {
    if file_name.to_ascii_lowercase().ends_with(".pdf") {
        return true;
    }
    mime_guess::from_path(file_name)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// Runs uploads and attachments through OCR and extraction into storage
pub struct IngestService {
    db: SqlitePool,
    ocr: OcrService,
    extractor: Arc<dyn FieldExtractor>,
    rasterizer: PdfRasterizer,
    mirror: Arc<SpreadsheetMirror>,
}

impl IngestService {
    pub fn new(
        db: SqlitePool,
        ocr: OcrService,
        extractor: Arc<dyn FieldExtractor>,
        rasterizer: PdfRasterizer,
        mirror: Arc<SpreadsheetMirror>,
    ) -> Self {
        Self {
            db,
            ocr,
            extractor,
            rasterizer,
            mirror,
        }
    }

    pub fn ocr(&self) -> &OcrService {
        &self.ocr
    }

    /// Process one file. PDFs yield one invoice per page.
    ///
    /// Pages are independent: a page that fails is logged and skipped, and
    /// the invoices from the other pages are still returned. The call only
    /// fails when no page produced an invoice.
    pub async fn ingest(
        &self,
        file_name: &str,
        data: Vec<u8>,
        source: InvoiceSource,
    ) -> Result<Vec<Invoice>> {
        tracing::info!(
            file_name = %file_name,
            bytes = data.len(),
            source = source.as_str(),
            "Ingesting invoice"
        );

        let images: Vec<(String, Vec<u8>)> = if is_pdf(file_name, &data) {
            self.rasterizer
                .rasterize(data)
                .await?
                .into_iter()
                .map(|page| (format!("{}#page={}", file_name, page.page), page.data))
                .collect()
        } else {
            vec![(file_name.to_string(), data)]
        };

        let page_count = images.len();
        let mut invoices = Vec::with_capacity(page_count);
        let mut last_error = None;

        for (source_file, image) in images {
            match self.ingest_image(&image, source, &source_file).await {
                Ok(invoice) => invoices.push(invoice),
                Err(e) => {
                    tracing::warn!(source_file = %source_file, "Skipping page: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if invoices.is_empty() => Err(e),
            _ => {
                if invoices.len() < page_count {
                    tracing::info!(
                        file_name = %file_name,
                        stored = invoices.len(),
                        pages = page_count,
                        "Stored invoices from some pages"
                    );
                }
                Ok(invoices)
            }
        }
    }

    async fn ingest_image(
        &self,
        image: &[u8],
        source: InvoiceSource,
        source_file: &str,
    ) -> Result<Invoice> {
        let ocr = self.ocr.recognize_image(image).await?;
        if ocr.is_blank() {
            return Err(AppError::BadRequest(format!(
                "No text recognized in {}",
                source_file
            )));
        }

        let extracted = self
            .extractor
            .extract(&ocr.text)
            .await?
            .with_normalized_dates();

        let repo = InvoiceRepository::new(&self.db);
        let invoice = repo.insert(&extracted, source, Some(source_file)).await?;

        // The database row is authoritative; a stale mirror is repaired by a rebuild
        if let Err(e) = self.mirror.append(&invoice).await {
            tracing::warn!(invoice_id = invoice.id, "Failed to append invoice to spreadsheet: {}", e);
        }

        tracing::info!(
            invoice_id = invoice.id,
            invoice_number = ?invoice.invoice_number,
            ocr_provider = ?ocr.provider,
            "Invoice stored"
        );

        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::db::initialize_schema;
    use crate::extract::{ExtractionError, MockExtractor, UnconfiguredExtractor};
    use crate::ocr::{test_png, MockProvider, OcrError, OcrProvider, OcrProviderTrait, OcrResult, OcrServiceConfig};
    use crate::pdf::blank_pdf;

    const REPLY: &str = r#"```json
{"client_name": "Initech", "invoice_number": "4471", "invoice_date": "02/01/2024",
 "due_date": "2024-02-01", "subtotal": "1,000.00", "tax": 50, "total": 1050}
```"#;

    /// Hands out one scripted OCR text per call, in order
    struct ScriptedOcr {
        texts: Mutex<VecDeque<String>>,
    }

    impl ScriptedOcr {
        fn new(texts: &[&str]) -> Self {
            Self {
                texts: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl OcrProviderTrait for ScriptedOcr {
        fn provider_type(&self) -> OcrProvider {
            OcrProvider::Tesseract
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn recognize(&self, _image_data: &[u8], _language: Option<&str>) -> std::result::Result<OcrResult, OcrError> {
            let text = self.texts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(OcrResult {
                text,
                confidence: 90.0,
                provider: OcrProvider::Tesseract,
            })
        }
    }

    async fn service_with(
        ocr: Arc<dyn OcrProviderTrait>,
        extractor: Arc<dyn FieldExtractor>,
        dir: &TempDir,
    ) -> (IngestService, SqlitePool) {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let mirror = Arc::new(SpreadsheetMirror::new(dir.path().join("invoices.xlsx")));
        let service = IngestService::new(
            pool.clone(),
            OcrService::with_providers(OcrServiceConfig::default(), vec![ocr]),
            extractor,
            PdfRasterizer::new(1.0, 5),
            mirror,
        );
        (service, pool)
    }

    async fn service(ocr_text: &str, reply: &str, dir: &TempDir) -> (IngestService, SqlitePool) {
        service_with(
            Arc::new(MockProvider::returning(ocr_text)),
            Arc::new(MockExtractor {
                reply: reply.to_string(),
            }),
            dir,
        )
        .await
    }

    #[test]
    fn test_supported_attachments() {
        assert!(is_supported_attachment("scan.JPG"));
        assert!(is_supported_attachment("invoice.pdf"));
        assert!(is_supported_attachment("photo.png"));
        assert!(!is_supported_attachment("terms.docx"));
        assert!(!is_supported_attachment("noextension"));
    }

    #[tokio::test]
    async fn test_ingest_image_stores_and_mirrors() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service("INVOICE 4471 Initech", REPLY, &dir).await;

        let invoices = service
            .ingest("scan.png", test_png(), InvoiceSource::Upload)
            .await
            .unwrap();

        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.client_name.as_deref(), Some("Initech"));
        assert_eq!(invoice.invoice_date.as_deref(), Some("2024-01-02"));
        assert_eq!(invoice.subtotal, Some(1000.0));
        assert_eq!(invoice.status, "Unpaid");
        assert_eq!(invoice.source_file.as_deref(), Some("scan.png"));

        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 1);

        let mirror = SpreadsheetMirror::new(dir.path().join("invoices.xlsx"));
        let rows = mirror.rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, Some(invoice.id));
    }

    #[tokio::test]
    async fn test_blank_ocr_text_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service("   \n", REPLY, &dir).await;

        let result = service
            .ingest("blank.png", test_png(), InvoiceSource::Email)
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_model_reply_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service("INVOICE", "I could not find an invoice.", &dir).await;

        let result = service
            .ingest("scan.png", test_png(), InvoiceSource::Upload)
            .await;

        assert!(matches!(result, Err(AppError::Extraction(_))));
        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_image_upload() {
        let dir = TempDir::new().unwrap();
        let (service, _pool) = service("INVOICE", REPLY, &dir).await;

        let result = service
            .ingest("notes.txt", b"plain text".to_vec(), InvoiceSource::Upload)
            .await;

        assert!(matches!(result, Err(AppError::Ocr(_))));
    }

    #[tokio::test]
    async fn test_pdf_pages_become_separate_invoices() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service("INVOICE 4471 Initech", REPLY, &dir).await;

        let invoices = service
            .ingest("statement.pdf", blank_pdf(2), InvoiceSource::Upload)
            .await
            .unwrap();

        let files: Vec<_> = invoices.iter().map(|i| i.source_file.clone().unwrap()).collect();
        assert_eq!(files, vec!["statement.pdf#page=1", "statement.pdf#page=2"]);
        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_page_keeps_other_pages() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service_with(
            Arc::new(ScriptedOcr::new(&["INVOICE A", "   ", "INVOICE C"])),
            Arc::new(MockExtractor {
                reply: REPLY.to_string(),
            }),
            &dir,
        )
        .await;

        let invoices = service
            .ingest("batch.pdf", blank_pdf(3), InvoiceSource::Email)
            .await
            .unwrap();

        let files: Vec<_> = invoices.iter().map(|i| i.source_file.clone().unwrap()).collect();
        assert_eq!(files, vec!["batch.pdf#page=1", "batch.pdf#page=3"]);
        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_every_page_failing_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service_with(
            Arc::new(ScriptedOcr::new(&["", ""])),
            Arc::new(MockExtractor {
                reply: REPLY.to_string(),
            }),
            &dir,
        )
        .await;

        let result = service
            .ingest("blank.pdf", blank_pdf(2), InvoiceSource::Upload)
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_answers_503() {
        let dir = TempDir::new().unwrap();
        let (service, pool) = service_with(
            Arc::new(MockProvider::returning("INVOICE 1")),
            Arc::new(UnconfiguredExtractor::new("GROQ_API_KEY is not set")),
            &dir,
        )
        .await;

        let err = service
            .ingest("scan.png", test_png(), InvoiceSource::Upload)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Extraction(ExtractionError::NotConfigured(_))));
        assert_eq!(
            axum::response::IntoResponse::into_response(err).status(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(InvoiceRepository::new(&pool).count().await.unwrap(), 0);
    }
}
