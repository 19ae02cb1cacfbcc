//! IMAP polling loop

use std::io::{Read, Write};
use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use super::{extract_attachments, MailError, ParsedMessage};
use crate::config::MailConfig;
use crate::ingest::{is_supported_attachment, IngestService};
use crate::invoice::InvoiceSource;

/// Counts from one pass over the mailbox
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub messages: usize,
    pub invoices: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Unread invoice mail from one mailbox pass
#[derive(Debug, Default)]
pub struct FetchedMail {
    pub messages: Vec<ParsedMessage>,
    /// Messages that could not be fetched, parsed or flagged; they stay unread
    pub failed: usize,
}

/// The per-message IMAP operations a pass needs
pub(crate) trait Mailbox {
    /// The full message, without setting `\Seen`
    fn peek(&mut self, seq: u32) -> Result<Option<Vec<u8>>, MailError>;

    fn mark_seen(&mut self, seq: u32) -> Result<(), MailError>;
}

impl<T: Read + Write> Mailbox for imap::Session<T> {
    fn peek(&mut self, seq: u32) -> Result<Option<Vec<u8>>, MailError> {
        let fetches = self.fetch(seq.to_string(), "BODY.PEEK[]")?;
        Ok(fetches.iter().find_map(|fetch| fetch.body()).map(<[u8]>::to_vec))
    }

    fn mark_seen(&mut self, seq: u32) -> Result<(), MailError> {
        self.store(seq.to_string(), "+FLAGS.SILENT (\\Seen)")?;
        Ok(())
    }
}

/// Peek and parse each message, flagging it `\Seen` only once it parsed.
///
/// A message that fails at any step is logged, counted and left unread so the
/// next pass retries it; the rest of the batch carries on.
pub(crate) fn collect_messages<M: Mailbox>(mailbox: &mut M, ids: &[u32]) -> FetchedMail {
    let mut fetched = FetchedMail::default();

    for &seq in ids {
        let parsed = mailbox
            .peek(seq)
            .and_then(|raw| match raw {
                Some(raw) => extract_attachments(&raw).map(Some),
                None => Ok(None),
            })
            .and_then(|message| {
                if message.is_some() {
                    mailbox.mark_seen(seq)?;
                }
                Ok(message)
            });

        match parsed {
            Ok(Some(message)) => fetched.messages.push(message),
            Ok(None) => tracing::debug!(seq, "Message has no body, skipping"),
            Err(e) => {
                fetched.failed += 1;
                tracing::warn!(seq, "Leaving message unread: {}", e);
            }
        }
    }

    fetched
}

/// Fetch every unread message matching the subject filter.
///
/// This blocks; call it from the blocking pool.
pub fn fetch_unseen(config: &MailConfig) -> Result<FetchedMail, MailError> {
    let (user, password) = match (&config.user, &config.password) {
        (Some(user), Some(password)) => (user, password),
        _ => {
            return Err(MailError::NotConfigured(
                "EMAIL_USER and EMAIL_PASS must be set".to_string(),
            ))
        }
    };

    let tls = native_tls::TlsConnector::builder().build()?;
    let client = imap::connect((config.server.as_str(), config.port), &config.server, &tls)?;
    let mut session = client.login(user, password).map_err(|(e, _client)| e)?;

    session.select(&config.mailbox)?;

    let mut ids: Vec<u32> = session.search(config.search_query())?.into_iter().collect();
    ids.sort_unstable();

    let fetched = collect_messages(&mut session, &ids);

    if let Err(e) = session.logout() {
        tracing::debug!("IMAP logout failed: {}", e);
    }

    Ok(fetched)
}

/// Periodically checks the mailbox and ingests invoice attachments
pub struct MailPoller {
    config: MailConfig,
    ingest: Arc<IngestService>,
}

impl MailPoller {
    pub fn new(config: MailConfig, ingest: Arc<IngestService>) -> Self {
        Self { config, ingest }
    }

    /// One pass: fetch unread invoice mail and ingest every attachment
    pub async fn check_once(&self) -> Result<PollSummary, MailError> {
        let config = self.config.clone();
        let fetched = tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| MailError::Join(e.to_string()))??;

        let mut summary = PollSummary {
            failed: fetched.failed,
            ..Default::default()
        };

        for message in fetched.messages {
            self.process_message(message, &mut summary).await;
        }

        Ok(summary)
    }

    pub(crate) async fn process_message(&self, message: ParsedMessage, summary: &mut PollSummary) {
        summary.messages += 1;
        tracing::info!(subject = %message.subject, attachments = message.attachments.len(), "Processing email");

        for attachment in message.attachments {
            if !is_supported_attachment(&attachment.file_name) {
                summary.skipped += 1;
                tracing::debug!(file_name = %attachment.file_name, "Skipping unsupported attachment");
                continue;
            }

            match self
                .ingest
                .ingest(&attachment.file_name, attachment.data, InvoiceSource::Email)
                .await
            {
                Ok(invoices) => summary.invoices += invoices.len(),
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(file_name = %attachment.file_name, "Error processing attachment: {}", e);
                }
            }
        }
    }

    /// Start the polling loop; the first pass runs immediately
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                server = %self.config.server,
                mailbox = %self.config.mailbox,
                every_secs = self.config.poll_interval().as_secs(),
                "Mail poller started"
            );

            loop {
                interval.tick().await;
                match self.check_once().await {
                    Ok(summary) if summary.messages > 0 => {
                        tracing::info!(
                            messages = summary.messages,
                            invoices = summary.invoices,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "Mail check complete"
                        );
                    }
                    Ok(_) => tracing::debug!("No new invoice mail"),
                    Err(e) => tracing::error!("Error checking email: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::Config;
    use crate::db::{initialize_schema, InvoiceRepository};
    use crate::extract::MockExtractor;
    use crate::mail::parser::sample_message;
    use crate::ocr::{test_png, MockProvider, OcrService, OcrServiceConfig};
    use crate::pdf::PdfRasterizer;
    use crate::spreadsheet::SpreadsheetMirror;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    /// In-memory mailbox: `None` bodies fail to fetch, `refuse_flags` fail to flag
    #[derive(Default)]
    struct FakeMailbox {
        bodies: HashMap<u32, Option<Vec<u8>>>,
        refuse_flags: Vec<u32>,
        seen: Vec<u32>,
    }

    impl Mailbox for FakeMailbox {
        fn peek(&mut self, seq: u32) -> Result<Option<Vec<u8>>, MailError> {
            match self.bodies.get(&seq) {
                Some(Some(body)) => Ok(Some(body.clone())),
                Some(None) => Err(MailError::Imap(imap::error::Error::Bad("connection reset".to_string()))),
                None => Ok(None),
            }
        }

        fn mark_seen(&mut self, seq: u32) -> Result<(), MailError> {
            if self.refuse_flags.contains(&seq) {
                return Err(MailError::Imap(imap::error::Error::No("read-only mailbox".to_string())));
            }
            self.seen.push(seq);
            Ok(())
        }
    }

    fn plain_mail(subject: &str) -> Vec<u8> {
        format!("Subject: {subject}\r\n\r\nSee attached.\r\n").into_bytes()
    }

    #[test]
    fn test_failed_message_does_not_drop_batch() {
        let mut mailbox = FakeMailbox {
            bodies: HashMap::from([
                (3, Some(plain_mail("invoice 3"))),
                (7, None),
                (9, Some(plain_mail("invoice 9"))),
                (11, Some(plain_mail("invoice 11"))),
            ]),
            refuse_flags: vec![11],
            ..Default::default()
        };

        let fetched = collect_messages(&mut mailbox, &[3, 7, 9, 11]);

        let subjects: Vec<_> = fetched.messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["invoice 3", "invoice 9"]);
        assert_eq!(fetched.failed, 2);
        assert_eq!(mailbox.seen, vec![3, 9]);
    }

    #[test]
    fn test_fetch_requires_credentials() {
        let config = Config::default().mail;
        assert!(matches!(fetch_unseen(&config), Err(MailError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_process_message_ingests_supported_attachments() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let ingest = IngestService::new(
            pool.clone(),
            OcrService::with_providers(
                OcrServiceConfig::default(),
                vec![Arc::new(MockProvider::returning("INVOICE 12"))],
            ),
            Arc::new(MockExtractor {
                reply: r#"{"client_name": "Umbrella", "invoice_number": "12", "total": 40}"#.to_string(),
            }),
            PdfRasterizer::new(2.0, 5),
            Arc::new(SpreadsheetMirror::new(dir.path().join("invoices.xlsx"))),
        );
        let poller = MailPoller::new(Config::default().mail, Arc::new(ingest));

        let message = extract_attachments(&sample_message(&test_png())).unwrap();
        let mut summary = PollSummary::default();
        poller.process_message(message, &mut summary).await;

        assert_eq!(
            summary,
            PollSummary {
                messages: 1,
                invoices: 1,
                skipped: 1,
                failed: 0,
            }
        );

        let stored = InvoiceRepository::new(&pool).list().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, "email");
        assert_eq!(stored[0].client_name.as_deref(), Some("Umbrella"));
    }
}
