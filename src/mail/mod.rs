//! Mail Module
//!
//! Polls an IMAP mailbox for unread invoice mail and feeds every attachment
//! into the ingest pipeline.

mod parser;
mod poller;

pub use parser::{extract_attachments, Attachment, ParsedMessage};
pub use poller::{fetch_unseen, FetchedMail, MailPoller, PollSummary};

use thiserror::Error;

/// Mail errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail polling not configured: {0}")]
    NotConfigured(String),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("IMAP error: {0}")]
    Imap(#[from] imap::error::Error),

    #[error("Failed to parse message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    #[error("Task join error: {0}")]
    Join(String),
}
