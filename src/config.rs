//! Configuration management for the Invoice Intake Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::ocr::OcrProvider;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub spreadsheet: SpreadsheetConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub tracker_html: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpreadsheetConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub providers: Vec<OcrProvider>,
    pub language: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub pdf_max_pages: usize,
    pub pdf_render_scale: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub mailbox: String,
    pub subject_filter: String,
    pub poll_interval_secs: u64,
}

impl MailConfig {
    /// The poller only runs when credentials are present
    pub fn is_enabled(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// IMAP SEARCH criteria for unread invoice mail
    pub fn search_query(&self) -> String {
        format!("UNSEEN SUBJECT \"{}\"", self.subject_filter.replace('"', ""))
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                max_upload_bytes: 25 * 1024 * 1024,
                tracker_html: PathBuf::from("tracker.html"),
            },
            database: DatabaseConfig {
                url: "sqlite:./invoices.db".to_string(),
            },
            spreadsheet: SpreadsheetConfig {
                path: PathBuf::from("invoices.xlsx"),
            },
            ocr: OcrConfig {
                providers: vec![OcrProvider::Tesseract, OcrProvider::Ollama],
                language: "eng".to_string(),
                ollama_url: "http://localhost:11434".to_string(),
                ollama_model: "llava".to_string(),
                pdf_max_pages: 20,
                pdf_render_scale: 2.0,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.groq.com/openai/v1".to_string(),
                model: "llama-3.3-70b-versatile".to_string(),
                timeout_secs: 60,
            },
            mail: MailConfig {
                server: "imap.gmail.com".to_string(),
                port: 993,
                user: None,
                password: None,
                mailbox: "INBOX".to_string(),
                subject_filter: "invoice".to_string(),
                poll_interval_secs: 60,
            },
        }
    }
}

impl Config {
    /// Load from the process environment; unset or unparseable variables
    /// keep their defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from any variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let text = |name: &str, default: String| lookup(name).unwrap_or(default);
        let path = |name: &str, default: PathBuf| lookup(name).map(PathBuf::from).unwrap_or(default);
        let secret = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Config {
            server: ServerConfig {
                host: text("SERVER_HOST", defaults.server.host),
                port: parse_var(&lookup, "SERVER_PORT", defaults.server.port),
                max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES", defaults.server.max_upload_bytes),
                tracker_html: path("TRACKER_HTML", defaults.server.tracker_html),
            },
            database: DatabaseConfig {
                url: text("DATABASE_URL", defaults.database.url),
            },
            spreadsheet: SpreadsheetConfig {
                path: path("EXCEL_FILE", defaults.spreadsheet.path),
            },
            ocr: OcrConfig {
                providers: lookup("OCR_PROVIDERS")
                    .map(|v| parse_providers(&v))
                    .unwrap_or(defaults.ocr.providers),
                language: text("OCR_LANGUAGE", defaults.ocr.language),
                ollama_url: text("OLLAMA_URL", defaults.ocr.ollama_url),
                ollama_model: text("OLLAMA_MODEL", defaults.ocr.ollama_model),
                pdf_max_pages: parse_var(&lookup, "PDF_MAX_PAGES", defaults.ocr.pdf_max_pages),
                pdf_render_scale: parse_var(&lookup, "PDF_RENDER_SCALE", defaults.ocr.pdf_render_scale),
            },
            llm: LlmConfig {
                api_key: secret("GROQ_API_KEY"),
                base_url: text("LLM_BASE_URL", defaults.llm.base_url),
                model: text("LLM_MODEL", defaults.llm.model),
                timeout_secs: parse_var(&lookup, "LLM_TIMEOUT_SECS", defaults.llm.timeout_secs),
            },
            mail: MailConfig {
                server: text("IMAP_SERVER", defaults.mail.server),
                port: parse_var(&lookup, "IMAP_PORT", defaults.mail.port),
                user: secret("EMAIL_USER"),
                password: secret("EMAIL_PASS"),
                mailbox: text("IMAP_MAILBOX", defaults.mail.mailbox),
                subject_filter: text("MAIL_SUBJECT_FILTER", defaults.mail.subject_filter),
                poll_interval_secs: parse_var(&lookup, "MAIL_POLL_SECS", defaults.mail.poll_interval_secs),
            },
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", name, raw);
            default
        }),
        None => default,
    }
}

/// Parse a comma separated provider list, ignoring unknown names
pub fn parse_providers(value: &str) -> Vec<OcrProvider> {
    value
        .split(',')
        .filter_map(|name| match name.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Some(OcrProvider::Tesseract),
            "ollama" => Some(OcrProvider::Ollama),
            _ => None,
        })
        .collect()
}
