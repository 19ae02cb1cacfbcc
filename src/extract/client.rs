//! Chat-completion client for field extraction

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prompt::{build_prompt, parse_model_output};
use crate::config::LlmConfig;
use crate::invoice::ExtractedInvoice;

/// Field extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extraction not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model API error: {0}")]
    Api(String),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Model did not return valid JSON. Response: {0}")]
    InvalidJson(String),
}

impl ExtractionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidJson(_) | Self::EmptyResponse => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Network(_) | Self::Api(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Extracts structured invoice fields from OCR text
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, invoice_text: &str) -> Result<ExtractedInvoice, ExtractionError>;
}

/// OpenAI-compatible chat completion extractor
pub struct ChatCompletionExtractor {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionExtractor {
    pub fn new(config: &LlmConfig) -> Result<Self, ExtractionError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ExtractionError::NotConfigured("GROQ_API_KEY is not set".to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    async fn complete(&self, prompt: String) -> Result<String, ExtractionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api(format!("{} returned {}: {}", url, status, body)));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Api(format!("Failed to parse response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ExtractionError::EmptyResponse)
    }
}

#[async_trait]
impl FieldExtractor for ChatCompletionExtractor {
    async fn extract(&self, invoice_text: &str) -> Result<ExtractedInvoice, ExtractionError> {
        let reply = self.complete(build_prompt(invoice_text)).await?;
        tracing::debug!(model = %self.model, chars = reply.len(), "Model reply received");
        parse_model_output(&reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Used when no API key is configured: every extraction reports
/// `NotConfigured`, which the API surfaces as 503
pub struct UnconfiguredExtractor {
    reason: String,
}

impl UnconfiguredExtractor {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl FieldExtractor for UnconfiguredExtractor {
    async fn extract(&self, _invoice_text: &str) -> Result<ExtractedInvoice, ExtractionError> {
        Err(ExtractionError::NotConfigured(self.reason.clone()))
    }
}

/// The chat-completion extractor when configured, otherwise a stand-in that
/// keeps the server up and fails each extraction
pub fn extractor_from_config(config: &LlmConfig) -> Arc<dyn FieldExtractor> {
    match ChatCompletionExtractor::new(config) {
        Ok(extractor) => Arc::new(extractor),
        Err(e) => {
            tracing::warn!("Field extraction disabled: {}", e);
            Arc::new(UnconfiguredExtractor::new(e.to_string()))
        }
    }
}

/// Mock extractor for testing; parses a canned model reply
#[cfg(test)]
pub struct MockExtractor {
    pub reply: String,
}

#[cfg(test)]
#[async_trait]
impl FieldExtractor for MockExtractor {
    async fn extract(&self, _invoice_text: &str) -> Result<ExtractedInvoice, ExtractionError> {
        parse_model_output(&self.reply)
    }
}
