//! OCR Providers
//!
//! Defines the provider trait and implementations for different OCR backends.

use std::process::Stdio;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::types::{OcrError, OcrProvider, OcrResult};

/// OCR provider trait
#[async_trait]
pub trait OcrProviderTrait: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> OcrProvider;

    /// Check if the provider is available
    async fn is_available(&self) -> bool;

    /// Perform OCR on an image
    async fn recognize(&self, image_data: &[u8], language: Option<&str>) -> Result<OcrResult, OcrError>;
}

/// Tesseract OCR provider. The image is streamed to the `tesseract` CLI over
/// stdin and the text read back from stdout.
pub struct TesseractProvider {
    binary: String,
    language: String,
}

impl TesseractProvider {
    pub fn new(default_language: &str) -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: default_language.to_string(),
        }
    }

    fn command(&self, lang: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["stdin", "stdout", "-l", lang, "--oem", "3", "--psm", "3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl OcrProviderTrait for TesseractProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Tesseract
    }

    async fn is_available(&self) -> bool {
        matches!(
            Command::new(&self.binary).arg("--version").output().await,
            Ok(output) if output.status.success()
        )
    }

    async fn recognize(&self, image_data: &[u8], language: Option<&str>) -> Result<OcrResult, OcrError> {
        let lang = language.unwrap_or(&self.language);

        let mut child = self
            .command(lang)
            .spawn()
            .map_err(|e| OcrError::ProviderNotAvailable(format!("Cannot start {}: {}", self.binary, e)))?;

        // tesseract reads all of stdin before writing anything, so feed it first
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_data)
                .await
                .map_err(|e| OcrError::ProcessingError(format!("Failed to send image: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::ProcessingError(e.to_string()))?;

        if !output.status.success() {
            return Err(OcrError::ProcessingError(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(OcrResult {
            text: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            // plain-text output has no per-word confidence
            confidence: 80.0,
            provider: OcrProvider::Tesseract,
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    images: [String; 1],
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama vision model provider
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    /// e.g. "llava", "bakllava"
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn prompt(language: Option<&str>) -> String {
        let mut prompt = String::from(
            "Transcribe every piece of text on this invoice image exactly as printed, \
             one line per printed line.",
        );
        if let Some(lang) = language {
            prompt.push_str(&format!(" The document language is {}.", lang));
        }
        prompt.push_str(" Reply with the transcription only.");
        prompt
    }
}

#[async_trait]
impl OcrProviderTrait for OllamaProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Ollama
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn recognize(&self, image_data: &[u8], language: Option<&str>) -> Result<OcrResult, OcrError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: Self::prompt(language),
            images: [BASE64.encode(image_data)],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::ApiError(format!("Ollama unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::ApiError(format!("Ollama returned {}: {}", status, body)));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OcrError::ApiError(format!("Unexpected Ollama response: {}", e)))?;

        Ok(OcrResult {
            text: generated.response.trim().to_string(),
            confidence: 75.0,
            provider: OcrProvider::Ollama,
        })
    }
}

/// Scripted provider for tests
#[cfg(test)]
pub struct MockProvider {
    pub provider: OcrProvider,
    pub text: String,
    pub available: bool,
    pub fail: bool,
}

#[cfg(test)]
impl MockProvider {
    pub fn returning(text: &str) -> Self {
        Self {
            provider: OcrProvider::Tesseract,
            text: text.to_string(),
            available: true,
            fail: false,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl OcrProviderTrait for MockProvider {
    fn provider_type(&self) -> OcrProvider {
        self.provider
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn recognize(&self, _image_data: &[u8], _language: Option<&str>) -> Result<OcrResult, OcrError> {
        if self.fail {
            return Err(OcrError::ProcessingError("mock failure".to_string()));
        }
        Ok(OcrResult {
            text: self.text.clone(),
            confidence: 90.0,
            provider: self.provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn missing_tesseract() -> TesseractProvider {
        TesseractProvider {
            binary: "tesseract-not-installed-here".to_string(),
            language: "eng".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let provider = missing_tesseract();
        assert!(!provider.is_available().await);

        let result = provider.recognize(b"png", None).await;
        assert!(matches!(result, Err(OcrError::ProviderNotAvailable(_))));
    }

    #[tokio::test]
    async fn test_ollama_generate_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "llava",
                "stream": false,
                "images": [BASE64.encode(b"png-bytes")],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "  INVOICE 881\nTotal 12.00 \n", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&format!("{}/", server.uri()), "llava");
        assert!(provider.is_available().await);

        let result = provider.recognize(b"png-bytes", Some("eng")).await.unwrap();
        assert_eq!(result.text, "INVOICE 881\nTotal 12.00");
        assert_eq!(result.provider, OcrProvider::Ollama);
    }

    #[tokio::test]
    async fn test_ollama_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'llava' not found"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&server.uri(), "llava");
        assert!(!provider.is_available().await);

        let result = provider.recognize(b"png-bytes", None).await;
        assert!(matches!(result, Err(OcrError::ApiError(msg)) if msg.contains("not found")));
    }

    #[test]
    fn test_ollama_prompt_mentions_language() {
        assert!(OllamaProvider::prompt(Some("deu")).contains("language is deu"));
        assert!(!OllamaProvider::prompt(None).contains("language"));
    }
}
