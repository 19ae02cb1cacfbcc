//! OCR Service
//!
//! Orchestrates OCR providers and normalizes incoming images.

use std::io::Cursor;
use std::sync::Arc;

use super::{
    provider::{OcrProviderTrait, OllamaProvider, TesseractProvider},
    types::{OcrError, OcrProvider, OcrResult},
};
use crate::config::OcrConfig;

/// OCR service configuration
pub struct OcrServiceConfig {
    /// Preferred provider order
    pub providers: Vec<OcrProvider>,
    /// Ollama base URL
    pub ollama_url: String,
    /// Ollama model name
    pub ollama_model: String,
    /// Default OCR language
    pub default_language: String,
}

impl Default for OcrServiceConfig {
    fn default() -> Self {
        Self {
            providers: vec![OcrProvider::Tesseract, OcrProvider::Ollama],
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llava".to_string(),
            default_language: "eng".to_string(),
        }
    }
}

impl From<&OcrConfig> for OcrServiceConfig {
    fn from(config: &OcrConfig) -> Self {
        Self {
            providers: config.providers.clone(),
            ollama_url: config.ollama_url.clone(),
            ollama_model: config.ollama_model.clone(),
            default_language: config.language.clone(),
        }
    }
}

/// OCR service for invoice images
pub struct OcrService {
    config: OcrServiceConfig,
    providers: Vec<Arc<dyn OcrProviderTrait>>,
}

impl OcrService {
    /// Create a new OCR service with providers in configured order
    pub fn new(config: OcrServiceConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|provider| -> Arc<dyn OcrProviderTrait> {
                match provider {
                    OcrProvider::Tesseract => {
                        Arc::new(TesseractProvider::new(&config.default_language))
                    }
                    OcrProvider::Ollama => {
                        Arc::new(OllamaProvider::new(&config.ollama_url, &config.ollama_model))
                    }
                }
            })
            .collect();

        Self { config, providers }
    }

    /// Create a service over an explicit provider list
    pub fn with_providers(config: OcrServiceConfig, providers: Vec<Arc<dyn OcrProviderTrait>>) -> Self {
        Self { config, providers }
    }

    /// Get available providers
    pub async fn available_providers(&self) -> Vec<OcrProvider> {
        let mut available = Vec::new();
        for provider in &self.providers {
            if provider.is_available().await {
                available.push(provider.provider_type());
            }
        }
        available
    }

    /// Decode an uploaded image and OCR it with the first provider that works
    pub async fn recognize_image(&self, image_data: &[u8]) -> Result<OcrResult, OcrError> {
        let png = normalize_image(image_data)?;
        self.recognize(&png, None, None).await
    }

    /// OCR an already-normalized image.
    ///
    /// With a preferred provider only that one is tried. Otherwise providers
    /// run in configured order until one succeeds; failures are logged and
    /// the last one is reported if none work.
    pub async fn recognize(
        &self,
        image_data: &[u8],
        preferred_provider: Option<OcrProvider>,
        language: Option<&str>,
    ) -> Result<OcrResult, OcrError> {
        let lang = Some(language.unwrap_or(&self.config.default_language));

        if let Some(preferred) = preferred_provider {
            let provider = self
                .providers
                .iter()
                .find(|p| p.provider_type() == preferred)
                .ok_or_else(|| {
                    OcrError::ProviderNotAvailable(format!("{:?} is not configured", preferred))
                })?;
            if !provider.is_available().await {
                return Err(OcrError::ProviderNotAvailable(format!(
                    "{:?} is not reachable",
                    preferred
                )));
            }
            return provider.recognize(image_data, lang).await;
        }

        let mut last_error = None;
        for provider in &self.providers {
            let kind = provider.provider_type();
            if !provider.is_available().await {
                tracing::debug!(provider = ?kind, "OCR provider unavailable, skipping");
                continue;
            }

            match provider.recognize(image_data, lang).await {
                Ok(result) => {
                    tracing::debug!(provider = ?kind, chars = result.text.len(), "OCR complete");
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(provider = ?kind, "OCR failed, trying next provider: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OcrError::ProviderNotAvailable("No OCR providers available".to_string())
        }))
    }
}

/// Decode any supported image format and re-encode it as PNG
fn normalize_image(image_data: &[u8]) -> Result<Vec<u8>, OcrError> {
    let img = image::load_from_memory(image_data)
        .map_err(|e| OcrError::InvalidImage(e.to_string()))?;

    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .map_err(|e| OcrError::ProcessingError(format!("Failed to encode image: {}", e)))?;

    Ok(buffer)
}

#[cfg(test)]
pub(crate) fn test_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::MockProvider;

    #[test]
    fn test_ocr_service_creation() {
        let service = OcrService::new(OcrServiceConfig::default());
        assert_eq!(service.providers.len(), 2);

        let service = OcrService::new(OcrServiceConfig {
            providers: vec![OcrProvider::Ollama],
            ..Default::default()
        });
        assert_eq!(service.providers[0].provider_type(), OcrProvider::Ollama);
    }

    #[tokio::test]
    async fn test_rejects_non_image_bytes() {
        let service = OcrService::with_providers(
            OcrServiceConfig::default(),
            vec![Arc::new(MockProvider::returning("text"))],
        );

        let result = service.recognize_image(b"definitely not an image").await;
        assert!(matches!(result, Err(OcrError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_provider() {
        let failing = MockProvider {
            fail: true,
            ..MockProvider::returning("")
        };
        let unavailable = MockProvider {
            available: false,
            ..MockProvider::returning("never used")
        };
        let working = MockProvider {
            provider: OcrProvider::Ollama,
            ..MockProvider::returning("INVOICE #42")
        };

        let service = OcrService::with_providers(
            OcrServiceConfig::default(),
            vec![Arc::new(failing), Arc::new(unavailable), Arc::new(working)],
        );

        let result = service.recognize_image(&test_png()).await.unwrap();
        assert_eq!(result.text, "INVOICE #42");
        assert_eq!(result.provider, OcrProvider::Ollama);
    }

    #[tokio::test]
    async fn test_no_providers_available() {
        let service = OcrService::with_providers(
            OcrServiceConfig::default(),
            vec![Arc::new(MockProvider {
                available: false,
                ..MockProvider::returning("x")
            })],
        );

        let result = service.recognize(&test_png(), None, None).await;
        assert!(matches!(result, Err(OcrError::ProviderNotAvailable(_))));
        assert!(service.available_providers().await.is_empty());
    }

    #[tokio::test]
    async fn test_reports_last_failure() {
        let service = OcrService::with_providers(
            OcrServiceConfig::default(),
            vec![Arc::new(MockProvider {
                fail: true,
                ..MockProvider::returning("x")
            })],
        );

        let result = service.recognize_image(&test_png()).await;
        assert!(matches!(result, Err(OcrError::ProcessingError(_))));
    }

    #[tokio::test]
    async fn test_preferred_provider_not_configured() {
        let service = OcrService::with_providers(
            OcrServiceConfig::default(),
            vec![Arc::new(MockProvider::returning("x"))],
        );

        let result = service
            .recognize(&test_png(), Some(OcrProvider::Ollama), None)
            .await;
        assert!(matches!(result, Err(OcrError::ProviderNotAvailable(_))));
    }
}
