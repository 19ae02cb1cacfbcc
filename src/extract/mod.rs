//! Field Extraction Module
//!
//! Turns OCR text into structured invoice fields with a chat-completion
//! call against an OpenAI-compatible endpoint (Groq by default).

mod client;
mod prompt;

pub use client::{
    extractor_from_config, ChatCompletionExtractor, ExtractionError, FieldExtractor,
    UnconfiguredExtractor,
};
pub use prompt::{build_prompt, parse_model_output, strip_code_fences};

#[cfg(test)]
pub use client::MockExtractor;
