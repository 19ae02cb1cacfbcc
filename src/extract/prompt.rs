//! Prompt construction and model output parsing

use super::client::ExtractionError;
use crate::invoice::ExtractedInvoice;

/// Build the extraction prompt for a block of OCR text
pub fn build_prompt(invoice_text: &str) -> String {
    format!(
        r#"
You are an expert invoice parsing assistant.
Extract the following fields from this invoice text and return only valid JSON:
client_name, invoice_number, invoice_date, due_date, subtotal, tax, total.

Use null for any field that is not present. Amounts are plain numbers.
Return ONLY valid JSON, no markdown, no explanation.
Invoice text:
{invoice_text}
"#
    )
}

/// Remove a surrounding markdown code fence, if the model added one
pub fn strip_code_fences(response: &str) -> &str {
    let mut text = response.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

/// Parse the model's reply into invoice fields
pub fn parse_model_output(response: &str) -> Result<ExtractedInvoice, ExtractionError> {
    let cleaned = strip_code_fences(response);

    serde_json::from_str(cleaned).map_err(|_| ExtractionError::InvalidJson(cleaned.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_text_and_fields() {
        let prompt = build_prompt("ACME LTD\nInvoice 7");
        assert!(prompt.contains("ACME LTD\nInvoice 7"));
        assert!(prompt.contains("client_name, invoice_number, invoice_date, due_date, subtotal, tax, total"));
    }

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_fenced_output() {
        let reply = "```json\n{\"client_name\": \"Globex\", \"total\": \"$99.50\"}\n```";
        let parsed = parse_model_output(reply).unwrap();
        assert_eq!(parsed.client_name.as_deref(), Some("Globex"));
        assert_eq!(parsed.total, Some(99.5));
    }

    #[test]
    fn test_invalid_output_keeps_cleaned_text() {
        let err = parse_model_output("```json\nSorry, I can't read that.\n```").unwrap_err();
        match err {
            ExtractionError::InvalidJson(text) => assert_eq!(text, "Sorry, I can't read that."),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
