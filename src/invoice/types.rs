//! Invoice records and request bodies

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::format_date;

/// Status given to every newly ingested invoice
pub const DEFAULT_STATUS: &str = "Unpaid";

/// Where an invoice came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceSource {
    Upload,
    Email,
}

impl InvoiceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Email => "email",
        }
    }
}

/// Invoice record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: i64,
    pub client_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub status: String,
    pub source: String,
    pub source_file: Option<String>,
    pub created_at: String,
}

/// Fields pulled out of OCR text by the language model.
///
/// Models are sloppy about types: invoice numbers come back as JSON numbers,
/// amounts as `"$1,234.50"`. Every field tolerates that and missing keys
/// become `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    #[serde(default, deserialize_with = "lenient_text")]
    pub client_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub invoice_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub subtotal: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub tax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total: Option<f64>,
}

impl ExtractedInvoice {
    /// Rewrite both dates to `YYYY-MM-DD`, dropping ones that don't parse
    pub fn with_normalized_dates(mut self) -> Self {
        self.invoice_date = self.invoice_date.as_deref().and_then(format_date);
        self.due_date = self.due_date.as_deref().and_then(format_date);
        self
    }
}

/// Update invoice request
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceUpdate {
    pub client_name: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub due_date: String,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
    pub status: String,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_amount(&s),
        _ => None,
    })
}

/// Parse a money string such as `"$1,234.50"` or `"1 200.00 EUR"`
pub fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("1 200.00 EUR"), Some(1200.0));
        assert_eq!(parse_amount("-15"), Some(-15.0));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_extracted_invoice_tolerates_model_types() {
        let json = r#"{
            "client_name": "Acme Corp",
            "invoice_number": 10045,
            "invoice_date": "15/03/2024",
            "due_date": null,
            "subtotal": "$1,000.00",
            "tax": 80,
            "total": "1080.00"
        }"#;

        let parsed: ExtractedInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.client_name.as_deref(), Some("Acme Corp"));
        assert_eq!(parsed.invoice_number.as_deref(), Some("10045"));
        assert_eq!(parsed.due_date, None);
        assert_eq!(parsed.subtotal, Some(1000.0));
        assert_eq!(parsed.tax, Some(80.0));
        assert_eq!(parsed.total, Some(1080.0));
    }

    #[test]
    fn test_missing_keys_default_to_none() {
        let parsed: ExtractedInvoice = serde_json::from_str(r#"{"total": 12.5}"#).unwrap();
        assert_eq!(parsed.total, Some(12.5));
        assert!(parsed.client_name.is_none());
        assert!(parsed.invoice_date.is_none());
    }

    #[test]
    fn test_with_normalized_dates() {
        let invoice = ExtractedInvoice {
            invoice_date: Some("15/03/2024".to_string()),
            due_date: Some("next Tuesday".to_string()),
            ..Default::default()
        }
        .with_normalized_dates();

        assert_eq!(invoice.invoice_date.as_deref(), Some("2024-03-15"));
        assert_eq!(invoice.due_date, None);
    }
}
