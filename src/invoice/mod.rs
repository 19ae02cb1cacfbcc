//! Invoice domain types
//!
//! `Invoice` is the persisted row, `ExtractedInvoice` is what the language
//! model hands back, `InvoiceUpdate` is the body of a PUT.

mod dates;
mod types;

pub use dates::format_date;
pub use types::{parse_amount, ExtractedInvoice, Invoice, InvoiceSource, InvoiceUpdate, DEFAULT_STATUS};
