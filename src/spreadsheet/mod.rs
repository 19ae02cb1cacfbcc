//! Spreadsheet Mirror
//!
//! Keeps an `.xlsx` copy of the invoice table for people who live in
//! spreadsheets. The database stays authoritative; the file can always be
//! regenerated from it.

mod mirror;

pub use mirror::{Cell, MirrorRow, SpreadsheetError, SpreadsheetMirror, HEADERS};
