//! Invoice Intake Server Library
//!
//! Invoices arrive as uploads or email attachments, are OCR'd, structured by
//! a language model, and stored in SQLite with an `.xlsx` mirror.
//!
//! # Modules
//!
//! - `ingest`: the upload/attachment pipeline
//! - `ocr`, `pdf`, `extract`: the external steps it drives
//! - `db`, `spreadsheet`: the two stores
//! - `mail`: IMAP poller feeding `ingest`
//! - `routes`: HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod invoice;
pub mod mail;
pub mod ocr;
pub mod pdf;
pub mod routes;
pub mod spreadsheet;
pub mod state;
