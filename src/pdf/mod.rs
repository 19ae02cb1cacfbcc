//! PDF Module
//!
//! Invoices often arrive as PDFs. Each page is rendered to an image with
//! MuPDF so it can go through the same OCR path as a scanned photo.

mod rasterizer;

pub use rasterizer::{is_pdf, PageImage, PdfError, PdfRasterizer};

#[cfg(test)]
pub(crate) use rasterizer::blank_pdf;
