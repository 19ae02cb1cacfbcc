//! Page rasterization via MuPDF

use std::io::Cursor;

use image::DynamicImage;
use mupdf::{Colorspace, Document, Matrix};
use thiserror::Error;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// PDF errors
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Failed to open PDF: {0}")]
    Open(String),

    #[error("Failed to render page {page}: {message}")]
    Render { page: usize, message: String },

    #[error("PDF has no pages")]
    Empty,

    #[error("Task join error: {0}")]
    Join(String),
}

impl From<mupdf::Error> for PdfError {
    fn from(err: mupdf::Error) -> Self {
        PdfError::Open(err.to_string())
    }
}

/// A single rendered page
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Page number (1-indexed)
    pub page: usize,
    /// PNG-encoded page image
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Whether an upload or attachment is a PDF, by extension or magic bytes
pub fn is_pdf(file_name: &str, data: &[u8]) -> bool {
    file_name.to_ascii_lowercase().ends_with(".pdf") || data.starts_with(PDF_MAGIC)
}

/// Renders PDF pages to PNG images
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    scale: f32,
    max_pages: usize,
}

impl PdfRasterizer {
    pub fn new(scale: f32, max_pages: usize) -> Self {
        Self {
            scale: scale.clamp(0.5, 4.0),
            max_pages: max_pages.max(1),
        }
    }

    /// Render every page (up to the page limit) on the blocking pool
    pub async fn rasterize(&self, data: Vec<u8>) -> Result<Vec<PageImage>, PdfError> {
        let rasterizer = self.clone();

        tokio::task::spawn_blocking(move || rasterizer.rasterize_blocking(&data))
            .await
            .map_err(|e| PdfError::Join(e.to_string()))?
    }

    fn rasterize_blocking(&self, data: &[u8]) -> Result<Vec<PageImage>, PdfError> {
        let doc = Document::from_bytes(data, "application/pdf")?;
        let page_count = doc.page_count()? as usize;

        if page_count == 0 {
            return Err(PdfError::Empty);
        }

        if page_count > self.max_pages {
            tracing::warn!(
                page_count,
                max_pages = self.max_pages,
                "PDF exceeds page limit, extra pages skipped"
            );
        }

        let matrix = Matrix::new_scale(self.scale, self.scale);
        let colorspace = Colorspace::device_rgb();

        (0..page_count.min(self.max_pages))
            .map(|index| {
                let render_err = move |e: mupdf::Error| PdfError::Render {
                    page: index + 1,
                    message: e.to_string(),
                };

                let page = doc.load_page(index as i32).map_err(render_err)?;
                let pixmap = page
                    .to_pixmap(&matrix, &colorspace, false, false)
                    .map_err(render_err)?;

                encode_pixmap(&pixmap, index + 1)
            })
            .collect()
    }
}

/// Largest page image we are willing to allocate (about 120 MB of RGB)
const MAX_PAGE_PIXELS: usize = 40_000_000;

/// Pixel count of a rendered page, refusing pages too large to buffer
fn page_pixels(width: u32, height: u32, page: usize) -> Result<usize, PdfError> {
    (width as usize)
        .checked_mul(height as usize)
        .filter(|pixels| *pixels <= MAX_PAGE_PIXELS)
        .ok_or_else(|| PdfError::Render {
            page,
            message: format!("page is {}x{} pixels, over the {} pixel limit", width, height, MAX_PAGE_PIXELS),
        })
}

fn encode_pixmap(pixmap: &mupdf::Pixmap, page: usize) -> Result<PageImage, PdfError> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let pixels = page_pixels(width, height, page)?;
    let samples = pixmap.samples();
    let n = (pixmap.n() as usize).max(1);

    let mut rgb_buffer = Vec::with_capacity(pixels * 3);
    for pixel in samples.chunks(n).take(pixels) {
        let r = pixel.first().copied().unwrap_or(255);
        let g = pixel.get(1).copied().unwrap_or(r);
        let b = pixel.get(2).copied().unwrap_or(r);
        rgb_buffer.extend_from_slice(&[r, g, b]);
    }

    let img = image::RgbImage::from_raw(width, height, rgb_buffer).ok_or_else(|| PdfError::Render {
        page,
        message: "Failed to create image buffer".to_string(),
    })?;

    let mut data = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
        .map_err(|e| PdfError::Render {
            page,
            message: e.to_string(),
        })?;

    Ok(PageImage {
        page,
        data,
        width,
        height,
    })
}

/// A minimal PDF of `pages` blank 72x72pt pages, with a correct xref table
#[cfg(test)]
pub(crate) fn blank_pdf(pages: usize) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 72 72] >>".to_string());
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}
