//! PDF text extraction capability.
//!
//! The pipeline consumes extraction as a capability, not a hardcoded
//! dependency: the processor takes a primary [`TextExtractor`] and an
//! optional fallback. The built-in primary is the fast text path
//! (`pdf-extract`); OCR-grade fallbacks plug in behind the same trait.

use thiserror::Error;

use crate::pdf_chunker::PdfChunker;

/// Extracted text below this many characters is treated as a failed
/// extraction (scanned packet, image-only pages).
const MIN_TEXT_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("no extractable text")]
    Empty,
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub page_count: usize,
    /// Which extractor produced the text (recorded with the summary).
    pub method: &'static str,
}

pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractError>;
}

/// Fast text-layer extraction. Fails on scanned documents, which is fine:
/// those either go to the configured fallback or fail terminally.
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn name(&self) -> &'static str {
        "pdf_text"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        let text = normalize_text(&text);
        if !looks_extractable(&text) {
            return Err(ExtractError::Empty);
        }
        let page_count = PdfChunker::page_count(bytes)
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        Ok(Extraction {
            text,
            page_count,
            method: self.name(),
        })
    }
}

/// Collapse runs of blank lines and trailing whitespace. PDF text layers
/// are full of layout artifacts that waste prompt tokens.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;
    for line in raw.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Whether extracted text is substantial enough to summarize.
pub fn looks_extractable(text: &str) -> bool {
    text.trim().chars().count() >= MIN_TEXT_CHARS
}
