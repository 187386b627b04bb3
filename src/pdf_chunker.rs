//! Splitting oversize agenda packets into processable chunks.
//!
//! The provider caps requests at 32 MiB and ~100 pages, so packets are
//! split into chunks of at most 30 MiB and 90 pages. Page sizes are
//! measured by serializing each page as a standalone single-page PDF, the
//! same way the chunk itself will eventually be serialized; the grouping
//! decision itself is a pure function over those sizes so the boundary
//! behavior is testable without hundred-megabyte fixtures.

use std::ops::Range;

use lopdf::Document;
use thiserror::Error;

use crate::config::ChunkingConfig;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("failed to read PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF has no pages")]
    Empty,

    #[error("failed to write PDF: {0}")]
    Io(#[from] std::io::Error),
}

/// One slice of a larger packet.
#[derive(Debug, Clone)]
pub struct PdfChunk {
    /// Serialized single- or multi-page PDF.
    pub content: Vec<u8>,
    /// 0-based inclusive page range within the original document.
    pub start_page: usize,
    pub end_page: usize,
    /// 0-based position in the chunk sequence.
    pub chunk_number: usize,
    pub total_chunks: usize,
    pub size_bytes: usize,
}

impl PdfChunk {
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }
}

pub struct PdfChunker {
    max_bytes: usize,
    max_pages: usize,
}

impl PdfChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_bytes: config.chunk_max_bytes,
            max_pages: config.chunk_max_pages,
        }
    }

    /// Number of pages in the document.
    pub fn page_count(bytes: &[u8]) -> Result<usize, ChunkError> {
        let doc = Document::load_mem(bytes)?;
        Ok(doc.get_pages().len())
    }

    /// Whether the packet breaches either cap and needs splitting.
    pub fn needs_chunking(&self, bytes: &[u8]) -> Result<bool, ChunkError> {
        if bytes.len() > self.max_bytes {
            return Ok(true);
        }
        Ok(Self::page_count(bytes)? > self.max_pages)
    }

    /// Split the packet into size- and page-bounded chunks.
    pub fn split(&self, bytes: &[u8]) -> Result<Vec<PdfChunk>, ChunkError> {
        let doc = Document::load_mem(bytes)?;
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(ChunkError::Empty);
        }
        log::info!("PDF has {} pages, {} bytes", page_numbers.len(), bytes.len());

        // Measure every page as it will actually serialize.
        let mut page_sizes = Vec::with_capacity(page_numbers.len());
        for &page in &page_numbers {
            page_sizes.push(extract_pages(bytes, &[page])?.len());
        }

        let plan = plan_chunks(&page_sizes, self.max_bytes, self.max_pages);
        let total_chunks = plan.len();

        let mut chunks = Vec::with_capacity(total_chunks);
        for (chunk_number, range) in plan.into_iter().enumerate() {
            let keep: Vec<u32> = page_numbers[range.clone()].to_vec();
            let content = extract_pages(bytes, &keep)?;
            log::info!(
                "Created chunk {} with {} bytes (pages {}-{})",
                chunk_number + 1,
                content.len(),
                range.start + 1,
                range.end
            );
            chunks.push(PdfChunk {
                size_bytes: content.len(),
                content,
                start_page: range.start,
                end_page: range.end - 1,
                chunk_number,
                total_chunks,
            });
        }

        log::info!("Split PDF into {} chunks", chunks.len());
        Ok(chunks)
    }
}

/// Serialize a new PDF containing only `keep` (1-based page numbers).
fn extract_pages(bytes: &[u8], keep: &[u32]) -> Result<Vec<u8>, ChunkError> {
    let mut doc = Document::load_mem(bytes)?;
    let delete: Vec<u32> = doc
        .get_pages()
        .keys()
        .copied()
        .filter(|page| !keep.contains(page))
        .collect();
    doc.delete_pages(&delete);
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();

    let mut buf = Vec::new();
    doc.save_to(&mut buf)?;
    Ok(buf)
}

/// Group pages into chunk ranges without breaching either cap.
///
/// A page joins the current chunk unless the chunk already holds
/// `max_pages` pages or adding the page would push the chunk past
/// `max_bytes`. A single page larger than `max_bytes` still gets its own
/// chunk, since there is no smaller unit to split into.
fn plan_chunks(page_sizes: &[usize], max_bytes: usize, max_pages: usize) -> Vec<Range<usize>> {
    let mut plan = Vec::new();
    let mut start = 0usize;
    let mut current_bytes = 0usize;

    for (index, &size) in page_sizes.iter().enumerate() {
        let pages_in_chunk = index - start;
        let would_exceed_size = current_bytes + size > max_bytes;
        let would_exceed_pages = pages_in_chunk >= max_pages;

        if pages_in_chunk > 0 && (would_exceed_size || would_exceed_pages) {
            plan.push(start..index);
            start = index;
            current_bytes = 0;
        }
        current_bytes += size;
    }

    if start < page_sizes.len() {
        plan.push(start..page_sizes.len());
    }
    plan
}

/// Prompt prefix identifying the chunk's place in the document. Empty for
/// single-chunk documents, which use the normal prompt unmodified.
pub fn chunk_prompt_prefix(chunk: &PdfChunk) -> String {
    if chunk.total_chunks == 1 {
        return String::new();
    }
    format!(
        "This is chunk {} of {} from a larger document.\n\
         Pages {} to {} of the original document.\n\
         Please analyze this portion and provide details about the content in this chunk.\n\
         Focus on extracting all specific information, as the chunks will be combined later.",
        chunk.chunk_number + 1,
        chunk.total_chunks,
        chunk.start_page + 1,
        chunk.end_page + 1
    )
}

/// Stitch per-chunk summaries into one document summary.
pub fn combine_chunk_summaries(summaries: &[String], chunks: &[PdfChunk]) -> String {
    if summaries.len() == 1 {
        return summaries[0].clone();
    }

    let mut combined = Vec::new();
    combined.push("**Document Overview:**".to_string());
    combined.push(format!(
        "This document was processed in {} chunks due to its size.",
        summaries.len()
    ));
    combined.push(String::new());

    for (i, (summary, chunk)) in summaries.iter().zip(chunks).enumerate() {
        combined.push(format!(
            "**Section {} (Pages {}-{}):**",
            i + 1,
            chunk.start_page + 1,
            chunk.end_page + 1
        ));
        combined.push(summary.clone());
        combined.push(String::new());
    }

    combined.join("\n")
}

/// Rough token estimate for a chunk, for logging and budget checks.
pub fn estimate_chunk_tokens(chunk: &PdfChunk) -> usize {
    chunk.page_count() * 2000 + 500
}
