//! Pipeline error taxonomy.
//!
//! Errors are classified by recoverability:
//! - Retryable: transient HTTP failures, vendor or provider rate limits
//! - Terminal: extraction exhausted, irrecoverable LLM failures
//! - Bugs: validation violations, never caught, always propagated
//!
//! The `retryable` flag is what `Queue::fail` consumes to decide between
//! requeueing and terminal failure.

use thiserror::Error;

use crate::db::DbError;
use crate::extract::ExtractError;
use crate::fetch::FetchError;
use crate::pdf_chunker::ChunkError;
use crate::summarize::ProviderError;
use crate::types::Vendor;

/// An adapter failure scoped to one city. The conductor logs these and
/// skips the city for the cycle instead of crashing the poll loop.
#[derive(Debug, Error)]
#[error("{vendor}/{slug} {operation}: {source}")]
pub struct AdapterError {
    pub vendor: Vendor,
    pub slug: String,
    /// What the adapter was doing (`list meetings`, `fetch agenda`).
    pub operation: &'static str,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl AdapterError {
    pub fn new(
        vendor: Vendor,
        slug: &str,
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            vendor,
            slug: slug.to_string(),
            operation,
            source: Box::new(source),
        }
    }

    /// A blank slug would build URLs against the wrong host, so it is
    /// rejected before any request is made.
    pub fn blank_slug(vendor: Vendor) -> Self {
        Self {
            vendor,
            slug: String::new(),
            operation: "construct",
            source: "city slug must not be blank".into(),
        }
    }
}

/// Errors surfaced by job processing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("corrupt payload (pre-typed row)")]
    CorruptPayload,

    #[error("meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("matter not found: {0}")]
    MatterNotFound(String),

    #[error("matter has no summarized appearances yet: {0}")]
    MatterNotReady(String),

    #[error("extraction_failed: {0}")]
    ExtractionFailed(String),
}

impl PipelineError {
    /// Whether a failed job should go back to pending for another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Vendor hiccups resolve on the next poll; HTTP transients and
            // rate limits resolve with time.
            PipelineError::Adapter(_) => true,
            PipelineError::Fetch(e) => e.is_transient(),
            PipelineError::Provider(e) => e.is_rate_limited(),
            // A malformed PDF or empty extraction will not improve by
            // retrying the same bytes.
            PipelineError::Extract(_) | PipelineError::Chunk(_) => false,
            PipelineError::CorruptPayload => false,
            PipelineError::MeetingNotFound(_) | PipelineError::MatterNotFound(_) => false,
            // Item summaries land shortly after the meeting job finishes.
            PipelineError::MatterNotReady(_) => true,
            PipelineError::ExtractionFailed(_) => false,
            PipelineError::Db(_) => false,
        }
    }

    /// Terse category tag recorded in `queue.last_error`.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Adapter(_) => "adapter",
            PipelineError::Fetch(_) => "http",
            PipelineError::Extract(_) | PipelineError::ExtractionFailed(_) => "extraction_failed",
            PipelineError::Chunk(_) => "chunking",
            PipelineError::Provider(e) if e.is_rate_limited() => "rate_limit",
            PipelineError::Provider(_) => "processing",
            PipelineError::Db(_) => "storage",
            PipelineError::CorruptPayload => "corrupt_payload",
            PipelineError::MeetingNotFound(_) | PipelineError::MatterNotFound(_) => "missing_row",
            PipelineError::MatterNotReady(_) => "not_ready",
        }
    }
}
