//! LLM summarization capability.
//!
//! The processor talks to a [`SummaryProvider`] trait object; the shipped
//! implementation is the Anthropic Messages API backend, throttled by the
//! [`ProviderLimiter`](crate::provider_limit::ProviderLimiter).

use async_trait::async_trait;
use thiserror::Error;

pub mod anthropic;
pub mod prompts;

pub use anthropic::AnthropicProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("provider API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned an empty completion")]
    EmptyResponse,

    #[error("provider misconfigured: {0}")]
    Misconfiguration(String),
}

impl ProviderError {
    /// Rate limits are retryable at the queue level; everything else from
    /// the provider is terminal for the job.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// A single-turn completion against the configured model.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Run one prompt and return the completion text.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}
