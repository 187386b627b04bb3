//! Anthropic Messages API backend.
//!
//! Single-turn completions with rate-limit header parsing. Every response's
//! `anthropic-ratelimit-*` headers feed the shared
//! [`ProviderLimiter`](crate::provider_limit::ProviderLimiter); on a
//! rate-limit-shaped failure the backend sleeps out the advertised wait and
//! retries exactly once. A second failure propagates to the queue, which
//! requeues the job (rate limits are retryable).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ProviderError, SummaryProvider};
use crate::config::ProviderConfig;
use crate::provider_limit::{is_rate_limit_like, ProviderLimiter};

const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// LLM calls routinely take minutes on long packets.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default, rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    limiter: Arc<ProviderLimiter>,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    /// Build from configuration; the API key comes from the configured
    /// environment variable.
    pub fn new(
        config: &ProviderConfig,
        limiter: Arc<ProviderLimiter>,
    ) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::Misconfiguration(format!(
                "API key not found in environment variable '{}'",
                config.api_key_env
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            limiter,
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
        })
    }

    async fn send_once(&self, prompt: &str) -> Result<String, ProviderError> {
        if let Some(wait) = self.limiter.should_wait(&self.model) {
            log::info!(
                "Waiting {:.1}s before request due to rate limits",
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
        self.limiter.record_request(&self.model);

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let header_pairs: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let retry_after = self.limiter.parse_headers(
            header_pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &self.model,
        );

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), body);
            if status.as_u16() == 429 || status.as_u16() == 529 || is_rate_limit_like(&message) {
                // retry-after from a 429/529 is honored verbatim
                let wait = retry_after.unwrap_or_else(|| self.limiter.error_backoff(&message));
                return Err(ProviderError::RateLimited(format!(
                    "{message} (wait {:.1}s)",
                    wait.as_secs_f64()
                )));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: MessagesResponse = resp.json().await?;
        let text: String = body
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }

    /// Sleep duration for a rate-limit-shaped error message.
    fn backoff_for(&self, message: &str) -> Duration {
        self.limiter.error_backoff(message)
    }
}

#[async_trait]
impl SummaryProvider for AnthropicProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        match self.send_once(prompt).await {
            Ok(text) => Ok(text),
            Err(err) => {
                let message = err.to_string();
                if !(err.is_rate_limited() || is_rate_limit_like(&message)) {
                    return Err(err);
                }
                let wait = self.backoff_for(&message);
                log::warn!(
                    "Rate limit hit, waiting {:.1}s as requested by API",
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
                // Retry exactly once; a second failure propagates.
                self.send_once(prompt).await
            }
        }
    }
}
