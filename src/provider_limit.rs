//! Anthropic rate-limit handler with header parsing.
//!
//! Tracks per-model request pacing from three signals, consulted in
//! priority order before each call:
//!
//! 1. a rolling 1-minute window (self-imposed requests-per-minute cap)
//! 2. `anthropic-ratelimit-requests-remaining` / `-reset` headers from the
//!    previous response, honored when remaining drops to 5 or fewer
//! 3. a minimum spacing between successive requests
//!
//! On a rate-limit-shaped error the wait is taken from `retry-after` or the
//! message text, the caller sleeps, and retries exactly once.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;

use crate::config::ProviderConfig;

/// How few remaining requests counts as "nearly exhausted".
const REMAINING_FLOOR: u32 = 5;

#[derive(Default)]
struct ModelState {
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
    last_request: Option<Instant>,
    /// Request timestamps inside the rolling minute.
    window: Vec<Instant>,
}

pub struct ProviderLimiter {
    per_minute_cap: usize,
    min_spacing: Duration,
    models: Mutex<HashMap<String, ModelState>>,
}

impl ProviderLimiter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            per_minute_cap: config.per_minute_cap,
            min_spacing: Duration::from_secs_f64(config.min_spacing_seconds),
            models: Mutex::new(HashMap::new()),
        }
    }

    /// How long to sleep before the next request for `model`, if at all.
    pub fn should_wait(&self, model: &str) -> Option<Duration> {
        self.should_wait_at(model, Instant::now(), Utc::now())
    }

    fn should_wait_at(&self, model: &str, now: Instant, now_utc: DateTime<Utc>) -> Option<Duration> {
        let mut models = self.models.lock();
        let state = models.entry(model.to_string()).or_default();

        // 1-minute window first
        state.window.retain(|ts| now.duration_since(*ts) < Duration::from_secs(60));
        if state.window.len() >= self.per_minute_cap {
            if let Some(oldest) = state.window.iter().min() {
                let wait = Duration::from_secs(60).saturating_sub(now.duration_since(*oldest));
                if !wait.is_zero() {
                    log::info!(
                        "Per-minute cap for {model}: {}/{} requests, waiting {:.1}s",
                        state.window.len(),
                        self.per_minute_cap,
                        wait.as_secs_f64()
                    );
                    return Some(wait);
                }
            }
        }

        // Header-derived reset, when nearly exhausted
        if let Some(reset_at) = state.reset_at {
            if now_utc < reset_at {
                if state.remaining.unwrap_or(0) <= REMAINING_FLOOR {
                    let wait = (reset_at - now_utc).to_std().unwrap_or_default();
                    if !wait.is_zero() {
                        log::info!(
                            "Rate limit nearly exhausted for {model} ({} remaining), waiting {:.1}s until reset",
                            state.remaining.unwrap_or(0),
                            wait.as_secs_f64()
                        );
                        return Some(wait);
                    }
                }
            }
        }

        // Minimum spacing
        if let Some(last) = state.last_request {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_spacing {
                return Some(self.min_spacing - elapsed);
            }
        }

        None
    }

    /// Record that a request is being sent for `model`.
    pub fn record_request(&self, model: &str) {
        let now = Instant::now();
        let mut models = self.models.lock();
        let state = models.entry(model.to_string()).or_default();
        state.last_request = Some(now);
        state.window.push(now);
    }

    /// Parse rate-limit headers from a response. Returns the `retry-after`
    /// value when present (the caller honors it verbatim on 429/529).
    pub fn parse_headers<'a, I>(&self, headers: I, model: &str) -> Option<Duration>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut retry_after = None;
        let mut models = self.models.lock();
        let state = models.entry(model.to_string()).or_default();

        for (name, value) in headers {
            match name.to_ascii_lowercase().as_str() {
                "anthropic-ratelimit-requests-remaining" => {
                    if let Ok(remaining) = value.parse::<u32>() {
                        log::debug!("Rate limit remaining for {model}: {remaining}");
                        state.remaining = Some(remaining);
                    }
                }
                "anthropic-ratelimit-requests-reset" => {
                    match DateTime::parse_from_rfc3339(value) {
                        Ok(reset) => {
                            log::debug!("Rate limit resets at {value} for {model}");
                            state.reset_at = Some(reset.with_timezone(&Utc));
                        }
                        Err(e) => log::warn!("Failed to parse reset time {value}: {e}"),
                    }
                }
                "retry-after" => {
                    if let Ok(secs) = value.parse::<u64>() {
                        log::info!("Provider requests retry after {secs}s");
                        retry_after = Some(Duration::from_secs(secs));
                    }
                }
                _ => {}
            }
        }

        retry_after
    }

    /// Wait time for a rate-limit-shaped error, from the message when the
    /// response headers didn't already say.
    pub fn error_backoff(&self, error_text: &str) -> Duration {
        if let Some(secs) = extract_wait_seconds(error_text) {
            return Duration::from_secs_f64(secs);
        }
        // Conservative defaults by error shape
        if error_text.contains("429") {
            Duration::from_secs(120)
        } else if error_text.contains("529") {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(30)
        }
    }
}

/// Whether an error message looks like a rate limit or overload.
pub fn is_rate_limit_like(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    ["429", "529", "rate", "limit", "overload"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn re_try_again() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)try again in (\d+(?:\.\d+)?) seconds").unwrap())
}

fn re_wait() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)wait (\d+(?:\.\d+)?) seconds").unwrap())
}

/// `"… try again in 7.5 seconds"` / `"please wait 30 seconds"` → seconds.
fn extract_wait_seconds(error_text: &str) -> Option<f64> {
    for re in [re_try_again(), re_wait()] {
        if let Some(caps) = re.captures(error_text) {
            if let Ok(secs) = caps[1].parse::<f64>() {
                return Some(secs);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> ProviderLimiter {
        ProviderLimiter::new(&ProviderConfig::default())
    }

    #[test]
    fn test_no_wait_when_idle() {
        assert_eq!(limiter().should_wait("claude"), None);
    }

    #[test]
    fn test_min_spacing_between_requests() {
        let limiter = limiter();
        limiter.record_request("claude");
        let wait = limiter.should_wait("claude").expect("should enforce spacing");
        assert!(wait <= Duration::from_secs(2));
        assert!(wait > Duration::from_millis(1900));
    }

    #[test]
    fn test_per_minute_window_blocks_at_cap() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.record_request("claude");
        }
        let wait = limiter.should_wait("claude").expect("window is full");
        // The oldest entry just landed, so we wait out most of the minute.
        assert!(wait > Duration::from_secs(55));
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_reset_header_waits_when_nearly_exhausted() {
        let limiter = limiter();
        let reset = (Utc::now() + chrono::Duration::seconds(30)).to_rfc3339();
        limiter.parse_headers(
            [
                ("anthropic-ratelimit-requests-remaining", "3"),
                ("anthropic-ratelimit-requests-reset", reset.as_str()),
            ],
            "claude",
        );
        let wait = limiter.should_wait("claude").expect("nearly exhausted");
        assert!(wait > Duration::from_secs(25));
        assert!(wait <= Duration::from_secs(30));
    }

    #[test]
    fn test_reset_header_ignored_with_budget_left() {
        let limiter = limiter();
        let reset = (Utc::now() + chrono::Duration::seconds(30)).to_rfc3339();
        limiter.parse_headers(
            [
                ("anthropic-ratelimit-requests-remaining", "40"),
                ("anthropic-ratelimit-requests-reset", reset.as_str()),
            ],
            "claude",
        );
        assert_eq!(limiter.should_wait("claude"), None);
    }

    #[test]
    fn test_retry_after_header_returned_verbatim() {
        let limiter = limiter();
        let retry = limiter.parse_headers([("retry-after", "17")], "claude");
        assert_eq!(retry, Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_error_backoff_from_message() {
        let limiter = limiter();
        assert_eq!(
            limiter.error_backoff("overloaded, please try again in 7.5 seconds"),
            Duration::from_secs_f64(7.5)
        );
        assert_eq!(
            limiter.error_backoff("please wait 30 seconds before retrying"),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_error_backoff_defaults() {
        let limiter = limiter();
        assert_eq!(limiter.error_backoff("HTTP 429 too many requests"), Duration::from_secs(120));
        assert_eq!(limiter.error_backoff("HTTP 529 overloaded"), Duration::from_secs(60));
        assert_eq!(limiter.error_backoff("something rate-ish"), Duration::from_secs(30));
    }

    #[test]
    fn test_rate_limit_like_detection() {
        assert!(is_rate_limit_like("429 Too Many Requests"));
        assert!(is_rate_limit_like("model overloaded"));
        assert!(is_rate_limit_like("Rate limit exceeded"));
        assert!(!is_rate_limit_like("connection refused"));
    }
}
