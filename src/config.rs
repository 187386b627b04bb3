//! Configuration stored in `~/.gavel/config.json`.
//!
//! Every field has a serde default so a missing or partial file still
//! yields a working pipeline. Values here are knobs, not policy: the
//! defaults encode the production behavior and tests construct explicit
//! structs instead of reading the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::Vendor;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Parallel processor workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Conductor tick, seconds.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Worker lease on a claimed queue entry, seconds.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
    /// Retryable-failure attempt ceiling before terminal failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Completed/failed queue rows older than this are garbage-collected.
    #[serde(default = "default_queue_retention_days")]
    pub queue_retention_days: i64,

    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Run the configured fallback extractor when the fast text path comes
    /// up empty. Free tier leaves this off: extraction failure is terminal.
    #[serde(default)]
    pub enable_fallback_extractor: bool,

    /// Per-client Legistar API tokens, keyed by city slug. Most clients
    /// are public; a few require one.
    #[serde(default)]
    pub legistar_tokens: HashMap<String, String>,

    /// Database file override; defaults to `~/.gavel/gavel.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        // serde defaults are the single source of truth
        serde_json::from_str("{}").unwrap()
    }
}

/// PDF chunking caps (§ packet processing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_max_bytes")]
    pub chunk_max_bytes: usize,
    #[serde(default = "default_chunk_max_pages")]
    pub chunk_max_pages: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_max_bytes: default_chunk_max_bytes(),
            chunk_max_pages: default_chunk_max_pages(),
        }
    }
}

/// LLM provider knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Self-imposed requests-per-minute ceiling.
    #[serde(default = "default_per_minute_cap")]
    pub per_minute_cap: usize,
    /// Minimum spacing between successive requests, seconds.
    #[serde(default = "default_min_spacing_seconds")]
    pub min_spacing_seconds: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            per_minute_cap: default_per_minute_cap(),
            min_spacing_seconds: default_min_spacing_seconds(),
        }
    }
}

/// Per-vendor minimum spacing, seconds. Missing vendors fall back to
/// [`RateLimitConfig::UNKNOWN_SPACING`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_vendor_spacing")]
    pub min_spacing_seconds: HashMap<String, f64>,
}

impl RateLimitConfig {
    /// Spacing for vendors with no table entry.
    pub const UNKNOWN_SPACING: f64 = 5.0;

    pub fn spacing_for(&self, vendor: Vendor) -> f64 {
        self.min_spacing_seconds
            .get(vendor.as_str())
            .copied()
            .unwrap_or(Self::UNKNOWN_SPACING)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_spacing_seconds: default_vendor_spacing(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_seconds() -> u64 {
    300
}

fn default_lease_seconds() -> i64 {
    900
}

fn default_max_attempts() -> u32 {
    3
}

fn default_queue_retention_days() -> i64 {
    30
}

fn default_chunk_max_bytes() -> usize {
    31_457_280 // 30 MiB, under the provider's 32 MiB request cap
}

fn default_chunk_max_pages() -> usize {
    90
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_per_minute_cap() -> usize {
    10
}

fn default_min_spacing_seconds() -> f64 {
    2.0
}

fn default_vendor_spacing() -> HashMap<String, f64> {
    // CivicPlus blocks aggressively and needs the longest delays.
    HashMap::from([
        ("primegov".to_string(), 3.0),
        ("granicus".to_string(), 4.0),
        ("civicclerk".to_string(), 3.0),
        ("legistar".to_string(), 3.0),
        ("civicplus".to_string(), 8.0),
        ("novusagenda".to_string(), 4.0),
    ])
}

impl Config {
    /// Resolve the data directory: `~/.gavel`.
    pub fn data_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_default().join(".gavel")
    }

    /// Resolved database file path.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("gavel.db"))
    }

    /// Load from the canonical location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, String> {
        Self::load_from(&Self::data_dir().join("config.json"))
    }

    /// Load from an explicit path. A missing file is not an error; a file
    /// that fails to parse is.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.poll_interval_seconds, 300);
        assert_eq!(config.lease_seconds, 900);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.chunking.chunk_max_bytes, 31_457_280);
        assert_eq!(config.chunking.chunk_max_pages, 90);
        assert_eq!(config.provider.per_minute_cap, 10);
        assert_eq!(config.provider.min_spacing_seconds, 2.0);
        assert!(!config.enable_fallback_extractor);
    }

    #[test]
    fn test_vendor_spacing_table() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.spacing_for(Vendor::PrimeGov), 3.0);
        assert_eq!(limits.spacing_for(Vendor::Granicus), 4.0);
        assert_eq!(limits.spacing_for(Vendor::CivicPlus), 8.0);
        assert_eq!(limits.spacing_for(Vendor::NovusAgenda), 4.0);
    }

    #[test]
    fn test_unknown_vendor_spacing() {
        let limits = RateLimitConfig {
            min_spacing_seconds: HashMap::new(),
        };
        assert_eq!(limits.spacing_for(Vendor::Legistar), 5.0);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let config: Config = serde_json::from_str(r#"{"workerCount": 8}"#).unwrap();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.poll_interval_seconds, 300);
    }
}
