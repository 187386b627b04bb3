//! Vendor-aware rate limiter.
//!
//! City portals are shared municipal infrastructure; we keep a minimum
//! spacing between requests to the same vendor, with a little random
//! jitter so pollers don't look like a metronome. The limiter is global
//! per process: one table, one mutex, no per-city dimension.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::RateLimitConfig;
use crate::types::Vendor;

pub struct RateLimiter {
    config: RateLimitConfig,
    last_request: Mutex<HashMap<Vendor, Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep until the vendor's minimum spacing has elapsed, plus jitter.
    ///
    /// The slot is reserved under the lock (the table is stamped with the
    /// scheduled send time) so concurrent callers queue up behind each
    /// other instead of piling onto the same gap.
    pub async fn wait(&self, vendor: Vendor) {
        let jitter = self.jitter_for(vendor);
        let sleep = {
            let mut table = self.last_request.lock();
            let now = Instant::now();
            let spacing = self.config.spacing_for(vendor);
            let sleep = match table.get(&vendor) {
                Some(last) => wait_duration(spacing, now.duration_since(*last).as_secs_f64(), jitter),
                None => 0.0,
            };
            table.insert(vendor, now + Duration::from_secs_f64(sleep));
            sleep
        };

        if sleep > 0.0 {
            log::info!("Rate limiting {vendor}: sleeping {sleep:.1}s");
            tokio::time::sleep(Duration::from_secs_f64(sleep)).await;
        }
    }

    /// CivicPlus gets extra jitter to avoid pattern detection.
    fn jitter_for(&self, vendor: Vendor) -> f64 {
        let mut rng = rand::thread_rng();
        match vendor {
            Vendor::CivicPlus => rng.gen_range(0.0..2.0),
            _ => rng.gen_range(0.0..1.0),
        }
    }
}

/// Seconds to sleep given the vendor spacing, the time since the previous
/// request, and this call's jitter draw.
fn wait_duration(spacing: f64, elapsed: f64, jitter: f64) -> f64 {
    (spacing - elapsed).max(0.0) + jitter
}
