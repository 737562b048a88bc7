//! Token-bucket throttling for outbound backend calls.
//!
//! One limiter per provider, owned by that provider's transport. Refill is
//! computed lazily on each `acquire` from elapsed wall-clock time, never via
//! a background tick. Exhaustion only ever delays the caller; no operation
//! here errors.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity; `tokens` never exceeds this.
    pub max_tokens: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // One call per second sustained, small burst headroom.
        Self {
            max_tokens: 5.0,
            refill_rate: 1.0,
        }
    }
}

impl RateLimiterConfig {
    /// Create a config with explicit capacity and refill rate.
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
        }
    }

    /// Preset for quota-limited cloud APIs.
    pub fn cloud_api() -> Self {
        Self::new(10.0, 0.5)
    }

    /// Preset for on-device backends, which bound burst rather than quota.
    pub fn local_model() -> Self {
        Self::new(4.0, 2.0)
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            tokens: config.max_tokens,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

/// Token-bucket rate limiter for one provider.
///
/// The bucket is owned by a single serialized executor: the whole acquire
/// (refill, check, wait, spend) runs under one lock so a fractional token is
/// never double-spent by concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration. The bucket starts full.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(&config)),
        }
    }

    /// Acquire one permit, suspending if the bucket is empty.
    ///
    /// Never errors: the only effect of exhaustion is delay of
    /// `(1 - tokens) / refill_rate` before the permit is granted.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return;
        }

        let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.refill_rate);
        debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
        // Lock stays held across the sleep: waiters are served in order and
        // the token refilling during the wait cannot be spent by anyone else.
        tokio::time::sleep(wait).await;

        bucket.refill();
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }

    /// Current token count after a lazy refill. Snapshot for diagnostics.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill();
        bucket.tokens
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
