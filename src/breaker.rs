//! Per-provider circuit breaker.
//!
//! Each provider id owns exactly one breaker, created lazily on first
//! reference and kept for the process lifetime. The breaker stops calls to a
//! failing backend for a cooldown window, then admits one trial call to test
//! recovery.
//!
//! State machine (initial `Closed`, cyclic by design):
//!
//! ```text
//! Closed ──(failures ≥ threshold)──▶ Open
//! Open ──(can_execute after reset_timeout)──▶ HalfOpen (one trial admitted)
//! HalfOpen ──(record_success)──▶ Closed
//! HalfOpen ──(record_failure, count ≥ threshold)──▶ Open
//! any ──(record_success)──▶ Closed, failure count reset
//! ```
//!
//! The open→half-open transition happens lazily inside [`CircuitBreaker::can_execute`],
//! never via a background timer.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AiError, Result};

/// Failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Cooldown before an open circuit admits a trial call.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// Probationary: one trial call decides whether to close or reopen.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker guarding one provider.
///
/// All state lives behind a single mutex; concurrent callers targeting the
/// same provider never race on `failure_count` or `state`.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider_id: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with default threshold (5) and reset timeout (60 s).
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self::with_settings(provider_id, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }

    /// Create a breaker with explicit settings.
    pub fn with_settings(
        provider_id: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// The provider id this breaker guards.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Whether a call may proceed right now.
    ///
    /// This is a query with a side effect, kept deliberately: evaluating it
    /// while `Open` past the reset timeout flips the state to `HalfOpen` and
    /// returns `true`, which admits exactly one trial call. Callers must not
    /// call this twice per attempt. Two concurrent callers racing right after
    /// the flip can both observe `true` — an accepted relaxation; the check
    /// is not atomic with a reservation.
    pub async fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed_past_timeout = inner
                    .last_failure
                    .map(|at| at.elapsed() > self.reset_timeout)
                    .unwrap_or(true);
                if elapsed_past_timeout {
                    inner.state = BreakerState::HalfOpen;
                    info!(
                        provider = %self.provider_id,
                        "circuit half-open, admitting trial call"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call: failure count resets, circuit closes.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != BreakerState::Closed {
            info!(provider = %self.provider_id, "circuit closed after successful call");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    /// Record a failed call. Opens the circuit once the failure count
    /// reaches the threshold; a half-open trial failure re-opens it.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.failure_threshold && inner.state != BreakerState::Open {
            inner.state = BreakerState::Open;
            warn!(
                provider = %self.provider_id,
                failures = inner.failure_count,
                "circuit opened"
            );
        }
    }

    /// Convenience wrapper: gate, run, record the outcome, rethrow.
    ///
    /// When gated out the error is [`AiError::BreakerOpen`], never the
    /// underlying call's error, so callers can distinguish "did not try"
    /// from "tried and failed".
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.can_execute().await {
            return Err(AiError::BreakerOpen(self.provider_id.clone()));
        }
        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    /// Current state (snapshot).
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Current consecutive failure count (snapshot).
    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }
}
