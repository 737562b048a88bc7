//! Error types for backend routing and dispatch.
//!
//! # Error Handling Philosophy
//!
//! Errors fall into two families with very different consumers:
//!
//! 1. **Routing signals** (`BreakerOpen`, `NotConfigured`, `IndexNotReady`):
//!    consumed by the fallback loop and the orchestrator, never shown to the
//!    user as-is.
//! 2. **Transport failures** (`Network`, `Api`, `Auth`, `RateLimited`,
//!    `Timeout`, `InvalidResponse`): recorded against the failing provider's
//!    circuit breaker, then the next candidate is tried. Only surfaced once
//!    the whole chain is exhausted, and then as a synthesized human-readable
//!    message — never a raw transport string.
//!
//! `BreakerOpen` is deliberately a distinct variant from any transport error
//! so callers can tell "did not try" apart from "tried and failed".

use thiserror::Error;

/// Result type for all backend operations.
pub type Result<T> = std::result::Result<T, AiError>;

/// Errors that can occur while routing to or calling an AI backend.
#[derive(Debug, Error)]
pub enum AiError {
    /// A provider was skipped because its circuit breaker is open.
    ///
    /// This is a routing signal, not a user-visible failure: the fallback
    /// loop moves on to the next candidate.
    #[error("circuit breaker open for provider '{0}'")]
    BreakerOpen(String),

    /// Network-level failure reaching the provider.
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered with a non-success status or an API error body.
    #[error("API error: {0}")]
    Api(String),

    /// Authentication failure (missing, invalid, or expired credentials).
    #[error("authentication error: {0}")]
    Auth(String),

    /// The provider rejected the call due to quota exhaustion.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The call exceeded its bounded timeout.
    #[error("request timed out")]
    Timeout,

    /// The provider responded, but the body could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The selected backend needs a router/registry that was never wired up.
    ///
    /// Reported immediately with no fallback attempted — there is nothing to
    /// fall back through.
    #[error("no provider configured")]
    NotConfigured,

    /// Semantic search was invoked before the index finished initializing.
    ///
    /// Queued writes succeed silently; reads return an empty result set
    /// rather than propagating this, since "no results yet" is a valid,
    /// recoverable state.
    #[error("semantic index not ready")]
    IndexNotReady,

    /// The provider does not implement the requested capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else if err.is_connect() {
            AiError::Network(format!("connection failed: {}", err))
        } else {
            AiError::Network(err.to_string())
        }
    }
}

impl AiError {
    /// Whether this error counts as a transport failure against the
    /// provider's circuit breaker.
    ///
    /// Routing signals (`BreakerOpen`, `NotConfigured`, `IndexNotReady`) are
    /// not the provider's fault and must not trip its breaker. Everything
    /// else, including errors we never anticipated, is treated as a
    /// transport failure so it can never escape and abort the fallback loop.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            AiError::BreakerOpen(_) | AiError::NotConfigured | AiError::IndexNotReady
        )
    }

    /// Short user-facing description of the failure class, used by the
    /// orchestrator's error synthesis. Never includes raw transport payloads.
    pub fn user_summary(&self) -> String {
        match self {
            AiError::BreakerOpen(id) => {
                format!("{} is temporarily unavailable, try again shortly", id)
            }
            AiError::Network(_) => "could not reach the AI backend".to_string(),
            AiError::Api(_) | AiError::InvalidResponse(_) => {
                "the AI backend returned an unexpected response".to_string()
            }
            AiError::Auth(_) => "the AI backend rejected the configured credentials".to_string(),
            AiError::RateLimited(_) => {
                "the AI backend is rate limited, try again shortly".to_string()
            }
            AiError::Timeout => "the AI backend took too long to respond".to_string(),
            AiError::NotConfigured => "no AI backend is configured".to_string(),
            AiError::IndexNotReady => "search index is still starting up".to_string(),
            AiError::NotSupported(what) => format!("this backend does not support {}", what),
            AiError::Serialization(_) => {
                "the AI backend returned an unreadable response".to_string()
            }
        }
    }
}
