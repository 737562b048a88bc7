//! Usage accounting for outbound backend calls.
//!
//! The orchestrator records an approximate token-cost observation per call,
//! tagged with the provider id, so the host app can display rough session
//! cost without parsing provider responses. This is a side effect of
//! dispatch, not part of the query return contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::Mutex;

/// One recorded call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub provider_id: String,
    pub approx_tokens: usize,
    pub timestamp: SystemTime,
}

/// Per-provider aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub calls: usize,
    pub approx_tokens: usize,
}

/// Session-level summary snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_calls: usize,
    pub total_approx_tokens: usize,
    pub by_provider: HashMap<String, ProviderUsage>,
}

/// Accumulates usage observations for the process lifetime.
#[derive(Debug, Default)]
pub struct UsageTracker {
    entries: Mutex<Vec<UsageEntry>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call against a provider.
    pub async fn record_call(&self, provider_id: impl Into<String>, approx_tokens: usize) {
        self.entries.lock().await.push(UsageEntry {
            provider_id: provider_id.into(),
            approx_tokens,
            timestamp: SystemTime::now(),
        });
    }

    /// Number of recorded calls.
    pub async fn call_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Aggregate snapshot with per-provider breakdown.
    pub async fn summary(&self) -> UsageSummary {
        let entries = self.entries.lock().await;
        let mut summary = UsageSummary::default();
        for entry in entries.iter() {
            summary.total_calls += 1;
            summary.total_approx_tokens += entry.approx_tokens;
            let per = summary
                .by_provider
                .entry(entry.provider_id.clone())
                .or_default();
            per.calls += 1;
            per.approx_tokens += entry.approx_tokens;
        }
        summary
    }
}
