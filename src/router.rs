//! Fallback-chain router.
//!
//! Builds an ordered, deduplicated candidate chain from the registry:
//! preferred provider first, then the other available cloud providers in
//! registration order, then at most one local provider. Cloud candidates are
//! gated by their own circuit breakers; local providers are breaker-exempt as
//! fallbacks — an on-device backend has no remote failure mode worth a
//! cooldown window, and withholding it would discard a guaranteed-available
//! last resort.
//!
//! Building the chain performs the one `can_execute` gate per attempt (a
//! query with a side effect, see [`CircuitBreaker::can_execute`]); the
//! dispatch loop must not re-check, only record outcomes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::registry::ProviderRegistry;
use crate::traits::{AiProvider, ProviderType};

/// Routes queries to the best currently-usable provider.
pub struct Router {
    registry: Arc<ProviderRegistry>,
    preferred: Mutex<Option<String>>,
    /// One breaker per provider id, created on first reference and never
    /// removed. Single lock makes concurrent lazy creation race-free.
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Router {
    /// Create a router over a registry with no preferred provider.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            preferred: Mutex::new(None),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a router with an initial preferred provider id.
    pub fn with_preferred(registry: Arc<ProviderRegistry>, preferred: impl Into<String>) -> Self {
        let router = Self::new(registry);
        *router.preferred.try_lock().expect("new router is uncontended") =
            Some(preferred.into());
        router
    }

    /// Change the preferred provider id.
    pub async fn set_preferred(&self, id: impl Into<String>) {
        *self.preferred.lock().await = Some(id.into());
    }

    /// Current preferred provider id.
    pub async fn preferred(&self) -> Option<String> {
        self.preferred.lock().await.clone()
    }

    /// The registry this router resolves against.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The circuit breaker for a provider id, created lazily on first
    /// reference. Entries are append-only for the process lifetime.
    pub async fn breaker_for(&self, id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(id)))
            .clone()
    }

    /// Build the ordered, deduplicated fallback chain.
    ///
    /// 1. Preferred provider, if registered, available, and its breaker
    ///    admits a call.
    /// 2. All other available cloud providers in registration order, each
    ///    gated by its own breaker.
    /// 3. Exactly one available local provider (breaker-exempt), if not
    ///    already present.
    ///
    /// An empty registry, or every cloud breaker open with no local provider,
    /// yields an empty chain — never an error.
    pub async fn resolve_all(&self) -> Vec<Arc<dyn AiProvider>> {
        let available = self.registry.available_providers().await;
        let preferred_id = self.preferred.lock().await.clone();

        let mut chain: Vec<Arc<dyn AiProvider>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(ref id) = preferred_id {
            if let Some(provider) = available.iter().find(|p| p.id() == id) {
                if self.breaker_for(id).await.can_execute().await {
                    seen.insert(id.clone());
                    chain.push(provider.clone());
                } else {
                    debug!(provider = %id, "preferred provider skipped, breaker open");
                }
            }
        }

        for provider in &available {
            let id = provider.id();
            if provider.provider_type() != ProviderType::Cloud || seen.contains(id) {
                continue;
            }
            if self.breaker_for(id).await.can_execute().await {
                seen.insert(id.to_string());
                chain.push(provider.clone());
            } else {
                debug!(provider = %id, "cloud provider skipped, breaker open");
            }
        }

        // A preferred local already fills the single local slot.
        let has_local = chain
            .iter()
            .any(|p| p.provider_type() == ProviderType::Local);
        if !has_local {
            if let Some(local) = available
                .iter()
                .find(|p| p.provider_type() == ProviderType::Local && !seen.contains(p.id()))
            {
                chain.push(local.clone());
            }
        }

        debug!(
            chain = ?chain.iter().map(|p| p.id()).collect::<Vec<_>>(),
            "fallback chain resolved"
        );
        chain
    }

    /// First element of the same priority order, or `None` if the chain is
    /// empty.
    pub async fn resolve(&self) -> Option<Arc<dyn AiProvider>> {
        self.resolve_all().await.into_iter().next()
    }
}
