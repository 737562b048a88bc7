//! Provider registry — named backends and their live availability.
//!
//! Providers are registered once at startup and live for the process
//! lifetime. The registry preserves registration order because the router's
//! fallback chain must be deterministic given a fixed registry snapshot.
//!
//! Availability is recomputed on every call, never cached: underlying
//! credentials or local-server reachability can change between queries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::traits::AiProvider;

/// Registry of named [`AiProvider`] implementations.
///
/// Read-mostly after startup; registration happens once during wiring.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
    /// Registration order, deduplicated. Drives chain determinism.
    order: Vec<String>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider by its own id. Re-registering an id replaces the
    /// previous instance and keeps its original position in iteration order.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        let id = provider.id().to_string();
        if self.providers.insert(id.clone(), provider).is_none() {
            self.order.push(id.clone());
        }
        debug!(provider = %id, "provider registered");
    }

    /// O(1) lookup by id.
    pub fn provider(&self, id: &str) -> Option<Arc<dyn AiProvider>> {
        self.providers.get(id).cloned()
    }

    /// Whether an id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// All providers in registration order.
    pub fn providers(&self) -> Vec<Arc<dyn AiProvider>> {
        self.order
            .iter()
            .filter_map(|id| self.providers.get(id).cloned())
            .collect()
    }

    /// Providers that are currently available, in registration order.
    /// Probes `is_available` on each call by design.
    pub async fn available_providers(&self) -> Vec<Arc<dyn AiProvider>> {
        let mut available = Vec::new();
        for provider in self.providers() {
            if provider.is_available().await {
                available.push(provider);
            }
        }
        available
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    #[tokio::test]
    async fn register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::cloud("cloud-a")));

        assert!(registry.contains("cloud-a"));
        assert!(registry.provider("cloud-a").is_some());
        assert!(registry.provider("unknown").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn reregistration_is_idempotent_and_keeps_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::cloud("a")));
        registry.register(Arc::new(MockProvider::cloud("b")));
        registry.register(Arc::new(MockProvider::cloud("a")));

        assert_eq!(registry.len(), 2);
        let ids: Vec<_> = registry.providers().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn availability_recomputed_each_call() {
        let mut registry = ProviderRegistry::new();
        let provider = Arc::new(MockProvider::cloud("flaky"));
        registry.register(provider.clone());

        assert_eq!(registry.available_providers().await.len(), 1);

        provider.set_available(false);
        assert!(registry.available_providers().await.is_empty());

        provider.set_available(true);
        assert_eq!(registry.available_providers().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_lists() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.providers().is_empty());
        assert!(registry.available_providers().await.is_empty());
    }
}
