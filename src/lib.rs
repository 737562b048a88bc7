//! cliprag - Resilient AI Backend Routing for Clipboard RAG
//!
//! The orchestration layer between a clipboard-history app and
//! interchangeable AI backends. The host app hands over its stored items and
//! a question; this crate retrieves the relevant items semantically, filters
//! out sensitive content, and walks a fallback chain of providers until one
//! answers.
//!
//! This crate provides:
//! - A provider abstraction over local and cloud backends
//! - Per-provider circuit breaking and token-bucket rate limiting
//! - A deterministic fallback-chain router (preferred → cloud → local)
//! - A RAG query orchestrator with streaming progress callbacks
//! - An in-process semantic-search index with lazy initialization
//! - Usage accounting per provider for cost display
//!
//! # Providers
//!
//! | Provider | Type | Streaming | Vision | Notes |
//! |----------|-------|-----------|--------|-------|
//! | Cloud | cloud | ✓ | ✓ | Any OpenAI-compatible API |
//! | Local | local | ✓ | | llama-server / Ollama |
//! | Mock | either | ✓ | | Testing (no network) |
//!
//! # Example
//!
//! ```ignore
//! use cliprag::{
//!     BackendChoice, CloudProvider, LocalProvider, ProviderRegistry,
//!     QueryOrchestrator, Router, SemanticIndex,
//! };
//! use std::sync::Arc;
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(CloudProvider::from_env()?));
//! registry.register(Arc::new(LocalProvider::from_env()?));
//!
//! let router = Arc::new(Router::with_preferred(Arc::new(registry), "cloud"));
//! let index = Arc::new(SemanticIndex::in_memory());
//! index.initialize().await?;
//!
//! let orchestrator = QueryOrchestrator::new(index, router);
//! let result = orchestrator
//!     .process_query("what was that error?", &items, BackendChoice::Auto, None, None)
//!     .await;
//! ```
//!
//! # See Also
//!
//! - [`crate::traits`] for the provider trait
//! - [`crate::router`] for fallback-chain semantics
//! - [`crate::orchestrator`] for the query pipeline

pub mod breaker;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod semantic_index;
pub mod traits;
pub mod types;
pub mod usage;

pub use breaker::{BreakerState, CircuitBreaker};
pub use error::{AiError, Result};
pub use orchestrator::{BackendChoice, QueryOrchestrator};
pub use providers::cloud::{CloudProvider, CloudProviderBuilder};
pub use providers::local::{LocalProvider, LocalProviderBuilder};
pub use providers::mock::{MockFailure, MockProvider};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use registry::ProviderRegistry;
pub use router::Router;
pub use semantic_index::{Embedder, HashEmbedder, SemanticIndex};
pub use traits::{AiProvider, Capability, ProviderType};
pub use types::{AnswerOutcome, ClipItem, ItemKind, QueryResult, RagContextItem};
pub use usage::{ProviderUsage, UsageEntry, UsageSummary, UsageTracker};
