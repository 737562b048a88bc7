//! Provider trait for interchangeable AI backends.
//!
//! # WHY: Trait-Based Provider Abstraction
//!
//! The registry and router operate purely on `dyn AiProvider`, never needing
//! runtime type inspection:
//! - **Resilience**: the fallback chain swaps providers without code changes
//! - **Testing**: a scripted mock stands in for real transports
//! - **Cost control**: usage accounting attributes every call to one id
//!
//! Availability is recomputed on each query, not cached: credentials or
//! local-server reachability can change between calls.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};
use crate::types::{AnswerOutcome, RagContextItem};

/// Where a backend runs. Local providers are breaker-exempt in the fallback
/// chain: an on-device backend has no meaningful remote failure mode, so
/// gating it behind a retry-window breaker would wrongly withhold a
/// guaranteed-available fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Local,
    Cloud,
}

/// What a backend can do. Used by the orchestrator to pick dispatch paths
/// (streaming vs. one-shot, image-paste detection, tagging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    Streaming,
    Vision,
    Tagging,
}

/// An interchangeable AI answer/tagging backend.
///
/// Registered once at startup, alive for the process lifetime. Optional
/// operations default to `NotSupported` so a backend only implements what it
/// advertises in `capabilities()`.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable identifier, used as the breaker/limiter/usage key.
    fn id(&self) -> &str;

    /// Human-readable name for UI display.
    fn display_name(&self) -> &str;

    /// Local or cloud.
    fn provider_type(&self) -> ProviderType;

    /// Capability set advertised by this backend.
    fn capabilities(&self) -> &[Capability];

    /// Whether the backend can currently be called (credentials present or
    /// live probe passed). Recomputed on every call by design.
    async fn is_available(&self) -> bool;

    /// Answer a question given the privacy-filtered context.
    ///
    /// `Ok(None)` means the backend ran but produced no answer (e.g. empty
    /// completion); transport problems are errors.
    async fn generate_answer(
        &self,
        question: &str,
        context: &[RagContextItem],
        app_hint: Option<&str>,
    ) -> Result<Option<String>>;

    /// Answer variant with image-paste detection: the backend may point at a
    /// context item (1-based) to paste as an image instead of text.
    ///
    /// Default wraps [`generate_answer`](Self::generate_answer) with no image
    /// index; backends advertising [`Capability::Vision`] should override.
    async fn generate_answer_with_image(
        &self,
        question: &str,
        context: &[RagContextItem],
        app_hint: Option<&str>,
    ) -> Result<AnswerOutcome> {
        let answer = self.generate_answer(question, context, app_hint).await?;
        Ok(AnswerOutcome {
            answer,
            image_index: None,
        })
    }

    /// Suggest semantic tags for a piece of clipboard content.
    async fn generate_tags(
        &self,
        _content: &str,
        _app_hint: Option<&str>,
        _extra_context: Option<&str>,
    ) -> Result<Vec<String>> {
        Err(AiError::NotSupported("tag generation".to_string()))
    }

    /// Describe an image for indexing.
    async fn analyze_image(&self, _image: &[u8]) -> Result<Option<String>> {
        Err(AiError::NotSupported("image analysis".to_string()))
    }

    /// Whether [`stream_answer`](Self::stream_answer) is implemented.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream an answer as incremental text chunks. The consumer accumulates
    /// chunks into the cumulative partial answer.
    async fn stream_answer(
        &self,
        _question: &str,
        _context: &[RagContextItem],
        _app_hint: Option<&str>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        Err(AiError::NotSupported("streaming".to_string()))
    }

    /// Convenience capability check.
    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    #[async_trait]
    impl AiProvider for Minimal {
        fn id(&self) -> &str {
            "minimal"
        }
        fn display_name(&self) -> &str {
            "Minimal"
        }
        fn provider_type(&self) -> ProviderType {
            ProviderType::Cloud
        }
        fn capabilities(&self) -> &[Capability] {
            &[Capability::TextGeneration]
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn generate_answer(
            &self,
            _question: &str,
            _context: &[RagContextItem],
            _app_hint: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(Some("ok".to_string()))
        }
    }

    #[tokio::test]
    async fn optional_operations_default_to_not_supported() {
        let provider = Minimal;
        assert!(matches!(
            provider.generate_tags("content", None, None).await,
            Err(AiError::NotSupported(_))
        ));
        assert!(matches!(
            provider.analyze_image(&[]).await,
            Err(AiError::NotSupported(_))
        ));
        assert!(!provider.supports_streaming());
    }

    #[tokio::test]
    async fn image_variant_defaults_to_plain_answer() {
        let provider = Minimal;
        let outcome = provider
            .generate_answer_with_image("q", &[], None)
            .await
            .unwrap();
        assert_eq!(outcome.answer.as_deref(), Some("ok"));
        assert!(outcome.image_index.is_none());
    }

    #[test]
    fn capability_check() {
        let provider = Minimal;
        assert!(provider.has_capability(Capability::TextGeneration));
        assert!(!provider.has_capability(Capability::Vision));
    }
}
