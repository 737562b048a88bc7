//! Scripted provider for tests.
//!
//! Deterministic stand-in for a real backend: queued answers and failures,
//! togglable availability, word-by-word streaming, and call counting. Every
//! resilience test in this crate drives the router and orchestrator through
//! these.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{AiError, Result};
use crate::traits::{AiProvider, Capability, ProviderType};
use crate::types::{AnswerOutcome, RagContextItem};

/// Failure classes the mock can inject.
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Network,
    Timeout,
    Auth,
    Api,
    RateLimited,
}

impl MockFailure {
    fn into_error(self, message: &str) -> AiError {
        match self {
            MockFailure::Network => AiError::Network(message.to_string()),
            MockFailure::Timeout => AiError::Timeout,
            MockFailure::Auth => AiError::Auth(message.to_string()),
            MockFailure::Api => AiError::Api(message.to_string()),
            MockFailure::RateLimited => AiError::RateLimited(message.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum ScriptStep {
    Answer {
        text: String,
        image_index: Option<usize>,
    },
    Failure(MockFailure, String),
}

/// Scripted test provider.
#[derive(Clone)]
pub struct MockProvider {
    id: String,
    display_name: String,
    provider_type: ProviderType,
    capabilities: Vec<Capability>,
    available: Arc<AtomicBool>,
    script: Arc<Mutex<Vec<ScriptStep>>>,
    call_count: Arc<AtomicUsize>,
    last_context: Arc<Mutex<Vec<RagContextItem>>>,
}

impl MockProvider {
    fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        let id = id.into();
        Self {
            display_name: format!("Mock {}", id),
            id,
            provider_type,
            capabilities: vec![
                Capability::TextGeneration,
                Capability::Streaming,
                Capability::Tagging,
            ],
            available: Arc::new(AtomicBool::new(true)),
            script: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            last_context: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cloud-typed mock.
    pub fn cloud(id: impl Into<String>) -> Self {
        Self::new(id, ProviderType::Cloud)
    }

    /// Local-typed mock.
    pub fn local(id: impl Into<String>) -> Self {
        Self::new(id, ProviderType::Local)
    }

    /// Override the advertised capability set.
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Toggle availability; read back on each `is_available` probe.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue an answer.
    pub fn push_answer(&self, text: impl Into<String>) {
        self.script
            .try_lock()
            .expect("script mutated during dispatch")
            .push(ScriptStep::Answer {
                text: text.into(),
                image_index: None,
            });
    }

    /// Queue an answer pointing at a context image (1-based).
    pub fn push_image_answer(&self, text: impl Into<String>, image_index: usize) {
        self.script
            .try_lock()
            .expect("script mutated during dispatch")
            .push(ScriptStep::Answer {
                text: text.into(),
                image_index: Some(image_index),
            });
    }

    /// Queue an injected failure.
    pub fn push_failure(&self, kind: MockFailure, message: impl Into<String>) {
        self.script
            .try_lock()
            .expect("script mutated during dispatch")
            .push(ScriptStep::Failure(kind, message.into()));
    }

    /// How many generate/stream calls reached this provider.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Context item ids seen by the most recent call. Used to assert the
    /// privacy filter.
    pub async fn seen_context_ids(&self) -> Vec<String> {
        self.last_context
            .lock()
            .await
            .iter()
            .map(|item| item.id.clone())
            .collect()
    }

    async fn next_step(&self, context: &[RagContextItem]) -> ScriptStep {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().await = context.to_vec();
        let mut script = self.script.lock().await;
        if script.is_empty() {
            ScriptStep::Answer {
                text: format!("answer from {}", self.id),
                image_index: None,
            }
        } else {
            script.remove(0)
        }
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn generate_answer(
        &self,
        _question: &str,
        context: &[RagContextItem],
        _app_hint: Option<&str>,
    ) -> Result<Option<String>> {
        match self.next_step(context).await {
            ScriptStep::Answer { text, .. } => Ok(Some(text)),
            ScriptStep::Failure(kind, message) => Err(kind.into_error(&message)),
        }
    }

    async fn generate_answer_with_image(
        &self,
        _question: &str,
        context: &[RagContextItem],
        _app_hint: Option<&str>,
    ) -> Result<AnswerOutcome> {
        match self.next_step(context).await {
            ScriptStep::Answer { text, image_index } => Ok(AnswerOutcome {
                answer: Some(text),
                image_index,
            }),
            ScriptStep::Failure(kind, message) => Err(kind.into_error(&message)),
        }
    }

    async fn generate_tags(
        &self,
        _content: &str,
        _app_hint: Option<&str>,
        _extra_context: Option<&str>,
    ) -> Result<Vec<String>> {
        match self.next_step(&[]).await {
            ScriptStep::Answer { text, .. } => Ok(text
                .split(',')
                .map(|tag| tag.trim().to_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect()),
            ScriptStep::Failure(kind, message) => Err(kind.into_error(&message)),
        }
    }

    fn supports_streaming(&self) -> bool {
        self.capabilities.contains(&Capability::Streaming)
    }

    async fn stream_answer(
        &self,
        _question: &str,
        context: &[RagContextItem],
        _app_hint: Option<&str>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        match self.next_step(context).await {
            ScriptStep::Answer { text, .. } => {
                let chunks: Vec<Result<String>> = text
                    .split_inclusive(' ')
                    .map(|chunk| Ok(chunk.to_string()))
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            ScriptStep::Failure(kind, message) => Err(kind.into_error(&message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_answers_in_order() {
        let provider = MockProvider::cloud("m");
        provider.push_answer("first");
        provider.push_answer("second");

        assert_eq!(
            provider.generate_answer("q", &[], None).await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(
            provider.generate_answer("q", &[], None).await.unwrap(),
            Some("second".to_string())
        );
        // Exhausted script falls back to a default answer.
        assert!(provider
            .generate_answer("q", &[], None)
            .await
            .unwrap()
            .is_some());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn injected_failure_surfaces() {
        let provider = MockProvider::cloud("m");
        provider.push_failure(MockFailure::Network, "connection refused");
        let err = provider.generate_answer("q", &[], None).await.unwrap_err();
        assert!(matches!(err, AiError::Network(_)));
    }

    #[tokio::test]
    async fn streaming_chunks_accumulate_to_answer() {
        let provider = MockProvider::cloud("m");
        provider.push_answer("three word answer");
        let mut stream = provider.stream_answer("q", &[], None).await.unwrap();
        let mut acc = String::new();
        while let Some(chunk) = stream.next().await {
            acc.push_str(&chunk.unwrap());
        }
        assert_eq!(acc, "three word answer");
    }

    #[tokio::test]
    async fn image_answer_carries_index() {
        let provider = MockProvider::cloud("m");
        provider.push_image_answer("paste the screenshot", 2);
        let outcome = provider
            .generate_answer_with_image("q", &[], None)
            .await
            .unwrap();
        assert_eq!(outcome.image_index, Some(2));
    }

    #[tokio::test]
    async fn tags_parse_from_scripted_reply() {
        let provider = MockProvider::cloud("m");
        provider.push_answer("Code, Rust , snippet");
        let tags = provider
            .generate_tags("fn main() {}", None, None)
            .await
            .unwrap();
        assert_eq!(tags, vec!["code", "rust", "snippet"]);
    }
}
