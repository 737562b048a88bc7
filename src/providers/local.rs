//! On-device backend speaking the OpenAI-compatible completions surface
//! exposed by llama-server and Ollama.
//!
//! # Environment Variables
//!
//! - `LOCAL_LLM_URL`: server base URL (default: `http://localhost:11434/v1`)
//! - `LOCAL_LLM_MODEL`: model to request (default: `qwen2.5:3b`)
//!
//! Local inference is slow but private: nothing leaves the machine, so the
//! fallback chain keeps one local provider as the breaker-exempt last resort.

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    parse_tags, render_context, sse_answer_stream, ANSWER_SYSTEM_PROMPT, TAG_SYSTEM_PROMPT,
};
use crate::error::{AiError, Result};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::traits::{AiProvider, Capability, ProviderType};
use crate::types::RagContextItem;

const DEFAULT_LOCAL_URL: &str = "http://localhost:11434/v1";
const DEFAULT_LOCAL_MODEL: &str = "qwen2.5:3b";
// Local generation on CPU can legitimately take minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_MAX_TOKENS: usize = 512;

const LOCAL_CAPABILITIES: &[Capability] = &[
    Capability::TextGeneration,
    Capability::Streaming,
    Capability::Tagging,
];

/// On-device OpenAI-compatible provider.
pub struct LocalProvider {
    id: String,
    display_name: String,
    client: Client,
    probe_client: Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    limiter: RateLimiter,
}

/// Builder for [`LocalProvider`].
pub struct LocalProviderBuilder {
    id: String,
    display_name: String,
    base_url: String,
    model: String,
    max_tokens: usize,
    timeout: Duration,
    rate_limit: RateLimiterConfig,
}

impl Default for LocalProviderBuilder {
    fn default() -> Self {
        Self {
            id: "local".to_string(),
            display_name: "Local Model".to_string(),
            base_url: DEFAULT_LOCAL_URL.to_string(),
            model: DEFAULT_LOCAL_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            rate_limit: RateLimiterConfig::local_model(),
        }
    }
}

impl LocalProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn build(self) -> Result<LocalProvider> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AiError::Network(e.to_string()))?;
        let probe_client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| AiError::Network(e.to_string()))?;

        Ok(LocalProvider {
            id: self.id,
            display_name: self.display_name,
            client,
            probe_client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            model: self.model,
            max_tokens: self.max_tokens,
            limiter: RateLimiter::new(self.rate_limit),
        })
    }
}

impl LocalProvider {
    /// Build from `LOCAL_LLM_URL` and `LOCAL_LLM_MODEL`, with defaults for a
    /// stock Ollama install.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("LOCAL_LLM_URL").unwrap_or_else(|_| DEFAULT_LOCAL_URL.to_string());
        let model =
            std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| DEFAULT_LOCAL_MODEL.to_string());

        LocalProviderBuilder::new()
            .base_url(base_url)
            .model(model)
            .build()
    }

    pub fn builder() -> LocalProviderBuilder {
        LocalProviderBuilder::new()
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn user_prompt(question: &str, context: &[RagContextItem], app_hint: Option<&str>) -> String {
        let mut prompt = String::new();
        if let Some(app) = app_hint {
            prompt.push_str(&format!("The user is currently in {}.\n", app));
        }
        prompt.push_str("Clipboard items:\n");
        prompt.push_str(&render_context(context));
        prompt.push_str("\nQuestion: ");
        prompt.push_str(question);
        prompt
    }

    async fn send_chat(&self, system: &str, user: &str) -> Result<String> {
        self.limiter.acquire().await;

        let request = LocalChatRequest {
            model: self.model.clone(),
            messages: vec![
                LocalMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                LocalMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.3,
            stream: false,
        };

        let response = self
            .client
            .post(self.completions_url())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(200).collect();
            return Err(AiError::Api(format!("status {}: {}", status, detail)));
        }

        let parsed: LocalChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AiError::InvalidResponse("completion had no content".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct LocalChatRequest {
    model: String,
    messages: Vec<LocalMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct LocalMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    choices: Vec<LocalChoice>,
}

#[derive(Debug, Deserialize)]
struct LocalChoice {
    message: LocalChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct LocalChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl AiProvider for LocalProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
    }

    fn capabilities(&self) -> &[Capability] {
        LOCAL_CAPABILITIES
    }

    /// Live probe against the server's model listing with a short timeout.
    /// The server may be stopped or still loading between queries, so this
    /// is re-run on every availability check.
    async fn is_available(&self) -> bool {
        match self.probe_client.get(self.models_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "local server probe failed");
                false
            }
        }
    }

    async fn generate_answer(
        &self,
        question: &str,
        context: &[RagContextItem],
        app_hint: Option<&str>,
    ) -> Result<Option<String>> {
        let answer = self
            .send_chat(
                ANSWER_SYSTEM_PROMPT,
                &Self::user_prompt(question, context, app_hint),
            )
            .await?;
        Ok((!answer.is_empty()).then_some(answer))
    }

    async fn generate_tags(
        &self,
        content: &str,
        app_hint: Option<&str>,
        extra_context: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut prompt = String::new();
        if let Some(app) = app_hint {
            prompt.push_str(&format!("Copied from {}.\n", app));
        }
        if let Some(extra) = extra_context {
            prompt.push_str(extra);
            prompt.push('\n');
        }
        prompt.push_str("Snippet:\n");
        prompt.push_str(content);

        let reply = self.send_chat(TAG_SYSTEM_PROMPT, &prompt).await?;
        Ok(parse_tags(&reply))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream_answer(
        &self,
        question: &str,
        context: &[RagContextItem],
        app_hint: Option<&str>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        self.limiter.acquire().await;

        let request = LocalChatRequest {
            model: self.model.clone(),
            messages: vec![
                LocalMessage {
                    role: "system".to_string(),
                    content: ANSWER_SYSTEM_PROMPT.to_string(),
                },
                LocalMessage {
                    role: "user".to_string(),
                    content: Self::user_prompt(question, context, app_hint),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.3,
            stream: true,
        };

        let response = self
            .client
            .post(self.completions_url())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(200).collect();
            return Err(AiError::Api(format!("status {}: {}", status, detail)));
        }

        Ok(sse_answer_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_ollama() {
        let provider = LocalProvider::builder().build().unwrap();
        assert_eq!(provider.provider_type(), ProviderType::Local);
        assert_eq!(
            provider.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(provider.models_url(), "http://localhost:11434/v1/models");
    }

    #[tokio::test]
    async fn unreachable_server_reports_unavailable() {
        // Nothing listens on this port in the test environment.
        let provider = LocalProvider::builder()
            .base_url("http://127.0.0.1:59999/v1")
            .build()
            .unwrap();
        assert!(!provider.is_available().await);
    }

    #[test]
    fn no_vision_capability() {
        let provider = LocalProvider::builder().build().unwrap();
        assert!(!provider.has_capability(Capability::Vision));
        assert!(provider.has_capability(Capability::Streaming));
    }
}
