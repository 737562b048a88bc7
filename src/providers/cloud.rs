//! Cloud backend over an OpenAI-compatible chat completions API.
//!
//! Speaks the generic `/chat/completions` JSON shape directly; any vendor
//! exposing that surface (or a proxy in front of one) works unchanged.
//!
//! # Environment Variables
//!
//! - `LLM_API_URL`: API base URL (e.g. `https://api.example.com/v1`)
//! - `LLM_API_KEY`: bearer token; availability is keyed on its presence
//! - `LLM_MODEL_NAME`: model to request (default: `gpt-4o-mini`)
//!
//! The provider owns its token-bucket rate limiter: every outbound call
//! acquires a permit inside the transport, so callers never need to know the
//! backend is quota-limited.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    parse_image_reply, parse_tags, render_context, sse_answer_stream, ANSWER_SYSTEM_PROMPT,
    IMAGE_PASTE_INSTRUCTION, TAG_SYSTEM_PROMPT,
};
use crate::error::{AiError, Result};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::traits::{AiProvider, Capability, ProviderType};
use crate::types::{AnswerOutcome, RagContextItem};

const DEFAULT_CLOUD_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_TOKENS: usize = 512;

const CLOUD_CAPABILITIES: &[Capability] = &[
    Capability::TextGeneration,
    Capability::Streaming,
    Capability::Vision,
    Capability::Tagging,
];

/// OpenAI-compatible cloud provider.
pub struct CloudProvider {
    id: String,
    display_name: String,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    limiter: RateLimiter,
}

/// Builder for [`CloudProvider`].
pub struct CloudProviderBuilder {
    id: String,
    display_name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    timeout: Duration,
    rate_limit: RateLimiterConfig,
}

impl Default for CloudProviderBuilder {
    fn default() -> Self {
        Self {
            id: "cloud".to_string(),
            display_name: "Cloud AI".to_string(),
            base_url: String::new(),
            api_key: String::new(),
            model: DEFAULT_CLOUD_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            rate_limit: RateLimiterConfig::cloud_api(),
        }
    }
}

impl CloudProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry id (also the breaker/usage key).
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

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
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

    /// Bounded per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn build(self) -> Result<CloudProvider> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AiError::Network(e.to_string()))?;

        Ok(CloudProvider {
            id: self.id,
            display_name: self.display_name,
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            limiter: RateLimiter::new(self.rate_limit),
        })
    }
}

impl CloudProvider {
    /// Build from `LLM_API_URL`, `LLM_API_KEY`, `LLM_MODEL_NAME`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("LLM_API_URL").unwrap_or_default();
        let api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        let model =
            std::env::var("LLM_MODEL_NAME").unwrap_or_else(|_| DEFAULT_CLOUD_MODEL.to_string());

        CloudProviderBuilder::new()
            .base_url(base_url)
            .api_key(api_key)
            .model(model)
            .build()
    }

    pub fn builder() -> CloudProviderBuilder {
        CloudProviderBuilder::new()
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn wire_messages(system: &str, user: &str) -> Vec<WireMessage> {
        vec![
            WireMessage {
                role: "system".to_string(),
                content: serde_json::Value::String(system.to_string()),
            },
            WireMessage {
                role: "user".to_string(),
                content: serde_json::Value::String(user.to_string()),
            },
        ]
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

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(system, user),
            max_tokens: self.max_tokens,
            temperature: 0.3,
            stream: false,
        };

        let mut call = self.client.post(self.completions_url()).json(&request);
        if !self.api_key.is_empty() {
            call = call.bearer_auth(&self.api_key);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AiError::InvalidResponse("completion had no content".to_string()))
    }

    fn status_error(status: reqwest::StatusCode, body: &str) -> AiError {
        let detail: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => AiError::Auth(format!("status {}", status)),
            429 => AiError::RateLimited(format!("status {}", status)),
            _ => AiError::Api(format!("status {}: {}", status, detail)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    // String for text turns, an array of content parts for vision turns.
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl AiProvider for CloudProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Cloud
    }

    fn capabilities(&self) -> &[Capability] {
        CLOUD_CAPABILITIES
    }

    /// Available iff credentials and an endpoint are configured. No network
    /// probe; reachability problems surface as transport failures and feed
    /// the circuit breaker instead.
    async fn is_available(&self) -> bool {
        !self.api_key.is_empty() && !self.base_url.is_empty()
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

    async fn generate_answer_with_image(
        &self,
        question: &str,
        context: &[RagContextItem],
        app_hint: Option<&str>,
    ) -> Result<AnswerOutcome> {
        let system = format!("{}\n{}", ANSWER_SYSTEM_PROMPT, IMAGE_PASTE_INSTRUCTION);
        let reply = self
            .send_chat(&system, &Self::user_prompt(question, context, app_hint))
            .await?;

        if let Some(index) = parse_image_reply(&reply, context.len()) {
            return Ok(AnswerOutcome {
                answer: None,
                image_index: Some(index),
            });
        }
        Ok(AnswerOutcome {
            answer: (!reply.is_empty()).then_some(reply),
            image_index: None,
        })
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

    async fn analyze_image(&self, image: &[u8]) -> Result<Option<String>> {
        self.limiter.acquire().await;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: serde_json::json!([
                    {"type": "text", "text": "Describe this image in one sentence for search indexing."},
                    {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{}", BASE64.encode(image))}}
                ]),
            }],
            max_tokens: self.max_tokens,
            temperature: 0.3,
            stream: false,
        };

        let mut call = self.client.post(self.completions_url()).json(&request);
        if !self.api_key.is_empty() {
            call = call.bearer_auth(&self.api_key);
        }
        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }
        let parsed: ChatResponse = response.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty()))
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

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(
                ANSWER_SYSTEM_PROMPT,
                &Self::user_prompt(question, context, app_hint),
            ),
            max_tokens: self.max_tokens,
            temperature: 0.3,
            stream: true,
        };

        let mut call = self.client.post(self.completions_url()).json(&request);
        if !self.api_key.is_empty() {
            call = call.bearer_auth(&self.api_key);
        }
        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        Ok(sse_answer_stream(response))
    }
}
