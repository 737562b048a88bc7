//! RAG query pipeline: retrieve, join, backfill, filter, dispatch.
//!
//! `process_query` is the single entry point the host app calls. It owns the
//! full pipeline: semantic retrieval over the index, joining hits back to
//! stored items, backfilling thin results with recent items, stripping
//! sensitive content, then walking the router's fallback chain sequentially
//! until one backend produces an answer.
//!
//! The chain is resolved once per query; [`Router::resolve_all`] performs the
//! breaker gating, so the dispatch loop below only records outcomes. Failures
//! are never fanned out speculatively: each transport failure lands on
//! exactly one breaker before the next candidate is tried, and usage
//! accounting attributes each call to exactly one provider.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{AiError, Result};
use crate::router::Router;
use crate::semantic_index::SemanticIndex;
use crate::traits::AiProvider;
use crate::types::{AnswerOutcome, ClipItem, ItemKind, QueryResult, RagContextItem};
use crate::usage::UsageTracker;

/// Oversized retrieval limit, tolerating downstream filtering.
const SEARCH_CANDIDATE_LIMIT: usize = 30;

/// Context is backfilled with recent items up to this floor so semantic
/// under-matching never hands the model a near-empty context.
const MIN_CONTEXT_ITEMS: usize = 5;

/// Flat token estimate for the rendered context block.
const CONTEXT_TOKEN_OVERHEAD: usize = 200;

/// Flat token estimate for the tagging prompt.
const TAG_TOKEN_OVERHEAD: usize = 40;

/// Which backend a query should go to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendChoice {
    /// Walk the router's fallback chain from the front.
    #[default]
    Auto,
    /// Try this provider first, then fall back through the rest of the chain.
    Provider(String),
}

/// Clears the busy flag on every exit path, including early returns.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives queries from retrieval through dispatch.
pub struct QueryOrchestrator {
    index: Arc<SemanticIndex>,
    router: Option<Arc<Router>>,
    usage: Arc<UsageTracker>,
    busy: AtomicBool,
}

impl QueryOrchestrator {
    pub fn new(index: Arc<SemanticIndex>, router: Arc<Router>) -> Self {
        Self {
            index,
            router: Some(router),
            usage: Arc::new(UsageTracker::new()),
            busy: AtomicBool::new(false),
        }
    }

    /// Orchestrator with no router wired up. Queries fail fast with the
    /// "not configured" message; indexing still works.
    pub fn without_router(index: Arc<SemanticIndex>) -> Self {
        Self {
            index,
            router: None,
            usage: Arc::new(UsageTracker::new()),
            busy: AtomicBool::new(false),
        }
    }

    /// Share an external usage tracker instead of the internal one.
    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn index(&self) -> &Arc<SemanticIndex> {
        &self.index
    }

    pub fn router(&self) -> Option<&Arc<Router>> {
        self.router.as_ref()
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Whether a query is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Index one item: title, content, and tags folded into the document
    /// text so any of them can match a query.
    pub async fn index_item(&self, item: &ClipItem) -> Result<()> {
        let mut text = String::new();
        if let Some(ref title) = item.title {
            text.push_str(title);
            text.push('\n');
        }
        text.push_str(&item.content);
        if !item.tags.is_empty() {
            text.push('\n');
            text.push_str(&item.tags.join(" "));
        }
        self.index.add_document(&item.id, text).await
    }

    /// Remove an item from the index. Unknown ids are silent.
    pub async fn remove_item(&self, id: &str) {
        self.index.delete_document(id).await;
    }

    /// Run one query end to end. See the module docs for the pipeline.
    ///
    /// `on_partial` is invoked with the cumulative partial answer after each
    /// streamed chunk when the dispatched backend supports streaming; the
    /// final complete answer is still returned in the result. The returned
    /// `context_items` are exactly what was sent downstream.
    pub async fn process_query(
        &self,
        query: &str,
        known_items: &[ClipItem],
        backend: BackendChoice,
        app_hint: Option<&str>,
        on_partial: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> QueryResult {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return QueryResult::failed("a query is already being processed", Vec::new());
        }
        let _guard = BusyGuard(&self.busy);

        let Some(router) = self.router.as_ref() else {
            return QueryResult::failed(AiError::NotConfigured.user_summary(), Vec::new());
        };

        let context = self.assemble_context(query, known_items).await;

        let mut chain = router.resolve_all().await;
        if let BackendChoice::Provider(ref id) = backend {
            if let Some(position) = chain.iter().position(|p| p.id() == id) {
                let selected = chain.remove(position);
                chain.insert(0, selected);
            } else {
                debug!(provider = %id, "selected backend not usable, walking chain as-is");
            }
        }
        if chain.is_empty() {
            return QueryResult::failed("no AI backend is available right now", context);
        }

        let approx_tokens = query.len() / 4 + CONTEXT_TOKEN_OVERHEAD;
        let mut attempts = 0usize;
        let mut last_error: Option<AiError> = None;

        for provider in chain {
            let breaker = router.breaker_for(provider.id()).await;
            attempts += 1;
            self.usage.record_call(provider.id(), approx_tokens).await;

            match self
                .dispatch_one(provider.as_ref(), query, &context, app_hint, on_partial)
                .await
            {
                Ok(outcome) if outcome.answer.is_some() || outcome.image_index.is_some() => {
                    breaker.record_success().await;
                    info!(provider = %provider.id(), "query answered");
                    return QueryResult {
                        answer: outcome.answer,
                        image_index: outcome.image_index,
                        context_items: context,
                        error_message: None,
                    };
                }
                Ok(_) => {
                    // The call went through but produced nothing; not the
                    // transport's fault.
                    breaker.record_success().await;
                    debug!(provider = %provider.id(), "backend produced no answer");
                    last_error = Some(AiError::InvalidResponse(
                        "backend produced no answer".to_string(),
                    ));
                }
                Err(err) => {
                    if err.is_transport() {
                        breaker.record_failure().await;
                        warn!(provider = %provider.id(), error = %err, "backend call failed");
                    }
                    last_error = Some(err);
                }
            }
        }

        let message = match (attempts, last_error) {
            (_, None) => "no AI backend is available right now".to_string(),
            (1, Some(err)) => err.user_summary(),
            (_, Some(err)) => format!("all AI backends failed ({})", err.user_summary()),
        };
        QueryResult::failed(message, context)
    }

    /// Generate tags for a piece of content through the same fallback chain.
    pub async fn generate_tags(
        &self,
        content: &str,
        app_hint: Option<&str>,
        extra_context: Option<&str>,
    ) -> Result<Vec<String>> {
        let router = self.router.as_ref().ok_or(AiError::NotConfigured)?;
        let approx_tokens = content.len() / 4 + TAG_TOKEN_OVERHEAD;

        // Distinct from the no-router case: the router exists, but the chain
        // may hold no tagging-capable backend.
        let mut last_error = AiError::NotSupported("tag generation".to_string());
        for provider in router.resolve_all().await {
            if !provider.has_capability(crate::traits::Capability::Tagging) {
                continue;
            }
            let breaker = router.breaker_for(provider.id()).await;
            self.usage.record_call(provider.id(), approx_tokens).await;

            match provider.generate_tags(content, app_hint, extra_context).await {
                Ok(tags) => {
                    breaker.record_success().await;
                    return Ok(tags);
                }
                Err(err) => {
                    if err.is_transport() {
                        breaker.record_failure().await;
                        warn!(provider = %provider.id(), error = %err, "tagging call failed");
                    }
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Retrieve, join, backfill, and privacy-filter the context for a query.
    ///
    /// Similarity-ranked hits come first (storage order is irrelevant); stale
    /// index ids with no matching stored item are dropped silently. Items
    /// flagged sensitive are stripped last, after backfill, so they can never
    /// appear in any backend payload.
    async fn assemble_context(&self, query: &str, known_items: &[ClipItem]) -> Vec<RagContextItem> {
        let hits = match self.index.search(query, SEARCH_CANDIDATE_LIMIT).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "semantic search failed, using recency only");
                Vec::new()
            }
        };

        let by_id: HashMap<&str, &ClipItem> =
            known_items.iter().map(|item| (item.id.as_str(), item)).collect();

        let mut selected: Vec<&ClipItem> = Vec::new();
        let mut selected_ids: HashSet<&str> = HashSet::new();
        for (id, _score) in &hits {
            if let Some(item) = by_id.get(id.as_str()) {
                if selected_ids.insert(item.id.as_str()) {
                    selected.push(item);
                }
            }
        }

        if selected.len() < MIN_CONTEXT_ITEMS {
            let mut by_recency: Vec<&ClipItem> = known_items.iter().collect();
            by_recency.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            for item in by_recency {
                if selected.len() >= MIN_CONTEXT_ITEMS {
                    break;
                }
                if selected_ids.insert(item.id.as_str()) {
                    selected.push(item);
                }
            }
        }

        selected
            .into_iter()
            .filter(|item| !item.sensitive)
            .map(RagContextItem::from)
            .collect()
    }

    /// One call against one provider. Streaming is preferred when the caller
    /// wants partial answers and the backend supports it; otherwise the
    /// image-paste variant is used when the context carries an image.
    async fn dispatch_one(
        &self,
        provider: &dyn AiProvider,
        query: &str,
        context: &[RagContextItem],
        app_hint: Option<&str>,
        on_partial: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<AnswerOutcome> {
        if let Some(callback) = on_partial {
            if provider.supports_streaming() {
                let mut stream = provider.stream_answer(query, context, app_hint).await?;
                let mut full = String::new();
                while let Some(chunk) = stream.next().await {
                    // A mid-stream failure discards the partial text and
                    // falls through to the next candidate.
                    full.push_str(&chunk?);
                    callback(&full);
                }
                return Ok(AnswerOutcome {
                    answer: (!full.is_empty()).then_some(full),
                    image_index: None,
                });
            }
        }

        if context.iter().any(|item| item.kind == ItemKind::Image) {
            return provider
                .generate_answer_with_image(query, context, app_hint)
                .await;
        }

        let answer = provider.generate_answer(query, context, app_hint).await?;
        Ok(AnswerOutcome {
            answer,
            image_index: None,
        })
    }
}
