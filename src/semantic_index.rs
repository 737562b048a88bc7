//! Async semantic-search index over clipboard items.
//!
//! Documents are upserted by id and searched by cosine similarity. The index
//! initializes lazily: writes submitted before readiness are queued and
//! flushed in submission order once initialization completes; no write is
//! ever dropped. Reads before readiness return an empty result set; "no
//! results yet" is a valid, recoverable state.
//!
//! Embedding generation sits behind the [`Embedder`] seam so the host can
//! plug a local GGUF model or a remote embeddings API; [`HashEmbedder`] is a
//! deterministic, dependency-free default good enough for lexical-overlap
//! recall.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;

/// Text-to-vector seam consumed by the index.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector dimension.
    fn dimension(&self) -> usize;

    /// One-time setup (model load, credential probe). Default is a no-op.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hashing embedder over character trigrams,
/// L2-normalized. No model download, stable across runs.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        for window in chars.windows(3) {
            let mut hasher = DefaultHasher::new();
            window.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    id: String,
    text: String,
}

#[derive(Default)]
struct IndexInner {
    ready: bool,
    init_in_flight: bool,
    pending: Vec<PendingWrite>,
    vectors: HashMap<String, Vec<f32>>,
    /// Live ids plus queued ids: O(1) "is this id indexed (or about to be)"
    /// for callers that must avoid double-processing.
    members: HashSet<String>,
}

/// Async document store supporting add/search/delete by similarity.
pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    inner: Mutex<IndexInner>,
}

impl SemanticIndex {
    /// Create an index over the given embedder. Not ready until
    /// [`initialize`](Self::initialize) completes.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            inner: Mutex::new(IndexInner::default()),
        }
    }

    /// Create an index over the default [`HashEmbedder`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(HashEmbedder::default()))
    }

    /// Initialize the embedder and flush queued writes in submission order.
    ///
    /// Guarded by an in-flight flag: a concurrent second call returns
    /// immediately without double-initializing. Any failure, during embedder
    /// setup or mid-flush, leaves the index not-ready with the unflushed
    /// writes still queued, so a retry picks up where this attempt stopped.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.ready || inner.init_in_flight {
                return Ok(());
            }
            inner.init_in_flight = true;
        }

        if let Err(err) = self.embedder.initialize().await {
            self.inner.lock().await.init_in_flight = false;
            return Err(err);
        }

        // Flush one write at a time, removing it from the queue only after
        // its embedding succeeds. A mid-flush failure keeps the remainder
        // queued for the next attempt; writes submitted during the flush are
        // drained by the same loop.
        let mut flushed = 0usize;
        loop {
            let next = {
                let inner = self.inner.lock().await;
                inner.pending.first().cloned()
            };
            let Some(write) = next else { break };

            let vector = match self.embedder.embed(&write.text).await {
                Ok(vector) => vector,
                Err(err) => {
                    self.inner.lock().await.init_in_flight = false;
                    return Err(err);
                }
            };

            let mut inner = self.inner.lock().await;
            // A delete (or delete + re-add) may have raced the embedding;
            // only consume the exact write that was embedded.
            if let Some(position) = inner
                .pending
                .iter()
                .position(|p| p.id == write.id && p.text == write.text)
            {
                inner.pending.remove(position);
            }
            if inner.members.contains(&write.id) {
                inner.vectors.insert(write.id, vector);
                flushed += 1;
            }
        }

        let mut inner = self.inner.lock().await;
        inner.init_in_flight = false;
        inner.ready = true;
        info!(flushed, "semantic index initialized");
        Ok(())
    }

    /// Whether the index is ready to serve reads.
    pub async fn is_ready(&self) -> bool {
        self.inner.lock().await.ready
    }

    /// Upsert one document. Re-adding an id replaces its vector. Before
    /// readiness the write is queued, never dropped.
    pub async fn add_document(&self, id: impl Into<String>, text: impl Into<String>) -> Result<()> {
        let id = id.into();
        let text = text.into();

        let ready = {
            let mut inner = self.inner.lock().await;
            inner.members.insert(id.clone());
            if !inner.ready {
                inner.pending.push(PendingWrite {
                    id: id.clone(),
                    text: text.clone(),
                });
                debug!(%id, "index not ready, write queued");
                return Ok(());
            }
            true
        };
        debug_assert!(ready);

        let vector = self.embedder.embed(&text).await?;
        let mut inner = self.inner.lock().await;
        inner.vectors.insert(id, vector);
        Ok(())
    }

    /// Upsert a batch of `(id, text)` documents in order.
    pub async fn add_documents(&self, items: Vec<(String, String)>) -> Result<()> {
        for (id, text) in items {
            self.add_document(id, text).await?;
        }
        Ok(())
    }

    /// Remove a document from both the pending queue (if not yet flushed)
    /// and the live index. Removing an unknown or not-yet-indexed id is
    /// safe and silent.
    pub async fn delete_document(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.pending.retain(|write| write.id != id);
        inner.vectors.remove(id);
        inner.members.remove(id);
    }

    /// O(1) membership check over live and queued ids.
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.members.contains(id)
    }

    /// Number of live plus queued documents.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.members.len()
    }

    /// Whether the index holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.members.is_empty()
    }

    /// Top-`limit` `(id, score)` pairs ranked by descending cosine
    /// similarity. Returns an empty list before the index is ready.
    /// Second-stage ranking (e.g. recency fusion) is the caller's concern.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        if !self.is_ready().await {
            debug!("search before index ready, returning empty result set");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;

        let inner = self.inner.lock().await;
        let mut scored: Vec<(String, f32)> = inner
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(&query_vector, vector)))
            .collect();
        drop(inner);

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_before_ready_are_empty_not_errors() {
        let index = SemanticIndex::in_memory();
        let hits = index.search("anything", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn queued_writes_flush_on_initialize() {
        let index = SemanticIndex::in_memory();
        index.add_document("a", "rust borrow checker").await.unwrap();
        index.add_document("b", "grocery list milk eggs").await.unwrap();
        assert!(index.contains("a").await);

        index.initialize().await.unwrap();
        assert!(index.is_ready().await);

        let hits = index.search("rust borrow checker", 5).await.unwrap();
        assert_eq!(hits.first().map(|(id, _)| id.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn upsert_replaces_vector() {
        let index = SemanticIndex::in_memory();
        index.initialize().await.unwrap();
        index.add_document("x", "rust compiler errors").await.unwrap();
        index.add_document("x", "banana bread recipe").await.unwrap();
        assert_eq!(index.len().await, 1);

        let hits = index.search("banana bread recipe", 1).await.unwrap();
        assert_eq!(hits[0].0, "x");
    }

    #[tokio::test]
    async fn delete_removes_queued_and_live() {
        let index = SemanticIndex::in_memory();
        index.add_document("queued", "pending text").await.unwrap();
        index.delete_document("queued").await;
        assert!(!index.contains("queued").await);

        index.initialize().await.unwrap();
        assert!(index.search("pending text", 5).await.unwrap().is_empty());

        index.add_document("live", "live text").await.unwrap();
        index.delete_document("live").await;
        assert!(index.search("live text", 5).await.unwrap().is_empty());

        // Unknown id is silent.
        index.delete_document("never-existed").await;
    }

    struct FlakyEmbedder {
        inner: HashEmbedder,
        fail_next_embed: std::sync::atomic::AtomicBool,
    }

    impl FlakyEmbedder {
        fn failing_once() -> Self {
            Self {
                inner: HashEmbedder::default(),
                fail_next_embed: std::sync::atomic::AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self
                .fail_next_embed
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(crate::error::AiError::Network(
                    "embedding backend unreachable".to_string(),
                ));
            }
            self.inner.embed(text).await
        }
    }

    #[tokio::test]
    async fn failed_flush_keeps_queued_writes_for_retry() {
        let index = SemanticIndex::new(Arc::new(FlakyEmbedder::failing_once()));
        index.add_document("a", "rust ownership notes").await.unwrap();
        index.add_document("b", "grocery list milk eggs").await.unwrap();

        // The first flush attempt dies on the first embedding.
        assert!(index.initialize().await.is_err());
        assert!(!index.is_ready().await);
        assert_eq!(index.len().await, 2);

        // A retry flushes everything that survived the failed attempt.
        index.initialize().await.unwrap();
        assert!(index.is_ready().await);

        let hits = index.search("rust ownership notes", 5).await.unwrap();
        assert_eq!(hits.first().map(|(id, _)| id.as_str()), Some("a"));
        assert!(index.contains("b").await);
        assert!(!index
            .search("grocery list milk eggs", 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn double_initialize_is_harmless() {
        let index = SemanticIndex::in_memory();
        index.initialize().await.unwrap();
        index.initialize().await.unwrap();
        assert!(index.is_ready().await);
    }

    #[tokio::test]
    async fn ranking_is_descending_by_similarity() {
        let index = SemanticIndex::in_memory();
        index.initialize().await.unwrap();
        index
            .add_documents(vec![
                ("close".into(), "meeting notes for the quarterly review".into()),
                ("far".into(), "zebra xylophone quartz".into()),
            ])
            .await
            .unwrap();

        let hits = index.search("quarterly review meeting", 2).await.unwrap();
        assert_eq!(hits[0].0, "close");
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        let same = cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]);
        assert!((same - 1.0).abs() < 1e-6);
    }
}
