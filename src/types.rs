//! Value types shared across the routing and RAG pipeline.
//!
//! `ClipItem` is the storage collaborator's view of one clipboard record.
//! `RagContextItem` is the transient, privacy-filtered projection of it that
//! is actually handed to a backend; it is never persisted by this crate.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// What kind of content a clipboard record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Image,
    Url,
    File,
}

/// One clipboard record as supplied by the storage collaborator.
///
/// The storage layer owns durability, favoriting and expiry; this crate only
/// joins these against semantic-search results and projects them into
/// [`RagContextItem`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipItem {
    /// Stable identifier, shared with the semantic index.
    pub id: String,

    /// Raw clipboard content (text, URL, or an image description).
    pub content: String,

    /// Ordered, non-unique semantic labels.
    pub tags: Vec<String>,

    /// Content kind.
    pub kind: ItemKind,

    /// When the item was captured.
    pub timestamp: SystemTime,

    /// Optional user-assigned title.
    pub title: Option<String>,

    /// Set by the sensitive-content detectors (a collaborator). Items with
    /// this flag never reach any backend payload.
    pub sensitive: bool,
}

impl ClipItem {
    /// Create a plain text item captured now.
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            tags: Vec::new(),
            kind: ItemKind::Text,
            timestamp: SystemTime::now(),
            title: None,
            sensitive: false,
        }
    }

    /// Set tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the content kind.
    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the capture timestamp.
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Mark the item sensitive.
    pub fn with_sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }
}

/// Bounded context entry handed to a backend alongside the user's question.
///
/// Immutable value produced from a [`ClipItem`]; the sensitive flag is gone
/// because flagged items are filtered out before this projection is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagContextItem {
    pub id: String,
    pub content: String,
    pub tags: Vec<String>,
    pub kind: ItemKind,
    pub timestamp: SystemTime,
    pub title: Option<String>,
}

impl From<&ClipItem> for RagContextItem {
    fn from(item: &ClipItem) -> Self {
        Self {
            id: item.id.clone(),
            content: item.content.clone(),
            tags: item.tags.clone(),
            kind: item.kind,
            timestamp: item.timestamp,
            title: item.title.clone(),
        }
    }
}

/// Outcome of one query through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// The synthesized answer, absent when every candidate failed.
    pub answer: Option<String>,

    /// 1-based index into `context_items` signaling "paste this image
    /// instead of text".
    pub image_index: Option<usize>,

    /// Exactly what was sent downstream for this call, in dispatch order.
    /// The caller uses this for UI highlighting.
    pub context_items: Vec<RagContextItem>,

    /// User-facing failure description, present iff `answer` is absent.
    pub error_message: Option<String>,
}

impl QueryResult {
    /// Successful result.
    pub fn answered(
        answer: impl Into<String>,
        image_index: Option<usize>,
        context_items: Vec<RagContextItem>,
    ) -> Self {
        Self {
            answer: Some(answer.into()),
            image_index,
            context_items,
            error_message: None,
        }
    }

    /// Failed result carrying a synthesized user-facing message.
    pub fn failed(message: impl Into<String>, context_items: Vec<RagContextItem>) -> Self {
        Self {
            answer: None,
            image_index: None,
            context_items,
            error_message: Some(message.into()),
        }
    }
}

/// Answer variant for backends with image-paste detection: the answer text
/// plus an optional 1-based index of the context item to paste as an image.
#[derive(Debug, Clone, Default)]
pub struct AnswerOutcome {
    pub answer: Option<String>,
    pub image_index: Option<usize>,
}

impl AnswerOutcome {
    /// Text-only answer.
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            image_index: None,
        }
    }

    /// Answer that points at a context image to paste.
    pub fn with_image_index(mut self, index: usize) -> Self {
        self.image_index = Some(index);
        self
    }
}
