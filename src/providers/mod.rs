//! Concrete `AiProvider` implementations.

pub mod cloud;
pub mod local;
pub mod mock;

pub use cloud::CloudProvider;
pub use local::LocalProvider;
pub use mock::{MockFailure, MockProvider};

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AiError, Result};
use crate::types::{ItemKind, RagContextItem};

/// System prompt shared by the answer paths.
pub(crate) const ANSWER_SYSTEM_PROMPT: &str = "You are a clipboard assistant. \
Answer the user's question using only the numbered clipboard items below. \
Be concise. If none of the items are relevant, say so briefly.";

/// Extra instruction for backends with image-paste detection.
pub(crate) const IMAGE_PASTE_INSTRUCTION: &str = "If the best response is to \
paste one of the image items verbatim, reply with exactly IMAGE:<number> and \
nothing else.";

/// System prompt for the tagging path.
pub(crate) const TAG_SYSTEM_PROMPT: &str = "You label clipboard snippets. \
Reply with 2 to 5 short lowercase tags, comma separated, no explanations.";

/// Render the filtered context items as a numbered block. The numbering is
/// 1-based and matches the `image_index` contract in query results.
pub(crate) fn render_context(context: &[RagContextItem]) -> String {
    let mut block = String::new();
    for (position, item) in context.iter().enumerate() {
        let kind = match item.kind {
            ItemKind::Text => "text",
            ItemKind::Image => "image",
            ItemKind::Url => "url",
            ItemKind::File => "file",
        };
        block.push_str(&format!("[{}] ({})", position + 1, kind));
        if let Some(ref title) = item.title {
            block.push_str(&format!(" {}:", title));
        }
        block.push(' ');
        block.push_str(&item.content);
        if !item.tags.is_empty() {
            block.push_str(&format!(" (tags: {})", item.tags.join(", ")));
        }
        block.push('\n');
    }
    block
}

/// Parse a bare `IMAGE:<n>` reply into a 1-based context index, validated
/// against the context length.
pub(crate) fn parse_image_reply(reply: &str, context_len: usize) -> Option<usize> {
    let index: usize = reply.trim().strip_prefix("IMAGE:")?.trim().parse().ok()?;
    (1..=context_len).contains(&index).then_some(index)
}

/// Parse a comma/newline separated tag reply: trimmed, lowercased,
/// deduplicated, at most five.
pub(crate) fn parse_tags(reply: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for raw in reply.split([',', '\n']) {
        let tag = raw.trim().trim_matches(['-', '*', '.']).trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == 5 {
            break;
        }
    }
    tags
}

#[derive(Debug, Deserialize)]
struct SseEvent {
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    delta: SseDelta,
}

#[derive(Debug, Default, Deserialize)]
struct SseDelta {
    content: Option<String>,
}

/// Turn an OpenAI-compatible SSE response body into a stream of text deltas.
///
/// Parses `data:` lines, ends on `[DONE]`, skips keep-alives and events it
/// cannot decode, and surfaces transport failures as stream items so the
/// consumer can abort with partial text in hand.
pub(crate) fn sse_answer_stream(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let bytes = response.bytes_stream();
    futures::stream::unfold(
        (bytes, String::new()),
        |(mut bytes, mut buffer)| async move {
            loop {
                // Drain complete lines already buffered.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return None;
                    }
                    match serde_json::from_str::<SseEvent>(data) {
                        Ok(event) => {
                            if let Some(content) = event
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|choice| choice.delta.content)
                            {
                                if !content.is_empty() {
                                    return Some((Ok(content), (bytes, buffer)));
                                }
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "skipping unparsable stream event");
                        }
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(err)) => {
                        return Some((Err(AiError::from(err)), (bytes, String::new())));
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClipItem;

    #[test]
    fn context_block_numbers_from_one() {
        let items: Vec<RagContextItem> = [
            ClipItem::text("a", "first snippet"),
            ClipItem::text("b", "second snippet").with_tags(vec!["work".into()]),
        ]
        .iter()
        .map(RagContextItem::from)
        .collect();

        let block = render_context(&items);
        assert!(block.starts_with("[1] (text) first snippet"));
        assert!(block.contains("[2] (text) second snippet (tags: work)"));
    }

    #[test]
    fn image_reply_parses_and_validates_range() {
        assert_eq!(parse_image_reply("IMAGE:2", 3), Some(2));
        assert_eq!(parse_image_reply("  IMAGE: 1 ", 3), Some(1));
        assert_eq!(parse_image_reply("IMAGE:0", 3), None);
        assert_eq!(parse_image_reply("IMAGE:4", 3), None);
        assert_eq!(parse_image_reply("the answer is IMAGE:2", 3), None);
    }

    #[test]
    fn tag_reply_is_normalized_and_capped() {
        let tags = parse_tags("Code, RUST\n rust, snippet, one, two, three");
        assert_eq!(tags.len(), 5);
        assert_eq!(tags[0], "code");
        assert_eq!(tags[1], "rust");
        assert!(!tags.contains(&"three".to_string()));
    }
}
