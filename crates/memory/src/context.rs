//! Per-session memory: ties the recency and semantic tiers together,
//! implements the `is_semantic_needed` short-circuit, and assembles
//! retrieved turns into the flat context block a prompt builder consumes.
//!
//! `MemoryContext::render()` is supplemented beyond `spec.md` §4.7 —
//! grounded in the teacher's "assemble a context section from retrieved
//! pieces" pattern (`contextpack::builder`) — and returns structured data
//! with a default `Display`, not authored prompt copy, which stays out of
//! scope.

use std::fmt;

use ao_domain::config::MemoryConfig;
use ao_domain::error::Result;
use ao_domain::tool::Message;

use crate::recency::{RecencyStore, TurnRecord};
use crate::semantic::{Embedder, SemanticIndex, SemanticMatch};

/// One session's memory: a recency tier and a semantic tier sharing the
/// same appended turns.
pub struct MemoryStore {
    config: MemoryConfig,
    recency: RecencyStore,
    semantic: SemanticIndex,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        let semantic = SemanticIndex::new(config.semantic_pool_size);
        Self {
            config,
            recency: RecencyStore::new(),
            semantic,
        }
    }

    /// Append a turn to the recency tier and, if an embedder is configured,
    /// index it for semantic retrieval. Embedding failures are logged and
    /// otherwise swallowed — a missing embedding degrades retrieval, it
    /// must never block the conversation from continuing.
    pub async fn append(&self, message: Message, embedder: Option<&dyn Embedder>) -> String {
        let message_id = self.recency.append(message.clone());
        if let Some(embedder) = embedder {
            if let Err(e) = self.semantic.index(embedder, &message_id, &message).await {
                tracing::warn!(error = %e, message_id = %message_id, "failed to index message for semantic recall");
            }
        }
        message_id
    }

    /// Whether the recency tier alone answers `query` well enough that the
    /// semantic tier should be skipped (§4.7). Compares the query's
    /// embedding against the recency window's own best match — if the
    /// caller has no embedder available, semantic retrieval can't run
    /// anyway, so this reports `false` (not needed, because unavailable).
    pub async fn is_semantic_needed(&self, embedder: &dyn Embedder, query: &str) -> Result<bool> {
        let recent = self.recency.last_n(self.config.recency_window);
        if recent.is_empty() {
            return Ok(true);
        }
        let query_embedding = embedder.embed(query).await?;
        let mut best = 0.0f32;
        for turn in &recent {
            let text = extract_text(&turn.message);
            let turn_embedding = embedder.embed(&text).await?;
            let sim = crate::semantic::best_similarity(&[turn_embedding], &query_embedding);
            if sim > best {
                best = sim;
            }
        }
        Ok(best < self.config.semantic_similarity_threshold)
    }

    /// Retrieve context for `query`: always the recency window, plus the
    /// semantic tier's top-K only if `is_semantic_needed` says it's
    /// warranted (or if no embedder is available, semantic retrieval is
    /// simply skipped).
    pub async fn recall(&self, embedder: Option<&dyn Embedder>, query: &str) -> Result<MemoryContext> {
        let recency = self.recency.last_n(self.config.recency_window);

        let semantic = match embedder {
            Some(embedder) => {
                if self.is_semantic_needed(embedder, query).await? {
                    self.semantic.search(embedder, query, self.config.semantic_top_k).await?
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        };

        Ok(MemoryContext { recency, semantic })
    }
}

/// The retrieved turns for one recall, ready to be rendered into a prompt
/// or inspected directly.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub recency: Vec<TurnRecord>,
    pub semantic: Vec<SemanticMatch>,
}

impl MemoryContext {
    /// Flat text block: recency turns in append order, then any
    /// semantic-only matches not already covered by the recency window.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        let recency_ids: std::collections::HashSet<&str> =
            self.recency.iter().map(|t| t.message_id.as_str()).collect();

        for turn in &self.recency {
            lines.push(format!("[{}] {}: {}", turn.timestamp.to_rfc3339(), role_label(&turn.message), extract_text(&turn.message)));
        }

        let extra: Vec<&SemanticMatch> = self
            .semantic
            .iter()
            .filter(|m| !recency_ids.contains(m.message_id.as_str()))
            .collect();

        if !extra.is_empty() {
            lines.push("---".to_string());
            for m in extra {
                lines.push(format!("(recalled, similarity {:.2}) {}: {}", m.similarity, role_label(&m.message), extract_text(&m.message)));
            }
        }

        lines.join("\n")
    }
}

impl fmt::Display for MemoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn role_label(message: &Message) -> &'static str {
    match message.role {
        ao_domain::tool::Role::System => "system",
        ao_domain::tool::Role::User => "user",
        ao_domain::tool::Role::Assistant => "assistant",
        ao_domain::tool::Role::Tool => "tool",
    }
}

fn extract_text(message: &Message) -> String {
    message.content.text().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let len = text.len() as f32;
            let first = text.bytes().next().unwrap_or(0) as f32;
            Ok(vec![len, first, 1.0])
        }
    }

    #[tokio::test]
    async fn recall_without_embedder_returns_recency_only() {
        let store = MemoryStore::new(MemoryConfig::default());
        store.append(Message::user("hello there"), None).await;
        let ctx = store.recall(None, "hello there").await.unwrap();
        assert_eq!(ctx.recency.len(), 1);
        assert!(ctx.semantic.is_empty());
    }

    #[tokio::test]
    async fn is_semantic_needed_false_when_query_matches_recent_turn_exactly() {
        let store = MemoryStore::new(MemoryConfig::default());
        let embedder = FixedEmbedder;
        store.append(Message::user("the quick brown fox"), Some(&embedder)).await;
        let needed = store.is_semantic_needed(&embedder, "the quick brown fox").await.unwrap();
        assert!(!needed);
    }

    #[tokio::test]
    async fn is_semantic_needed_true_with_empty_recency() {
        let store = MemoryStore::new(MemoryConfig::default());
        let embedder = FixedEmbedder;
        assert!(store.is_semantic_needed(&embedder, "anything").await.unwrap());
    }

    #[tokio::test]
    async fn render_lists_recency_turns_in_order() {
        let store = MemoryStore::new(MemoryConfig::default());
        store.append(Message::user("first"), None).await;
        store.append(Message::assistant("second"), None).await;
        let ctx = store.recall(None, "first").await.unwrap();
        let rendered = ctx.render();
        let first_pos = rendered.find("first").unwrap();
        let second_pos = rendered.find("second").unwrap();
        assert!(first_pos < second_pos);
    }

    #[tokio::test]
    async fn render_appends_semantic_only_matches_after_separator() {
        let recency_only = vec![];
        let semantic_only = vec![SemanticMatch {
            message_id: "m1".into(),
            message: Message::user("recalled turn"),
            similarity: 0.8,
        }];
        let ctx = MemoryContext {
            recency: recency_only,
            semantic: semantic_only,
        };
        let rendered = ctx.render();
        assert!(rendered.contains("---"));
        assert!(rendered.contains("recalled turn"));
    }
}
