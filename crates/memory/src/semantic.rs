//! Semantic similarity tier (§4.7): embed-on-append, cosine-similarity
//! top-K search over a bounded pool. Brute-force linear scan, grounded in
//! the teacher's `sessions::search::TranscriptIndex::search`
//! `sort_by`+`truncate` idiom — none of the pack repos reaches for an
//! ANN/vector-index crate for an in-memory, session-scoped pool this small.

use std::collections::HashMap;

use ao_domain::error::Result;
use ao_domain::tool::Message;
use async_trait::async_trait;
use parking_lot::RwLock;

/// The minimum cosine similarity a semantic match must clear to be
/// returned from `search` — distinct from `is_semantic_needed`'s
/// short-circuit threshold (§4.7 default 0.5 vs 0.35).
pub const MIN_MATCH_SIMILARITY: f32 = 0.5;

/// Embeds text into a dense vector. `ao-providers`' `ManagedProvider` can
/// serve as one directly — this is the same trait seam the teacher uses
/// for `LlmProvider::embeddings`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub message_id: String,
    pub message: Message,
    pub similarity: f32,
}

struct Entry {
    message: Message,
    embedding: Vec<f32>,
}

/// Embeds and indexes turns for one session, bounded to `pool_size` most
/// recent entries (oldest evicted first).
pub struct SemanticIndex {
    pool_size: usize,
    entries: RwLock<HashMap<String, Entry>>,
    order: RwLock<Vec<String>>,
}

impl SemanticIndex {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Embed and index one message, evicting the oldest entry if the pool
    /// is full. A no-op if `message_id` is already indexed (the
    /// per-message-id cache of §4.7).
    pub async fn index(&self, embedder: &dyn Embedder, message_id: &str, message: &Message) -> Result<()> {
        if self.entries.read().contains_key(message_id) {
            return Ok(());
        }
        let text = extract_text(message);
        let embedding = embedder.embed(&text).await?;

        let mut entries = self.entries.write();
        let mut order = self.order.write();
        entries.insert(
            message_id.to_string(),
            Entry {
                message: message.clone(),
                embedding,
            },
        );
        order.push(message_id.to_string());
        while order.len() > self.pool_size {
            let evicted = order.remove(0);
            entries.remove(&evicted);
        }
        Ok(())
    }

    /// Top-K matches for `query`, above `MIN_MATCH_SIMILARITY`, most
    /// similar first.
    pub async fn search(&self, embedder: &dyn Embedder, query: &str, top_k: usize) -> Result<Vec<SemanticMatch>> {
        let query_embedding = embedder.embed(query).await?;
        Ok(self.search_with_embedding(&query_embedding, top_k))
    }

    fn search_with_embedding(&self, query_embedding: &[f32], top_k: usize) -> Vec<SemanticMatch> {
        let entries = self.entries.read();
        let mut scored: Vec<SemanticMatch> = entries
            .iter()
            .filter_map(|(id, entry)| {
                let similarity = cosine_similarity(query_embedding, &entry.embedding);
                if similarity >= MIN_MATCH_SIMILARITY {
                    Some(SemanticMatch {
                        message_id: id.clone(),
                        message: entry.message.clone(),
                        similarity,
                    })
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Highest cosine similarity between `query_embedding` and any already
/// cached embedding, or `0.0` if the pool is empty — used by
/// `is_semantic_needed` without triggering a fresh embedder call for the
/// query itself when the caller already has the embedding.
pub fn best_similarity(entries_embeddings: &[Vec<f32>], query_embedding: &[f32]) -> f32 {
    entries_embeddings
        .iter()
        .map(|e| cosine_similarity(query_embedding, e))
        .fold(0.0f32, f32::max)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn extract_text(message: &Message) -> String {
    message.content.text().unwrap_or_default().to_string()
}
