//! Append-only recency tier (§4.7). In-memory only, no JSONL persistence —
//! simplified from the teacher's `sessions::transcript::TranscriptWriter`
//! per the non-goal excluding durable storage.

use ao_domain::tool::Message;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// One appended conversation turn, with the message id used to key the
/// semantic tier's embedding cache.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub message_id: String,
    pub message: Message,
    pub timestamp: DateTime<Utc>,
}

/// Per-session append-only turn list. Messages are delivered in append
/// order (§5 ordering guarantees); writes are serialized under one lock,
/// matching the teacher's single-writer transcript idiom.
pub struct RecencyStore {
    turns: RwLock<Vec<TurnRecord>>,
}

impl RecencyStore {
    pub fn new() -> Self {
        Self {
            turns: RwLock::new(Vec::new()),
        }
    }

    /// Append a turn, returning the message id assigned to it.
    pub fn append(&self, message: Message) -> String {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.turns.write().push(TurnRecord {
            message_id: message_id.clone(),
            message,
            timestamp: Utc::now(),
        });
        message_id
    }

    /// The most recent `n` turns, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<TurnRecord> {
        let turns = self.turns.read();
        let start = turns.len().saturating_sub(n);
        turns[start..].to_vec()
    }

    /// Every turn currently retained, oldest first — the bounded pool the
    /// semantic tier scans.
    pub fn all(&self) -> Vec<TurnRecord> {
        self.turns.read().clone()
    }

    pub fn len(&self) -> usize {
        self.turns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.read().is_empty()
    }
}

impl Default for RecencyStore {
    fn default() -> Self {
        Self::new()
    }
}
