//! The approval channel of §4.3 — a single-shot entry per `task_id` that
//! unblocks a `waiting` task once a human replies.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;

/// A task waiting on a human decision.
pub struct PendingApproval {
    pub task_id: String,
    pub session_id: String,
    pub question: Option<String>,
    pub created_at: DateTime<Utc>,
    respond: oneshot::Sender<bool>,
}

/// Serializable snapshot, for a dashboard or API response.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalInfo {
    pub task_id: String,
    pub session_id: String,
    pub question: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingApproval> for ApprovalInfo {
    fn from(p: &PendingApproval) -> Self {
        Self {
            task_id: p.task_id.clone(),
            session_id: p.session_id.clone(),
            question: p.question.clone(),
            created_at: p.created_at,
        }
    }
}

/// Thread-safe store of pending task approvals, keyed by `task_id`.
pub struct ApprovalQueue {
    pending: RwLock<HashMap<String, PendingApproval>>,
    timeout: Duration,
}

impl ApprovalQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a single-shot approval request. The scheduler only calls
    /// this the first time a task transitions to `waiting`, making the
    /// request idempotent across re-scans (§4.3).
    pub fn request(
        &self,
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        question: Option<String>,
    ) -> (ApprovalInfo, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            task_id: task_id.into(),
            session_id: session_id.into(),
            question,
            created_at: Utc::now(),
            respond: tx,
        };
        let info = ApprovalInfo::from(&pending);
        self.pending.write().insert(info.task_id.clone(), pending);
        (info, rx)
    }

    pub fn is_pending(&self, task_id: &str) -> bool {
        self.pending.read().contains_key(task_id)
    }

    /// Resolve a pending approval. Returns `true` if one was found.
    pub fn decide(&self, task_id: &str, approved: bool) -> bool {
        if let Some(pending) = self.pending.write().remove(task_id) {
            let _ = pending.respond.send(approved);
            true
        } else {
            false
        }
    }

    /// Drop a timed-out entry (called by the scheduler when its wait on
    /// the receiver elapses).
    pub fn remove_expired(&self, task_id: &str) {
        self.pending.write().remove(task_id);
    }

    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending.read().values().map(ApprovalInfo::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> ApprovalQueue {
        ApprovalQueue::new(Duration::from_secs(900))
    }

    #[test]
    fn request_is_listed_as_pending() {
        let q = queue();
        let (info, _rx) = q.request("s1", "t1", Some("ok to send?".into()));
        assert_eq!(info.task_id, "t1");
        assert!(q.is_pending("t1"));
        assert_eq!(q.list_pending().len(), 1);
    }

    #[tokio::test]
    async fn decide_approved_resolves_receiver() {
        let q = queue();
        let (_info, rx) = q.request("s1", "t1", None);
        assert!(q.decide("t1", true));
        assert!(rx.await.unwrap());
        assert!(!q.is_pending("t1"));
    }

    #[tokio::test]
    async fn decide_denied_resolves_receiver_false() {
        let q = queue();
        let (_info, rx) = q.request("s1", "t1", None);
        assert!(q.decide("t1", false));
        assert!(!rx.await.unwrap());
    }

    #[test]
    fn decide_unknown_task_returns_false() {
        let q = queue();
        assert!(!q.decide("ghost", true));
    }

    #[test]
    fn remove_expired_drops_entry() {
        let q = queue();
        q.request("s1", "t1", None);
        q.remove_expired("t1");
        assert!(!q.is_pending("t1"));
    }

    #[test]
    fn timeout_reports_configured_duration() {
        let q = ApprovalQueue::new(Duration::from_secs(42));
        assert_eq!(q.timeout(), Duration::from_secs(42));
    }
}
