use serde::Serialize;

/// Structured trace events emitted across the orchestrator crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    PlanAdmitted {
        session_id: String,
        task_count: usize,
    },
    PlanRejected {
        session_id: String,
        reason: String,
    },
    TaskScheduled {
        session_id: String,
        task_id: String,
        tool_name: String,
    },
    TaskDispatched {
        session_id: String,
        task_id: String,
        target: String,
    },
    TaskCompleted {
        session_id: String,
        task_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        session_id: String,
        task_id: String,
        reason: String,
        on_failure: String,
    },
    TaskTimedOut {
        session_id: String,
        task_id: String,
        timeout_ms: u64,
    },
    LateResultDiscarded {
        session_id: String,
        task_id: String,
    },
    ApprovalRequested {
        session_id: String,
        task_id: String,
    },
    ApprovalDecided {
        session_id: String,
        task_id: String,
        approved: bool,
    },
    ApprovalTimedOut {
        session_id: String,
        task_id: String,
    },
    SessionCancelled {
        session_id: String,
        cancelled_tasks: usize,
    },
    BindingResolved {
        task_id: String,
        field: String,
        source_task_id: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        to_provider: String,
        reason: String,
    },
    ProviderKeyFailed {
        provider: String,
        key_index: usize,
        reason: String,
    },
    ProviderBlackedOut {
        provider: String,
        ttl_secs: u64,
    },
    ProviderProbeSucceeded {
        provider: String,
    },
    MemoryRecallPerformed {
        session_id: String,
        recency_count: usize,
        semantic_count: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ao_event");
    }
}
