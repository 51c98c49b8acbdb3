//! The engine's view of the client bridge (§4.6): a narrow trait so the
//! scheduler can dispatch client-targeted tasks and approval prompts
//! without depending on the emitter crate (which depends on this one, for
//! `ExecutionState`/`TaskRecord`, to build its wire payloads).

use std::collections::HashMap;

use ao_domain::error::Result;
use ao_domain::task::{TaskOutput, TaskRecord};
use async_trait::async_trait;

/// Implemented by `ao-emitter`'s in-process and WebSocket sinks.
#[async_trait]
pub trait ClientDispatch: Send + Sync {
    /// Deliver one task to the client surface. `completed_dependencies`
    /// carries the already-terminal upstream outputs the task depends on,
    /// per the server/client boundary enrichment of §4.3.
    async fn emit_task(
        &self,
        session_id: &str,
        record: &TaskRecord,
        completed_dependencies: HashMap<String, TaskOutput>,
    ) -> Result<()>;

    /// Raise a human approval prompt on the client for a `waiting` task.
    async fn request_approval(&self, session_id: &str, task_id: &str, question: Option<&str>) -> Result<()>;
}

/// A no-op sink for sessions with no client-targeted tasks, or for tests
/// that never exercise the client dispatch path.
pub struct NullDispatch;

#[async_trait]
impl ClientDispatch for NullDispatch {
    async fn emit_task(
        &self,
        _session_id: &str,
        _record: &TaskRecord,
        _completed_dependencies: HashMap<String, TaskOutput>,
    ) -> Result<()> {
        Ok(())
    }

    async fn request_approval(&self, _session_id: &str, _task_id: &str, _question: Option<&str>) -> Result<()> {
        Ok(())
    }
}
