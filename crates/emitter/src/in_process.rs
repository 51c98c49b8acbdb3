//! Desktop-mode emitter: the client surface is another async task in the
//! same process, reached through an injected [`ClientSink`] rather than a
//! socket. Same `ClientMessage`/`GatewayMessage` envelope as
//! [`crate::websocket::WebSocketEmitter`] — only the transport differs (§4.6).

use std::collections::HashMap;
use std::sync::Arc;

use ao_domain::error::Result;
use ao_domain::task::{TaskOutput, TaskRecord};
use ao_engine::{ClientDispatch, Engine};
use async_trait::async_trait;

use crate::protocol::{ClientMessage, GatewayMessage};

/// Implemented by whatever plays the role of "the desktop app" in-process —
/// a trivial echoing stub for demos and tests, or a real local tool runner
/// wired in by `ao-cli`.
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send(&self, message: GatewayMessage) -> Result<()>;
}

/// A sink that immediately replies with a successful empty result for every
/// dispatched task and auto-approves every approval request. Useful for
/// local demos that have no real desktop companion process.
pub struct EchoSink {
    engine: parking_lot::Mutex<Option<Arc<Engine>>>,
}

impl EchoSink {
    pub fn new() -> Self {
        Self {
            engine: parking_lot::Mutex::new(None),
        }
    }

    /// Wired in after the engine is constructed, to close the loop back
    /// into `report_client_result`/`ApprovalQueue::decide`.
    pub fn bind(&self, engine: Arc<Engine>) {
        *self.engine.lock() = Some(engine);
    }
}

impl Default for EchoSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientSink for EchoSink {
    async fn send(&self, message: GatewayMessage) -> Result<()> {
        let Some(engine) = self.engine.lock().clone() else {
            return Ok(());
        };
        match message {
            GatewayMessage::TaskExecuteSingle {
                task_id, generation, ..
            } => {
                engine.report_client_result(&task_id, generation, TaskOutput::ok(HashMap::new()));
            }
            GatewayMessage::TaskExecuteBatch { tasks, .. } => {
                for t in tasks {
                    engine.report_client_result(&t.task_id, t.generation, TaskOutput::ok(HashMap::new()));
                }
            }
            GatewayMessage::ApprovalRequest { task_id, .. } => {
                engine.approvals.decide(&task_id, true);
            }
            GatewayMessage::Acknowledgment { .. } | GatewayMessage::Ping { .. } => {}
        }
        Ok(())
    }
}

/// The desktop/in-process client dispatch surface.
pub struct InProcessEmitter {
    sink: Arc<dyn ClientSink>,
}

impl InProcessEmitter {
    pub fn new(sink: Arc<dyn ClientSink>) -> Self {
        Self { sink }
    }

    fn build_task_message(session_id: &str, record: &TaskRecord, server_completed_dependencies: HashMap<String, TaskOutput>) -> GatewayMessage {
        GatewayMessage::TaskExecuteSingle {
            session_id: session_id.to_string(),
            task_id: record.task.task_id.clone(),
            tool: record.task.tool.clone(),
            generation: record.generation,
            resolved_inputs: record.resolved_inputs.clone(),
            server_completed_dependencies,
        }
    }
}

#[async_trait]
impl ClientDispatch for InProcessEmitter {
    async fn emit_task(
        &self,
        session_id: &str,
        record: &TaskRecord,
        completed_dependencies: HashMap<String, TaskOutput>,
    ) -> Result<()> {
        let message = Self::build_task_message(session_id, record, completed_dependencies);
        self.sink.send(message).await
    }

    async fn request_approval(&self, session_id: &str, task_id: &str, question: Option<&str>) -> Result<()> {
        self.sink
            .send(GatewayMessage::ApprovalRequest {
                session_id: session_id.to_string(),
                task_id: task_id.to_string(),
                question: question.map(|s| s.to_string()),
            })
            .await
    }
}

/// Routes an inbound `ClientMessage` into the engine — the reverse
/// direction of the duplex channel (§6). Shared by the in-process and
/// WebSocket transports since both speak the same envelope.
pub fn route_inbound(engine: &Engine, message: ClientMessage) -> Result<()> {
    match message {
        ClientMessage::TaskResult {
            task_id,
            generation,
            success,
            data,
            error,
            ..
        } => {
            let output = if success {
                TaskOutput::ok(data)
            } else {
                TaskOutput::err(error.unwrap_or_else(|| "client task failed".into()))
            };
            engine.report_client_result(&task_id, generation, output);
            Ok(())
        }
        ClientMessage::ApprovalResponse { task_id, approved, .. } => {
            engine.approvals.decide(&task_id, approved);
            Ok(())
        }
        ClientMessage::Status { .. } | ClientMessage::Pong { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_binding::BindingResolver;
    use ao_domain::task::{ExecutionTarget, Plan, Task, TaskControl};
    use ao_engine::{ApprovalQueue, ExecutionState, ServerExecutor};
    use ao_registry::{InstanceRegistry, ToolRegistry};
    use std::time::Duration;

    fn client_task(id: &str) -> Task {
        Task {
            task_id: id.into(),
            tool: "desktop.notify".into(),
            execution_target: ExecutionTarget::Client,
            depends_on: vec![],
            inputs: HashMap::new(),
            input_bindings: HashMap::new(),
            lifecycle_messages: None,
            control: TaskControl::default(),
        }
    }

    fn make_engine() -> Arc<Engine> {
        let plan = Plan {
            tasks: vec![client_task("t1")],
        };
        let state = Arc::new(ExecutionState::seed("s1", plan, None).unwrap());
        let resolver = Arc::new(BindingResolver::new());
        let registry = Arc::new(ToolRegistry::empty());
        let instances = Arc::new(InstanceRegistry::new());
        let executor = Arc::new(ServerExecutor::new(registry, instances));
        let approvals = Arc::new(ApprovalQueue::new(Duration::from_secs(5)));
        let sink = Arc::new(EchoSink::new());
        let emitter = Arc::new(InProcessEmitter::new(sink.clone()));
        let engine = Engine::new(state, resolver, executor, emitter, approvals, Duration::from_secs(5));
        sink.bind(engine.clone());
        engine
    }

    #[tokio::test]
    async fn echo_sink_completes_dispatched_client_task() {
        let engine = make_engine();
        tokio::select! {
            _ = engine.run() => {}
            _ = engine.state.wait_for_completion() => {}
        }
        let record = engine.state.get("t1").unwrap();
        assert!(record.status.is_terminal());
        assert!(record.output.unwrap().success);
    }

    #[test]
    fn route_inbound_task_result_applies_to_engine() {
        // Routed through a fresh engine with a running loop omitted here —
        // report_client_result is exercised directly in `ao-engine`'s own
        // tests; this covers only the message-to-call mapping.
        let plan = Plan {
            tasks: vec![client_task("t1")],
        };
        let state = Arc::new(ExecutionState::seed("s1", plan, None).unwrap());
        let resolver = Arc::new(BindingResolver::new());
        let registry = Arc::new(ToolRegistry::empty());
        let instances = Arc::new(InstanceRegistry::new());
        let executor = Arc::new(ServerExecutor::new(registry, instances));
        let approvals = Arc::new(ApprovalQueue::new(Duration::from_secs(5)));
        let engine = Engine::new(
            state.clone(),
            resolver,
            executor,
            Arc::new(ao_engine::NullDispatch),
            approvals,
            Duration::from_secs(5),
        );
        state.update("t1", |r| r.status = ao_domain::task::TaskStatus::Emitted);
        let msg = ClientMessage::TaskResult {
            session_id: "s1".into(),
            task_id: "t1".into(),
            generation: 0,
            success: true,
            data: HashMap::new(),
            error: None,
        };
        route_inbound(&engine, msg).unwrap();
        assert!(state.get("t1").unwrap().status.is_terminal());
    }
}
