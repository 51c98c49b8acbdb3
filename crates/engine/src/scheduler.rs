//! The event-driven scheduling loop of §4.3.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ao_binding::{BindingResolver, PrevalidateOutcome};
use ao_domain::task::{OnFailure, Task, TaskOutput, TaskRecord, TaskStatus};
use ao_domain::trace::TraceEvent;
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use crate::approval::ApprovalQueue;
use crate::cancel::CancelToken;
use crate::executor::ServerExecutor;
use crate::sink::ClientDispatch;
use crate::state::ExecutionState;

/// Re-checking `ready_set()` on a fixed cadence, in addition to the
/// `changed` notification, hedges against the narrow window between a
/// waiter checking "nothing ready" and another task calling `update()` —
/// `Notify::notify_waiters` does not queue a wakeup for a waiter that
/// hasn't subscribed yet.
const POLL_HEDGE: Duration = Duration::from_millis(50);

/// A `retry` task is never re-admitted to the ready set immediately — §4.3
/// requires "a brief backoff" before the single retry attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct Engine {
    pub state: Arc<ExecutionState>,
    resolver: Arc<BindingResolver>,
    executor: Arc<ServerExecutor>,
    dispatch: Arc<dyn ClientDispatch>,
    pub approvals: Arc<ApprovalQueue>,
    default_task_timeout: Duration,
    approved: RwLock<HashSet<String>>,
    fan_out: Option<Arc<Semaphore>>,
    cancel: CancelToken,
    /// Retries that are backing off, counted separately from `ExecutionState`
    /// since the task they belong to looks terminal (`Failed`) for the
    /// duration of the backoff — `run`'s completion check must not treat the
    /// session as done while one of these is still in flight.
    pending_retries: Arc<AtomicUsize>,
}

impl Engine {
    pub fn new(
        state: Arc<ExecutionState>,
        resolver: Arc<BindingResolver>,
        executor: Arc<ServerExecutor>,
        dispatch: Arc<dyn ClientDispatch>,
        approvals: Arc<ApprovalQueue>,
        default_task_timeout: Duration,
    ) -> Arc<Self> {
        let fan_out = state.concurrency();
        Arc::new(Self {
            state,
            resolver,
            executor,
            dispatch,
            approvals,
            default_task_timeout,
            approved: RwLock::new(HashSet::new()),
            fan_out,
            cancel: CancelToken::new(),
            pending_retries: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel every non-terminal task in the session. Checked cooperatively
    /// by the loop, not preemptively — an in-flight tool call runs to
    /// completion, its result is simply discarded.
    pub fn cancel_session(&self) {
        self.cancel.cancel();
        let mut cancelled = 0usize;
        for task_id in self.state.snapshot().keys().cloned().collect::<Vec<_>>() {
            let was_terminal = self.state.get(&task_id).map(|r| r.status.is_terminal()).unwrap_or(true);
            if was_terminal {
                continue;
            }
            self.state.update(&task_id, |r| {
                r.status = TaskStatus::Failed;
                r.completed_at = Some(chrono::Utc::now());
                r.output = Some(TaskOutput::err("session_cancelled"));
            });
            cancelled += 1;
        }
        TraceEvent::SessionCancelled {
            session_id: self.state.session_id.clone(),
            cancelled_tasks: cancelled,
        }
        .emit();
    }

    /// Drive the plan to completion. Returns once every task in the state
    /// reached a terminal status, or the session is cancelled.
    pub async fn run(self: &Arc<Self>) {
        loop {
            let done = self.state.is_complete() && self.pending_retries.load(Ordering::SeqCst) == 0;
            if done || self.cancel.is_cancelled() {
                break;
            }

            // `ready_set()` includes `waiting` tasks (per §4.3 step 1) so
            // introspection sees them as part of the ready frontier, but a
            // `waiting` task already has a `gate_on_approval` in flight —
            // only `pending` tasks need a fresh dispatch this tick.
            let to_dispatch: Vec<TaskRecord> = self
                .state
                .ready_set()
                .into_iter()
                .filter_map(|task_id| self.state.get(&task_id))
                .filter(|record| record.status == TaskStatus::Pending)
                .collect();

            // Claim each task synchronously, before spawning, so the next
            // tick of this same loop doesn't see it as `pending` again and
            // spawn a second dispatch for it while the first is still
            // sitting unpolled in tokio's run queue.
            for record in &to_dispatch {
                self.state.update(&record.task.task_id, |r| r.status = TaskStatus::Running);
            }

            for record in to_dispatch {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.dispatch_one(record).await;
                });
            }

            tokio::select! {
                _ = self.state.wait_for_change() => {}
                _ = tokio::time::sleep(POLL_HEDGE) => {}
            }
        }

        self.state.notify_completion();
    }

    async fn dispatch_one(self: Arc<Self>, record: TaskRecord) {
        let task_id = record.task.task_id.clone();
        let session_id = self.state.session_id.clone();

        if record.task.control.requires_approval && !self.approved.read().contains(&task_id) {
            self.gate_on_approval(record.task.clone()).await;
            return;
        }

        let _permit = match &self.fan_out {
            Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore never closed")),
            None => None,
        };

        let snapshot = self.state.snapshot();

        // A binding may reference a task outside `depends_on`; prevalidate
        // tells ready-but-unbindable-yet apart from ready-and-doomed so the
        // former just waits for the next state change instead of failing.
        match self.resolver.prevalidate(&record.task, &snapshot) {
            PrevalidateOutcome::NotYetReady => {
                // Claimed `running` at collection time but not actually
                // bindable yet — hand it back to the ready set for the
                // next tick instead of leaving it stuck.
                self.state.update(&task_id, |r| r.status = TaskStatus::Pending);
                return;
            }
            PrevalidateOutcome::WillFail(failure) => {
                self.fail_task(&task_id, failure.to_string(), record.task.control.on_failure);
                return;
            }
            PrevalidateOutcome::Ready => {}
        }

        let resolved_inputs = match self.resolver.resolve_task_inputs(&record.task, &snapshot) {
            Ok(inputs) => inputs,
            Err(e) => {
                self.fail_task(&task_id, e.to_string(), record.task.control.on_failure);
                return;
            }
        };

        let generation = record.generation;
        let timeout = record
            .task
            .control
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_task_timeout);

        match record.task.execution_target {
            ao_domain::task::ExecutionTarget::Server => {
                self.run_server_task(&task_id, resolved_inputs, generation, timeout).await;
            }
            ao_domain::task::ExecutionTarget::Client => {
                self.run_client_task(&session_id, &task_id, resolved_inputs, generation, timeout)
                    .await;
            }
        }
    }

    async fn gate_on_approval(self: Arc<Self>, task: Task) {
        let task_id = task.task_id.clone();
        let session_id = self.state.session_id.clone();

        // Idempotent: only the transition into `waiting` issues a request.
        let first_time = !self.approvals.is_pending(&task_id);
        self.state.update(&task_id, |r| {
            if r.status != TaskStatus::Waiting {
                r.status = TaskStatus::Waiting;
            }
        });
        if !first_time {
            return;
        }

        let (_info, rx) = self
            .approvals
            .request(session_id.clone(), task_id.clone(), task.control.approval_question.clone());
        TraceEvent::ApprovalRequested {
            session_id: session_id.clone(),
            task_id: task_id.clone(),
        }
        .emit();
        let _ = self
            .dispatch
            .request_approval(&session_id, &task_id, task.control.approval_question.as_deref())
            .await;

        let decision = tokio::time::timeout(self.approvals.timeout(), rx).await;
        if self.cancel.is_cancelled() {
            // `cancel_session` already moved this task to a terminal state.
            self.approvals.remove_expired(&task_id);
            return;
        }
        match decision {
            Ok(Ok(true)) => {
                TraceEvent::ApprovalDecided {
                    session_id: session_id.clone(),
                    task_id: task_id.clone(),
                    approved: true,
                }
                .emit();
                self.approved.write().insert(task_id.clone());
                self.state.update(&task_id, |r| r.status = TaskStatus::Pending);
            }
            Ok(Ok(false)) => {
                TraceEvent::ApprovalDecided {
                    session_id,
                    task_id: task_id.clone(),
                    approved: false,
                }
                .emit();
                self.fail_task(&task_id, "approval_denied".to_string(), task.control.on_failure);
            }
            Ok(Err(_)) | Err(_) => {
                self.approvals.remove_expired(&task_id);
                TraceEvent::ApprovalTimedOut {
                    session_id,
                    task_id: task_id.clone(),
                }
                .emit();
                self.fail_task(&task_id, "approval_timed_out".to_string(), task.control.on_failure);
            }
        }
    }

    async fn run_server_task(
        self: &Arc<Self>,
        task_id: &str,
        resolved_inputs: std::collections::HashMap<String, serde_json::Value>,
        generation: u64,
        timeout: Duration,
    ) {
        let tool_name = match self.state.get(task_id) {
            Some(r) => r.task.tool.clone(),
            None => return,
        };

        self.state.update(task_id, |r| {
            r.status = TaskStatus::Running;
            r.started_at = Some(chrono::Utc::now());
            r.resolved_inputs = resolved_inputs.clone();
        });
        TraceEvent::TaskDispatched {
            session_id: self.state.session_id.clone(),
            task_id: task_id.to_string(),
            target: "server".to_string(),
        }
        .emit();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, self.executor.execute(&tool_name, resolved_inputs)).await;

        match result {
            Ok(output) => self.complete_task(task_id, generation, output, started.elapsed()),
            Err(_) => self.timeout_task(task_id, generation, timeout),
        }
    }

    async fn run_client_task(
        self: &Arc<Self>,
        session_id: &str,
        task_id: &str,
        resolved_inputs: std::collections::HashMap<String, serde_json::Value>,
        generation: u64,
        timeout: Duration,
    ) {
        self.state.update(task_id, |r| {
            r.status = TaskStatus::Emitted;
            r.started_at = Some(chrono::Utc::now());
            r.resolved_inputs = resolved_inputs;
        });

        let Some(record) = self.state.get(task_id) else { return };
        let completed_deps = self.state.completed_dependencies(task_id);
        TraceEvent::TaskDispatched {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            target: "client".to_string(),
        }
        .emit();

        if let Err(e) = self.dispatch.emit_task(session_id, &record, completed_deps).await {
            self.fail_task(task_id, e.to_string(), record.task.control.on_failure);
            return;
        }

        // The client's result arrives out-of-band via `report_client_result`;
        // this sleep only enforces the timeout side of the contract.
        tokio::time::sleep(timeout).await;
        if self.state.get(task_id).map(|r| r.generation) == Some(generation) {
            if let Some(r) = self.state.get(task_id) {
                if !r.status.is_terminal() {
                    self.timeout_task(task_id, generation, timeout);
                }
            }
        }
    }

    /// Called by the client bridge (`ao-emitter`) when a task result
    /// arrives from the client surface. A result for a generation the
    /// engine has already moved past (timed out, retried) is discarded.
    pub fn report_client_result(&self, task_id: &str, generation: u64, output: TaskOutput) {
        match self.state.get(task_id) {
            Some(r) if r.generation == generation && !r.status.is_terminal() => {
                self.complete_task(task_id, generation, output, Duration::default());
            }
            _ => {
                TraceEvent::LateResultDiscarded {
                    session_id: self.state.session_id.clone(),
                    task_id: task_id.to_string(),
                }
                .emit();
            }
        }
    }

    fn complete_task(&self, task_id: &str, generation: u64, output: TaskOutput, elapsed: Duration) {
        let still_current = self.state.get(task_id).map(|r| r.generation) == Some(generation);
        if !still_current {
            TraceEvent::LateResultDiscarded {
                session_id: self.state.session_id.clone(),
                task_id: task_id.to_string(),
            }
            .emit();
            return;
        }

        let success = output.success;
        let on_failure = self.state.get(task_id).map(|r| r.task.control.on_failure).unwrap_or_default();
        let retrying = !success && self.claim_retry(task_id, on_failure);
        self.state.update(task_id, |r| {
            r.status = if success { TaskStatus::Completed } else { TaskStatus::Failed };
            r.completed_at = Some(chrono::Utc::now());
            r.output = Some(output.clone());
        });

        if success {
            TraceEvent::TaskCompleted {
                session_id: self.state.session_id.clone(),
                task_id: task_id.to_string(),
                duration_ms: elapsed.as_millis() as u64,
            }
            .emit();
        } else {
            let reason = output.error.clone().unwrap_or_default();
            self.apply_failure_policy(task_id, reason, on_failure, retrying);
        }
    }

    fn timeout_task(&self, task_id: &str, generation: u64, timeout: Duration) {
        let still_current = self.state.get(task_id).map(|r| r.generation) == Some(generation);
        if !still_current {
            return;
        }
        let on_failure = self.state.get(task_id).map(|r| r.task.control.on_failure).unwrap_or_default();
        let retrying = self.claim_retry(task_id, on_failure);
        self.state.update(task_id, |r| {
            r.status = TaskStatus::Failed;
            r.completed_at = Some(chrono::Utc::now());
            r.output = Some(TaskOutput::err("timeout"));
        });
        TraceEvent::TaskTimedOut {
            session_id: self.state.session_id.clone(),
            task_id: task_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
        .emit();
        self.apply_failure_policy(task_id, "timeout".to_string(), on_failure, retrying);
    }

    fn fail_task(&self, task_id: &str, reason: String, on_failure: OnFailure) {
        let retrying = self.claim_retry(task_id, on_failure);
        self.state.update(task_id, |r| {
            r.status = TaskStatus::Failed;
            r.completed_at = Some(chrono::Utc::now());
            r.output = Some(TaskOutput::err(reason.clone()));
        });
        self.apply_failure_policy(task_id, reason, on_failure, retrying);
    }

    /// Reserves the single retry attempt §4.3/§7 grants a `retry` task,
    /// before the task is written to a terminal status. Incrementing
    /// `pending_retries` here, ahead of that write, closes the window where
    /// `run`'s completion check could otherwise observe "all tasks terminal"
    /// and return before the retry gets a chance to fire.
    fn claim_retry(&self, task_id: &str, on_failure: OnFailure) -> bool {
        if on_failure != OnFailure::Retry {
            return false;
        }
        let already_retried = self.state.get(task_id).map(|r| r.generation > 0).unwrap_or(true);
        if already_retried {
            return false;
        }
        self.pending_retries.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Re-admits a retrying task to the ready set after `RETRY_BACKOFF`,
    /// unless the session was cancelled in the meantime.
    fn schedule_retry(&self, task_id: &str) {
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let pending_retries = Arc::clone(&self.pending_retries);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(RETRY_BACKOFF).await;
            if !cancel.is_cancelled() {
                state.update(&task_id, |r| {
                    r.status = TaskStatus::Pending;
                    r.generation += 1;
                    r.output = None;
                    r.completed_at = None;
                });
            }
            pending_retries.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn apply_failure_policy(&self, task_id: &str, reason: String, on_failure: OnFailure, retrying: bool) {
        TraceEvent::TaskFailed {
            session_id: self.state.session_id.clone(),
            task_id: task_id.to_string(),
            reason: reason.clone(),
            on_failure: format!("{on_failure:?}").to_lowercase(),
        }
        .emit();

        match on_failure {
            OnFailure::Retry => {
                if retrying {
                    self.schedule_retry(task_id);
                } else {
                    self.abort_dependents(task_id);
                }
            }
            OnFailure::Abort => self.abort_dependents(task_id),
            OnFailure::Continue => {
                // Dependents remain eligible; the resolver will report
                // `failed_upstream` task-locally if they bind to this
                // task's now-unusable output.
            }
        }
    }

    fn abort_dependents(&self, task_id: &str) {
        for dependent in self.state.transitive_dependents(task_id) {
            let already_terminal = self.state.get(&dependent).map(|r| r.status.is_terminal()).unwrap_or(true);
            if already_terminal {
                continue;
            }
            self.state.update(&dependent, |r| {
                r.status = TaskStatus::Failed;
                r.completed_at = Some(chrono::Utc::now());
                r.output = Some(TaskOutput::err("dependency_failed"));
            });
            TraceEvent::TaskFailed {
                session_id: self.state.session_id.clone(),
                task_id: dependent,
                reason: "dependency_failed".to_string(),
                on_failure: "abort".to_string(),
            }
            .emit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_binding::BindingResolver;
    use ao_domain::task::{ExecutionTarget, Plan, TaskControl, ToolMetadata};
    use ao_registry::{InstanceRegistry, ToolCallable, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ToolCallable for Echo {
        async fn call(&self, inputs: HashMap<String, Value>) -> ao_domain::error::Result<HashMap<String, Value>> {
            Ok(inputs)
        }
    }

    #[derive(Debug)]
    struct AlwaysFails;

    #[async_trait]
    impl ToolCallable for AlwaysFails {
        async fn call(&self, _inputs: HashMap<String, Value>) -> ao_domain::error::Result<HashMap<String, Value>> {
            Err(ao_domain::error::Error::Other("nope".into()))
        }
    }

    #[derive(Debug)]
    struct FailsNTimes {
        remaining: std::sync::atomic::AtomicU32,
        calls: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolCallable for FailsNTimes {
        async fn call(&self, inputs: HashMap<String, Value>) -> ao_domain::error::Result<HashMap<String, Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ao_domain::error::Error::Other("not yet".into()))
            } else {
                Ok(inputs)
            }
        }
    }

    fn server_task(id: &str, tool: &str, deps: &[&str]) -> Task {
        Task {
            task_id: id.into(),
            tool: tool.into(),
            execution_target: ExecutionTarget::Server,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            inputs: HashMap::new(),
            input_bindings: HashMap::new(),
            lifecycle_messages: None,
            control: TaskControl::default(),
        }
    }

    fn make_engine(plan: Plan, tool_names: &[&str], instances: Vec<(&str, std::sync::Arc<dyn ToolCallable>)>) -> std::sync::Arc<Engine> {
        let state = std::sync::Arc::new(ExecutionState::seed("s1", plan, None).unwrap());
        let resolver = std::sync::Arc::new(BindingResolver::new());
        let metas: Vec<ToolMetadata> = tool_names
            .iter()
            .map(|n| ToolMetadata {
                tool_name: n.to_string(),
                description: "t".into(),
                execution_target: ExecutionTarget::Server,
                params_schema: Value::Null,
                output_schema: Value::Null,
                category: "c".into(),
            })
            .collect();
        let registry = std::sync::Arc::new(ToolRegistry::from_tools(metas));
        let instance_registry = std::sync::Arc::new(InstanceRegistry::new());
        for (name, callable) in instances {
            instance_registry.register(name, callable);
        }
        let executor = std::sync::Arc::new(ServerExecutor::new(registry, instance_registry));
        Engine::new(
            state,
            resolver,
            executor,
            std::sync::Arc::new(crate::sink::NullDispatch),
            std::sync::Arc::new(ApprovalQueue::new(Duration::from_secs(5))),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn runs_independent_tasks_to_completion() {
        let plan = Plan {
            tasks: vec![server_task("a", "echo", &[])],
        };
        let engine = make_engine(plan, &["echo"], vec![("echo", std::sync::Arc::new(Echo))]);
        engine.run().await;
        let record = engine.state.get("a").unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_dependency_aborts_dependents_by_default() {
        let plan = Plan {
            tasks: vec![server_task("a", "boom", &[]), server_task("b", "echo", &["a"])],
        };
        let engine = make_engine(
            plan,
            &["boom", "echo"],
            vec![("boom", std::sync::Arc::new(AlwaysFails)), ("echo", std::sync::Arc::new(Echo))],
        );
        engine.run().await;
        assert_eq!(engine.state.get("a").unwrap().status, TaskStatus::Failed);
        let b = engine.state.get("b").unwrap();
        assert_eq!(b.status, TaskStatus::Failed);
        assert_eq!(b.output.unwrap().error.as_deref(), Some("dependency_failed"));
    }

    #[tokio::test]
    async fn continue_policy_lets_independent_sibling_run() {
        let mut task_a = server_task("a", "boom", &[]);
        task_a.control.on_failure = OnFailure::Continue;
        let plan = Plan {
            tasks: vec![task_a, server_task("b", "echo", &[])],
        };
        let engine = make_engine(
            plan,
            &["boom", "echo"],
            vec![("boom", std::sync::Arc::new(AlwaysFails)), ("echo", std::sync::Arc::new(Echo))],
        );
        engine.run().await;
        assert_eq!(engine.state.get("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(engine.state.get("b").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn approval_gate_blocks_until_decided() {
        let mut task_a = server_task("a", "echo", &[]);
        task_a.control.requires_approval = true;
        let plan = Plan { tasks: vec![task_a] };
        let engine = make_engine(plan, &["echo"], vec![("echo", std::sync::Arc::new(Echo))]);

        let run_handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });

        // Give the loop a moment to register the approval request.
        for _ in 0..50 {
            if engine.approvals.is_pending("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.approvals.is_pending("a"));
        assert!(engine.approvals.decide("a", true));

        run_handle.await.unwrap();
        assert_eq!(engine.state.get("a").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_session_fails_remaining_tasks_and_stops_the_loop() {
        let mut approval_task = server_task("a", "echo", &[]);
        approval_task.control.requires_approval = true;
        let plan = Plan { tasks: vec![approval_task] };
        let engine = make_engine(plan, &["echo"], vec![("echo", std::sync::Arc::new(Echo))]);

        let run_handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });

        for _ in 0..50 {
            if engine.approvals.is_pending("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        engine.cancel_session();
        run_handle.await.unwrap();
        assert_eq!(engine.state.get("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(
            engine.state.get("a").unwrap().output.unwrap().error.as_deref(),
            Some("session_cancelled")
        );
    }

    #[tokio::test]
    async fn retry_policy_re_admits_once_after_backoff_then_succeeds() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let mut task_a = server_task("a", "flaky", &[]);
        task_a.control.on_failure = OnFailure::Retry;
        let plan = Plan { tasks: vec![task_a] };
        let engine = make_engine(
            plan,
            &["flaky"],
            vec![(
                "flaky",
                std::sync::Arc::new(FailsNTimes {
                    remaining: std::sync::atomic::AtomicU32::new(1),
                    calls: calls.clone(),
                }),
            )],
        );
        engine.run().await;
        assert_eq!(engine.state.get("a").unwrap().status, TaskStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_policy_aborts_dependents_once_the_single_retry_is_exhausted() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let mut task_a = server_task("a", "flaky", &[]);
        task_a.control.on_failure = OnFailure::Retry;
        let plan = Plan {
            tasks: vec![task_a, server_task("b", "echo", &["a"])],
        };
        let engine = make_engine(
            plan,
            &["flaky", "echo"],
            vec![
                (
                    "flaky",
                    std::sync::Arc::new(FailsNTimes {
                        remaining: std::sync::atomic::AtomicU32::new(u32::MAX),
                        calls: calls.clone(),
                    }),
                ),
                ("echo", std::sync::Arc::new(Echo)),
            ],
        );
        engine.run().await;
        assert_eq!(engine.state.get("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let b = engine.state.get("b").unwrap();
        assert_eq!(b.status, TaskStatus::Failed);
        assert_eq!(b.output.unwrap().error.as_deref(), Some("dependency_failed"));
    }

    #[tokio::test]
    async fn binding_resolution_failure_fails_task_without_invoking_tool() {
        let mut task_b = server_task("b", "echo", &[]);
        task_b
            .input_bindings
            .insert("x".to_string(), "$.missing.data.text".to_string());
        let plan = Plan { tasks: vec![task_b] };
        let engine = make_engine(plan, &["echo"], vec![("echo", std::sync::Arc::new(Echo))]);
        engine.run().await;
        let record = engine.state.get("b").unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.output.unwrap().error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn cross_task_binding_resolves_after_upstream_completes() {
        let mut task_b = server_task("b", "echo", &["a"]);
        task_b
            .input_bindings
            .insert("x".to_string(), "$.a.data.value".to_string());
        let plan = Plan {
            tasks: vec![server_task("a", "echo", &[]), task_b],
        };
        let mut task_with_input = server_task("a", "echo", &[]);
        task_with_input.inputs.insert("value".to_string(), json!("hi"));
        let plan = Plan {
            tasks: vec![task_with_input, plan.tasks.into_iter().nth(1).unwrap()],
        };
        let engine = make_engine(plan, &["echo"], vec![("echo", std::sync::Arc::new(Echo))]);
        engine.run().await;
        let b = engine.state.get("b").unwrap();
        assert_eq!(b.status, TaskStatus::Completed);
        assert_eq!(b.resolved_inputs.get("x"), Some(&json!("hi")));
    }
}
