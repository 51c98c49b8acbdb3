use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a task's tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    Server,
    Client,
}

/// What to do when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Abort,
    Continue,
    Retry,
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::Abort
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleMessages {
    #[serde(default)]
    pub on_start: Option<String>,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskControl {
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_question: Option<String>,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Carried unchanged end-to-end; the core never interprets it.
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self {
            requires_approval: false,
            approval_question: None,
            on_failure: OnFailure::Abort,
            timeout_ms: None,
            confidence: None,
        }
    }
}

/// A plan node. Immutable once admitted into an `ExecutionState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub tool: String,
    pub execution_target: ExecutionTarget,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub input_bindings: HashMap<String, String>,
    #[serde(default)]
    pub lifecycle_messages: Option<LifecycleMessages>,
    #[serde(default)]
    pub control: TaskControl,
}

/// A plan submitted by the caller: `{ "tasks": [ Task, ... ] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

/// The seven-state lifecycle of a `TaskRecord` (§4.3). `Emitted` only
/// applies to client-targeted tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Waiting,
    Emitted,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// `{success, data, error}` populated on a task's terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub success: bool,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskOutput {
    pub fn ok(data: HashMap<String, Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: HashMap::new(),
            error: Some(error.into()),
        }
    }
}

/// A `Task` plus its mutable execution state. The `generation` counter is
/// bumped every time the engine starts a fresh attempt at dispatching the
/// task (initial dispatch, or a `retry`); a result keyed to a stale
/// generation is a late result and is discarded rather than applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub status: TaskStatus,
    #[serde(default)]
    pub resolved_inputs: HashMap<String, Value>,
    #[serde(default)]
    pub output: Option<TaskOutput>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generation: u64,
}

impl TaskRecord {
    pub fn seed(task: Task) -> Self {
        Self {
            task,
            status: TaskStatus::Pending,
            resolved_inputs: HashMap::new(),
            output: None,
            received_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            generation: 0,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Declarative description of a registered tool, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub description: String,
    pub execution_target: ExecutionTarget,
    #[serde(default)]
    pub params_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    pub category: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Emitted.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn seed_starts_pending_with_no_output() {
        let task = Task {
            task_id: "a".into(),
            tool: "noop".into(),
            execution_target: ExecutionTarget::Server,
            depends_on: vec![],
            inputs: HashMap::new(),
            input_bindings: HashMap::new(),
            lifecycle_messages: None,
            control: TaskControl::default(),
        };
        let record = TaskRecord::seed(task);
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.output.is_none());
        assert_eq!(record.generation, 0);
    }

    #[test]
    fn duration_ms_none_until_both_timestamps_set() {
        let task = Task {
            task_id: "a".into(),
            tool: "noop".into(),
            execution_target: ExecutionTarget::Server,
            depends_on: vec![],
            inputs: HashMap::new(),
            input_bindings: HashMap::new(),
            lifecycle_messages: None,
            control: TaskControl::default(),
        };
        let mut record = TaskRecord::seed(task);
        assert!(record.duration_ms().is_none());
        record.started_at = Some(Utc::now());
        assert!(record.duration_ms().is_none());
        record.completed_at = Some(Utc::now());
        assert!(record.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = Plan {
            tasks: vec![Task {
                task_id: "step_1".into(),
                tool: "file_create".into(),
                execution_target: ExecutionTarget::Client,
                depends_on: vec!["step_0".into()],
                inputs: HashMap::new(),
                input_bindings: {
                    let mut m = HashMap::new();
                    m.insert("content".into(), "$.step_0.data.text".into());
                    m
                },
                lifecycle_messages: None,
                control: TaskControl::default(),
            }],
        };
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tasks[0].task_id, "step_1");
        assert_eq!(back.tasks[0].depends_on, vec!["step_0"]);
    }
}
