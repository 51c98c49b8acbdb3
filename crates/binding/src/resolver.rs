//! Binding resolution: evaluate `input_bindings` against completed upstream
//! task output, per `spec.md` §4.4.

use std::collections::HashMap;
use std::fmt;

use ao_domain::error::{Error, Result};
use ao_domain::task::{Task, TaskRecord, TaskStatus};
use parking_lot::RwLock;
use serde_json::Value;

use crate::path::BindingPath;

/// Why a single binding failed to resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingFailure {
    /// The referenced `task_id` is not present in the session state.
    NotFound(String),
    /// The referenced task exists but has not reached a terminal state.
    NotCompleted(String),
    /// The referenced task completed but `output.success == false`.
    FailedUpstream(String),
    /// The path itself is malformed, or none of its segments matched.
    PathError(String),
}

impl fmt::Display for BindingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingFailure::NotFound(id) => write!(f, "referenced task \"{id}\" not found"),
            BindingFailure::NotCompleted(id) => write!(f, "referenced task \"{id}\" has not completed"),
            BindingFailure::FailedUpstream(id) => {
                write!(f, "referenced task \"{id}\" failed, no output to bind to")
            }
            BindingFailure::PathError(msg) => write!(f, "{msg}"),
        }
    }
}

/// Outcome of checking whether a task's bindings can resolve right now,
/// without performing the substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum PrevalidateOutcome {
    /// Every binding resolves against the current state.
    Ready,
    /// At least one referenced task has not reached a terminal state yet.
    NotYetReady,
    /// At least one binding will never resolve given the current state
    /// (unknown task id, or the upstream task failed).
    WillFail(BindingFailure),
}

/// Compiles and caches `BindingPath` parses so a repeatedly-used expression
/// (e.g. re-checked on every scheduling tick) is parsed once.
pub struct BindingResolver {
    cache: RwLock<HashMap<String, BindingPath>>,
}

impl BindingResolver {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn compile(&self, expr: &str) -> Result<BindingPath> {
        if let Some(path) = self.cache.read().get(expr) {
            return Ok(path.clone());
        }
        let path = BindingPath::parse(expr)?;
        self.cache.write().insert(expr.to_string(), path.clone());
        Ok(path)
    }

    /// Build the stable output envelope for a completed task: `{ data,
    /// success, error }`. Reads `output` in place, no deep copy beyond the
    /// cheap `Value` clone serde_json already does for map values.
    fn envelope(record: &TaskRecord) -> Value {
        let output = record.output.as_ref();
        serde_json::json!({
            "data": output.map(|o| Value::Object(
                o.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            )).unwrap_or(Value::Null),
            "success": output.map(|o| o.success).unwrap_or(false),
            "error": output.and_then(|o| o.error.clone()),
        })
    }

    fn lookup_and_check<'a>(
        task_id: &str,
        state: &'a HashMap<String, TaskRecord>,
    ) -> std::result::Result<&'a TaskRecord, BindingFailure> {
        let record = state
            .get(task_id)
            .ok_or_else(|| BindingFailure::NotFound(task_id.to_string()))?;
        if record.status != TaskStatus::Completed && record.status != TaskStatus::Failed {
            return Err(BindingFailure::NotCompleted(task_id.to_string()));
        }
        let success = record.output.as_ref().map(|o| o.success).unwrap_or(false);
        if !success {
            return Err(BindingFailure::FailedUpstream(task_id.to_string()));
        }
        Ok(record)
    }

    fn evaluate_path(path: &BindingPath, state: &HashMap<String, TaskRecord>) -> std::result::Result<Value, BindingFailure> {
        let record = Self::lookup_and_check(&path.task_id, state)?;
        let envelope = Self::envelope(record);

        let mut current = &envelope;
        for segment in &path.segments {
            current = current.get(segment).ok_or_else(|| {
                BindingFailure::PathError(format!(
                    "field \"{segment}\" not found in output of \"{}\"",
                    path.task_id
                ))
            })?;
        }
        Ok(current.clone())
    }

    /// Merge static `inputs` with resolved `input_bindings`; bindings win on
    /// key collision. A failed single-binding resolution aborts the whole
    /// call with the resolver's message, per §4.4 ("the tool is not invoked").
    pub fn resolve_task_inputs(
        &self,
        task: &Task,
        state: &HashMap<String, TaskRecord>,
    ) -> Result<HashMap<String, Value>> {
        let mut resolved: HashMap<String, Value> = task
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (param, expr) in &task.input_bindings {
            let path = self.compile(expr)?;
            let value = Self::evaluate_path(&path, state).map_err(|f| {
                Error::Binding(format!("failed to resolve \"{param}\" ({expr}): {f}"))
            })?;
            resolved.insert(param.clone(), value);
        }

        Ok(resolved)
    }

    /// Check whether every binding on `task` could resolve right now,
    /// without substituting values. The engine uses this to distinguish
    /// *not-yet-ready* (keep waiting) from *ready-but-will-fail*
    /// (transition straight to `failed`).
    pub fn prevalidate(&self, task: &Task, state: &HashMap<String, TaskRecord>) -> PrevalidateOutcome {
        let mut not_yet_ready = false;

        for expr in task.input_bindings.values() {
            let path = match BindingPath::parse(expr) {
                Ok(p) => p,
                Err(e) => return PrevalidateOutcome::WillFail(BindingFailure::PathError(e.to_string())),
            };
            match Self::lookup_and_check(&path.task_id, state) {
                Ok(record) => {
                    let envelope = Self::envelope(record);
                    let mut current = &envelope;
                    let mut ok = true;
                    for segment in &path.segments {
                        match current.get(segment) {
                            Some(v) => current = v,
                            None => {
                                ok = false;
                                break;
                            }
                        }
                    }
                    if !ok {
                        return PrevalidateOutcome::WillFail(BindingFailure::PathError(format!(
                            "path \"{expr}\" does not match the output of \"{}\"",
                            path.task_id
                        )));
                    }
                }
                Err(BindingFailure::NotCompleted(id)) => {
                    let _ = id;
                    not_yet_ready = true;
                }
                Err(failure) => return PrevalidateOutcome::WillFail(failure),
            }
        }

        if not_yet_ready {
            PrevalidateOutcome::NotYetReady
        } else {
            PrevalidateOutcome::Ready
        }
    }
}

impl Default for BindingResolver {
    fn default() -> Self {
        Self::new()
    }
}
