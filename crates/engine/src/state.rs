//! `ExecutionState`: the per-session task map and its admission-time
//! invariants (no duplicate ids, no dangling deps, no cycles).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ao_domain::error::{Error, Result};
use ao_domain::task::{Plan, Task, TaskOutput, TaskRecord, TaskStatus};
use parking_lot::RwLock;
use tokio::sync::{Notify, Semaphore};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS cycle check over `depends_on`. Run once at plan admission — the
/// scheduling loop itself never needs to re-check this.
fn detect_cycle(tasks: &[Task]) -> Result<()> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();
    let mut colors: HashMap<&str, Color> = tasks.iter().map(|t| (t.task_id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Task>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<()> {
        match colors.get(id) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => {
                return Err(Error::Planning(format!("dependency cycle through task \"{id}\"")))
            }
            _ => {}
        }
        colors.insert(id, Color::Gray);
        if let Some(task) = by_id.get(id) {
            for dep in &task.depends_on {
                visit(dep.as_str(), by_id, colors)?;
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }

    for task in tasks {
        visit(task.task_id.as_str(), &by_id, &mut colors)?;
    }
    Ok(())
}

/// Holds every `TaskRecord` for one admitted plan, plus the synchronization
/// primitives the scheduling loop and its callers need: a completion
/// `Notify` for "the whole plan reached a terminal state", and an optional
/// per-session fan-out semaphore.
pub struct ExecutionState {
    pub session_id: String,
    tasks: RwLock<HashMap<String, TaskRecord>>,
    completion: Notify,
    changed: Notify,
    concurrency: Option<Arc<Semaphore>>,
}

impl ExecutionState {
    /// Admit a plan: reject duplicate task ids, dangling dependencies, and
    /// dependency cycles before a single `TaskRecord` is created.
    pub fn seed(session_id: impl Into<String>, plan: Plan, max_concurrent_tasks: Option<usize>) -> Result<Self> {
        let ids: HashSet<&str> = plan.tasks.iter().map(|t| t.task_id.as_str()).collect();
        if ids.len() != plan.tasks.len() {
            return Err(Error::Planning("plan contains duplicate task ids".into()));
        }
        for task in &plan.tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::Planning(format!(
                        "task \"{}\" depends on unknown task \"{dep}\"",
                        task.task_id
                    )));
                }
            }
        }
        detect_cycle(&plan.tasks)?;

        let tasks = plan
            .tasks
            .into_iter()
            .map(|t| (t.task_id.clone(), TaskRecord::seed(t)))
            .collect();

        Ok(Self {
            session_id: session_id.into(),
            tasks: RwLock::new(tasks),
            completion: Notify::new(),
            changed: Notify::new(),
            concurrency: max_concurrent_tasks.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        })
    }

    pub fn concurrency(&self) -> Option<Arc<Semaphore>> {
        self.concurrency.clone()
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Point-in-time copy of every record, for binding resolution and
    /// prevalidate (both want a plain map, not a lock guard).
    pub fn snapshot(&self) -> HashMap<String, TaskRecord> {
        self.tasks.read().clone()
    }

    pub fn update<F>(&self, task_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut TaskRecord),
    {
        let found = {
            let mut tasks = self.tasks.write();
            if let Some(record) = tasks.get_mut(task_id) {
                f(record);
                true
            } else {
                false
            }
        };
        if found {
            self.changed.notify_waiters();
        }
        found
    }

    /// Wait until the next `update()` call, or return immediately if one
    /// raced ahead of this call. Used by the scheduling loop to avoid
    /// busy-polling `ready_set()` while every task is in flight.
    pub async fn wait_for_change(&self) {
        self.changed.notified().await;
    }

    /// Every task with `status ∈ {pending, waiting}` whose dependencies are
    /// all `completed` — step 1 of the scheduling loop (§4.3).
    pub fn ready_set(&self) -> Vec<String> {
        let tasks = self.tasks.read();
        tasks
            .values()
            .filter(|r| matches!(r.status, TaskStatus::Pending | TaskStatus::Waiting))
            .filter(|r| {
                r.task
                    .depends_on
                    .iter()
                    .all(|d| tasks.get(d).map(|dr| dr.status == TaskStatus::Completed).unwrap_or(false))
            })
            .map(|r| r.task.task_id.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.tasks.read().values().all(|r| r.status.is_terminal())
    }

    pub fn notify_completion(&self) {
        self.completion.notify_waiters();
    }

    pub async fn wait_for_completion(&self) {
        self.completion.notified().await;
    }

    fn dependents_of(&self, tasks: &HashMap<String, TaskRecord>, task_id: &str) -> Vec<String> {
        tasks
            .values()
            .filter(|r| r.task.depends_on.iter().any(|d| d == task_id))
            .map(|r| r.task.task_id.clone())
            .collect()
    }

    /// Every task reachable by following `depends_on` edges backwards from
    /// `task_id` — the set an `abort` failure policy needs to fail.
    pub fn transitive_dependents(&self, task_id: &str) -> Vec<String> {
        let tasks = self.tasks.read();
        let mut seen = HashSet::new();
        let mut stack = vec![task_id.to_string()];
        while let Some(id) = stack.pop() {
            for dependent in self.dependents_of(&tasks, &id) {
                if seen.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// The already-completed subset of `task_id`'s dependencies, keyed by
    /// task id — used for the server-completed-dependency enrichment at
    /// emit time (§4.3/§4.6).
    pub fn completed_dependencies(&self, task_id: &str) -> HashMap<String, TaskOutput> {
        let tasks = self.tasks.read();
        let Some(record) = tasks.get(task_id) else {
            return HashMap::new();
        };
        record
            .task
            .depends_on
            .iter()
            .filter_map(|dep| {
                let dep_record = tasks.get(dep)?;
                if dep_record.status != TaskStatus::Completed {
                    return None;
                }
                dep_record.output.clone().map(|o| (dep.clone(), o))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::task::{ExecutionTarget, TaskControl};
    use std::collections::HashMap as Map;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            task_id: id.into(),
            tool: "noop".into(),
            execution_target: ExecutionTarget::Server,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            inputs: Map::new(),
            input_bindings: Map::new(),
            lifecycle_messages: None,
            control: TaskControl::default(),
        }
    }

    #[test]
    fn seed_accepts_acyclic_plan() {
        let plan = Plan {
            tasks: vec![task("a", &[]), task("b", &["a"])],
        };
        assert!(ExecutionState::seed("s1", plan, None).is_ok());
    }

    #[test]
    fn seed_rejects_duplicate_ids() {
        let plan = Plan {
            tasks: vec![task("a", &[]), task("a", &[])],
        };
        assert!(matches!(
            ExecutionState::seed("s1", plan, None),
            Err(Error::Planning(_))
        ));
    }

    #[test]
    fn seed_rejects_dangling_dependency() {
        let plan = Plan {
            tasks: vec![task("a", &["ghost"])],
        };
        assert!(matches!(
            ExecutionState::seed("s1", plan, None),
            Err(Error::Planning(_))
        ));
    }

    #[test]
    fn seed_rejects_direct_cycle() {
        let plan = Plan {
            tasks: vec![task("a", &["b"]), task("b", &["a"])],
        };
        assert!(matches!(
            ExecutionState::seed("s1", plan, None),
            Err(Error::Planning(_))
        ));
    }

    #[test]
    fn seed_rejects_self_cycle() {
        let plan = Plan {
            tasks: vec![task("a", &["a"])],
        };
        assert!(matches!(
            ExecutionState::seed("s1", plan, None),
            Err(Error::Planning(_))
        ));
    }

    #[test]
    fn ready_set_excludes_tasks_with_incomplete_deps() {
        let plan = Plan {
            tasks: vec![task("a", &[]), task("b", &["a"])],
        };
        let state = ExecutionState::seed("s1", plan, None).unwrap();
        assert_eq!(state.ready_set(), vec!["a".to_string()]);
    }

    #[test]
    fn ready_set_includes_downstream_once_dependency_completed() {
        let plan = Plan {
            tasks: vec![task("a", &[]), task("b", &["a"])],
        };
        let state = ExecutionState::seed("s1", plan, None).unwrap();
        state.update("a", |r| {
            r.status = TaskStatus::Completed;
            r.output = Some(TaskOutput::ok(Map::new()));
        });
        assert_eq!(state.ready_set(), vec!["b".to_string()]);
    }

    #[test]
    fn transitive_dependents_follows_chain() {
        let plan = Plan {
            tasks: vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])],
        };
        let state = ExecutionState::seed("s1", plan, None).unwrap();
        let mut dependents = state.transitive_dependents("a");
        dependents.sort();
        assert_eq!(dependents, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn is_complete_false_until_every_task_terminal() {
        let plan = Plan {
            tasks: vec![task("a", &[])],
        };
        let state = ExecutionState::seed("s1", plan, None).unwrap();
        assert!(!state.is_complete());
        state.update("a", |r| r.status = TaskStatus::Completed);
        assert!(state.is_complete());
    }
}
