//! Subcommand bodies. Each function owns one subcommand's output format;
//! `main.rs` only dispatches into these.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ao_binding::BindingResolver;
use ao_domain::config::{Config, ExecutionMode};
use ao_domain::task::Plan;
use ao_emitter::{EchoSink, InProcessEmitter, ReconnectBackoff, WebSocketEmitter};
use ao_engine::{ApprovalQueue, ClientDispatch, Engine, ExecutionState, ServerExecutor};
use ao_providers::ProviderManager;
use ao_registry::{InstanceRegistry, ToolRegistry};

use crate::cli::{PlanCommand, ProvidersCommand, RegistryCommand};

fn load_plan(file: &Path) -> anyhow::Result<Plan> {
    let raw = std::fs::read_to_string(file).map_err(|e| anyhow::anyhow!("reading {}: {e}", file.display()))?;
    serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", file.display()))
}

fn build_registry(config: &Config) -> anyhow::Result<Arc<ToolRegistry>> {
    let registry = match &config.registry.tools_path {
        Some(path) => ToolRegistry::load(path).map_err(|e| anyhow::anyhow!("loading tool registry: {e}"))?,
        None => ToolRegistry::empty(),
    };
    Ok(Arc::new(registry))
}

/// Validate every task's tool against the registry before admission — the
/// same check `Engine::run` would eventually hit per task, surfaced here
/// up front so `plan validate` and `plan run` fail fast and together.
fn validate_tools(plan: &Plan, registry: &ToolRegistry) -> anyhow::Result<()> {
    let mut unknown = Vec::new();
    for task in &plan.tasks {
        if registry.validate_tool(&task.tool).is_err() {
            unknown.push(format!("{} (tool \"{}\")", task.task_id, task.tool));
        }
    }
    if !unknown.is_empty() {
        anyhow::bail!("unknown tools referenced by: {}", unknown.join(", "));
    }
    Ok(())
}

pub async fn plan_command(cmd: PlanCommand, config: &Config) -> anyhow::Result<()> {
    match cmd {
        PlanCommand::Validate { file } => {
            let plan = load_plan(&file)?;
            let registry = build_registry(config)?;
            let session_id = uuid::Uuid::new_v4().to_string();
            ExecutionState::seed(&session_id, plan.clone(), config.engine.max_concurrent_tasks)
                .map_err(|e| anyhow::anyhow!("plan rejected: {e}"))?;
            validate_tools(&plan, &registry)?;
            println!("plan is valid: {} task(s)", plan.tasks.len());
            Ok(())
        }
        PlanCommand::Run { file, session } => run_plan(&file, session, config).await,
    }
}

async fn run_plan(file: &Path, session: Option<String>, config: &Config) -> anyhow::Result<()> {
    let plan = load_plan(file)?;
    let registry = build_registry(config)?;
    validate_tools(&plan, &registry)?;

    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let state = Arc::new(
        ExecutionState::seed(&session_id, plan, config.engine.max_concurrent_tasks)
            .map_err(|e| anyhow::anyhow!("plan rejected: {e}"))?,
    );
    let resolver = Arc::new(BindingResolver::new());
    let instances = Arc::new(InstanceRegistry::new());
    let executor = Arc::new(ServerExecutor::new(registry, instances));
    let approvals = Arc::new(ApprovalQueue::new(Duration::from_millis(config.engine.approval_timeout_ms)));
    let default_timeout = Duration::from_millis(config.engine.default_task_timeout_ms);

    // Client-targeted tasks need a dispatch surface bound back to the engine
    // after construction, so each branch builds the engine first and wires
    // the sink's engine handle in afterward (mirrors `EchoSink`/
    // `WebSocketEmitter`'s own late-binding between themselves and `Engine`).
    tracing::info!(session_id = %session_id, "admitted plan, starting execution");
    match config.emitter.mode {
        ExecutionMode::Desktop => {
            let sink = Arc::new(EchoSink::new());
            let dispatch: Arc<dyn ClientDispatch> = Arc::new(InProcessEmitter::new(sink.clone()));
            let engine = Engine::new(state.clone(), resolver, executor, dispatch, approvals, default_timeout);
            sink.bind(engine.clone());
            engine.run().await;
        }
        ExecutionMode::Hosted => {
            let url = config
                .emitter
                .websocket
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("emitter.mode is hosted but emitter.websocket.url is not set"))?;
            let reconnect = &config.emitter.websocket.reconnect;
            let backoff = ReconnectBackoff {
                initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
                max_delay: Duration::from_millis(reconnect.max_delay_ms),
                backoff_factor: reconnect.backoff_factor,
                max_attempts: reconnect.max_attempts,
            };
            let emitter = WebSocketEmitter::connect(url, backoff);
            let dispatch = emitter.clone() as Arc<dyn ClientDispatch>;
            let engine = Engine::new(state.clone(), resolver, executor, dispatch, approvals, default_timeout);
            emitter.bind(engine.clone());
            engine.run().await;
        }
    }

    let snapshot = state.snapshot();
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut failures = Vec::new();
    for record in snapshot.values() {
        match record.status {
            ao_domain::task::TaskStatus::Completed => completed += 1,
            ao_domain::task::TaskStatus::Failed => {
                failed += 1;
                let reason = record.output.as_ref().and_then(|o| o.error.clone()).unwrap_or_default();
                failures.push(format!("{}: {}", record.task.task_id, reason));
            }
            _ => {}
        }
    }

    println!("session {session_id}: {completed} completed, {failed} failed");
    for failure in &failures {
        println!("  failed: {failure}");
    }

    if failed > 0 {
        anyhow::bail!("{failed} task(s) failed");
    }
    Ok(())
}

pub fn registry_command(cmd: RegistryCommand, config: &Config) -> anyhow::Result<()> {
    match cmd {
        RegistryCommand::List => {
            let registry = build_registry(config)?;
            let tools = registry.list();
            if tools.is_empty() {
                println!("registry is empty");
                return Ok(());
            }
            for tool in tools {
                println!(
                    "{:<24} target={:<8} category={:<16} {}",
                    tool.tool_name,
                    format!("{:?}", tool.execution_target).to_lowercase(),
                    tool.category,
                    tool.description
                );
            }
            Ok(())
        }
    }
}

pub async fn providers_command(cmd: ProvidersCommand, config: &Config) -> anyhow::Result<()> {
    match cmd {
        ProvidersCommand::Status => {
            let manager = ProviderManager::from_config(&config.providers);
            let ids = manager.provider_ids();
            if ids.is_empty() {
                println!("no providers registered");
            }
            for id in &ids {
                println!("{id}: active");
            }
            for err in manager.init_errors() {
                println!("{}: failed to initialize ({})", err.provider_id, err.error);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plan(dir: &tempfile::TempDir, tasks_json: &str) -> std::path::PathBuf {
        let file = dir.path().join("plan.json");
        std::fs::write(&file, tasks_json).unwrap();
        file
    }

    #[tokio::test]
    async fn validate_accepts_a_plan_against_an_empty_registry_with_no_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(&dir, r#"{"tasks": []}"#);
        let config = Config::default();
        let result = plan_command(PlanCommand::Validate { file }, &config).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn validate_rejects_unknown_tool_against_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            &dir,
            r#"{"tasks": [{"task_id": "a", "tool": "ghost", "execution_target": "server"}]}"#,
        );
        let config = Config::default();
        let result = plan_command(PlanCommand::Validate { file }, &config).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn validate_rejects_dependency_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            &dir,
            r#"{"tasks": [
                {"task_id": "a", "tool": "x", "execution_target": "server", "depends_on": ["b"]},
                {"task_id": "b", "tool": "x", "execution_target": "server", "depends_on": ["a"]}
            ]}"#,
        );
        let config = Config::default();
        let result = plan_command(PlanCommand::Validate { file }, &config).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn run_plan_fails_task_targeting_unregistered_tool() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            &dir,
            r#"{"tasks": [{"task_id": "a", "tool": "ghost", "execution_target": "server"}]}"#,
        );
        let config = Config::default();
        let result = plan_command(PlanCommand::Run { file, session: None }, &config).await;
        assert!(result.is_err());
    }

    #[test]
    fn registry_list_on_empty_registry_does_not_error() {
        let config = Config::default();
        assert!(registry_command(RegistryCommand::List, &config).is_ok());
    }

    #[tokio::test]
    async fn providers_status_with_no_providers_configured_does_not_error() {
        let config = Config::default();
        assert!(providers_command(ProvidersCommand::Status, &config).await.is_ok());
    }
}
