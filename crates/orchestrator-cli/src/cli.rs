//! Argument parsing and config loading, grounded in the teacher's
//! `sa-gateway::cli::mod` (`Cli`/`Command` shape, `load_config`'s
//! env-var-or-default-path resolution).

use std::path::PathBuf;

use ao_domain::config::Config;
use clap::{Parser, Subcommand};

/// The Agentic Task Orchestration Core.
#[derive(Debug, Parser)]
#[command(name = "ao-orchestrator", version, about)]
pub struct Cli {
    /// Path to a TOML config file. Overrides `AO_CONFIG` when given.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan admission and execution.
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Loaded tool registry introspection.
    #[command(subcommand)]
    Registry(RegistryCommand),
    /// Configured LLM provider introspection.
    #[command(subcommand)]
    Providers(ProvidersCommand),
}

#[derive(Debug, Subcommand)]
pub enum PlanCommand {
    /// Admit a Plan JSON document and drive it to completion.
    Run {
        /// Path to a Plan JSON file (`{ "tasks": [...] }`).
        file: PathBuf,
        /// Session id to admit the plan under (defaults to a random id).
        #[arg(long)]
        session: Option<String>,
    },
    /// Admit a Plan JSON document without executing it: DAG and registry
    /// validation only.
    Validate {
        /// Path to a Plan JSON file.
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// List every tool in the loaded registry.
    List,
}

#[derive(Debug, Subcommand)]
pub enum ProvidersCommand {
    /// List configured providers and their init status.
    Status,
}

/// Load configuration from `--config`, else `$AO_CONFIG`, else built-in
/// defaults (§6: "no configuration is required to start"). Shared by every
/// subcommand so the resolution logic lives in one place.
pub fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<(Config, Option<String>)> {
    let path = explicit
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("AO_CONFIG").ok());

    let Some(path) = path else {
        return Ok((Config::default(), None));
    };

    if !std::path::Path::new(&path).exists() {
        return Ok((Config::default(), Some(path)));
    }

    let raw = std::fs::read_to_string(&path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    let config: Config = toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))?;
    Ok((config, Some(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_path_falls_back_to_defaults() {
        let (config, path) = load_config(Some(&PathBuf::from("/nonexistent/ao-config.toml"))).unwrap();
        assert_eq!(config.engine.default_task_timeout_ms, 300_000);
        assert!(path.is_some());
    }

    #[test]
    fn explicit_path_loads_and_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ao.toml");
        std::fs::write(&file, "[engine]\ndefault_task_timeout_ms = 1234\n").unwrap();
        let (config, path) = load_config(Some(&file)).unwrap();
        assert_eq!(config.engine.default_task_timeout_ms, 1234);
        assert_eq!(path.unwrap(), file.to_string_lossy());
    }
}
