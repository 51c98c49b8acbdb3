//! Composition root. Initializes tracing, loads configuration, and
//! dispatches to the subcommand bodies in `commands`, mirroring the
//! teacher's `sa-gateway` main/cli split.

mod cli;
mod commands;

use ao_domain::config::ConfigSeverity;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Cli::parse();
    let (config, config_path) = cli::load_config(args.config.as_ref())?;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }
    if let Some(path) = &config_path {
        tracing::info!(config_path = %path, "configuration loaded");
    } else {
        tracing::info!("no config file found, running with built-in defaults");
    }

    match args.command {
        Command::Plan(cmd) => commands::plan_command(cmd, &config).await,
        Command::Registry(cmd) => commands::registry_command(cmd, &config),
        Command::Providers(cmd) => commands::providers_command(cmd, &config).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ao_cli=debug")))
        .compact()
        .init();
}
