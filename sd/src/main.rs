//! StreamDaemon CLI entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use streamdaemon::cli::{Cli, Command};
use streamdaemon::config::Config;
use streamdaemon::orchestrator::{Orchestrator, RunOutcome};
use streamdaemon::preflight::{PreflightReport, PreflightValidator};
use streamstore::StoreClient;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streamdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write tracing output to the log file; the console is for operator output
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("streamdaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let project_root = std::env::current_dir().context("Failed to get current directory")?;

    match cli.command {
        Command::Preflight => {
            let report = run_preflight(&config, &project_root).await;
            report.print();
            if !report.is_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }

        Command::Start { stream_id } => {
            // Validate the environment before committing to any spawn
            let report = run_preflight(&config, &project_root).await;
            report.print();
            if !report.is_healthy() {
                std::process::exit(1);
            }

            print_agent_routing_info(&config, &project_root);

            let mut orchestrator = Orchestrator::new(config, project_root)?;
            match stream_id {
                Some(id) => {
                    let spawned = orchestrator.spawn_stream(&id, true).await?;
                    if !spawned {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                None => match orchestrator.run().await? {
                    RunOutcome::Complete => Ok(()),
                    RunOutcome::Stuck { .. } => std::process::exit(1),
                },
            }
        }

        Command::Status => {
            let orchestrator = Orchestrator::new(config, project_root)?;
            orchestrator.status();
            Ok(())
        }

        Command::Stop { stream_id } => {
            let orchestrator = Orchestrator::new(config, project_root)?;
            match stream_id {
                Some(id) => orchestrator.stop_one(&id),
                None => orchestrator.stop_all(),
            }
            Ok(())
        }

        Command::Logs { stream_id } => {
            let orchestrator = Orchestrator::new(config, project_root)?;
            orchestrator.tail_logs(&stream_id)
        }

        Command::Plan => {
            let orchestrator = Orchestrator::new(config, project_root)?;
            orchestrator.plan()
        }

        Command::Monitor {
            auto_restart,
            daemon,
            interval,
            max_restarts,
        } => {
            let mut config = config;
            if let Some(max) = max_restarts {
                config.orchestrator.max_restarts = max;
            }

            let mut orchestrator = Orchestrator::new(config, project_root)?;
            if daemon {
                orchestrator.run_monitor(Duration::from_secs(interval), auto_restart).await
            } else {
                let dead = orchestrator.check_dead_once(auto_restart).await?;
                if !dead.is_empty() {
                    std::process::exit(1);
                }
                Ok(())
            }
        }
    }
}

async fn run_preflight(config: &Config, project_root: &Path) -> PreflightReport {
    let state_dirs = vec![
        config.orchestrator.pid_dir(project_root),
        config.orchestrator.log_dir(project_root),
        config.git.worktrees_base(project_root),
    ];

    PreflightValidator::new(
        project_root.to_path_buf(),
        config.agent.program.clone(),
        state_dirs,
        config.store.db_path(project_root),
    )
    .validate_all()
    .await
}

/// Informational: tasks routed to specialized agents rather than the worker
fn print_agent_routing_info(config: &Config, project_root: &Path) {
    let client = StoreClient::new(config.store.db_path(project_root));

    let Ok(Some(campaign)) = client.active_campaign_id() else {
        return;
    };
    let Ok(tasks) = client.tasks_assigned_elsewhere(Some(&campaign)) else {
        return;
    };
    if tasks.is_empty() {
        return;
    }

    let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
    for task in &tasks {
        *by_agent.entry(task.assigned_agent.clone()).or_default() += 1;
    }

    println!(
        "{} Found {} task(s) assigned to specialized agents:",
        "[sd]".blue().bold(),
        tasks.len()
    );
    for (agent, count) in by_agent {
        println!("    • @{}: {} task(s)", agent, count);
    }
    println!("    Workers will route these tasks to their assigned agents.");
    println!();
}
