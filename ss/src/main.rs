//! Store inspection CLI entry point

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};

use streamstore::cli::{Cli, Command};
use streamstore::{StoreClient, StoreConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = StoreConfig::default();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }

    let project_root = std::env::current_dir().context("Failed to get current directory")?;
    let client = StoreClient::new(config.db_path(&project_root));

    match cli.command {
        Command::Streams { campaign } => {
            let campaign = resolve_campaign(&client, campaign)?;
            let streams = client.stream_list(campaign.as_deref())?;

            if streams.is_empty() {
                println!("No streams found");
                return Ok(());
            }

            for stream in streams {
                let deps = if stream.dependencies.is_empty() {
                    "no dependencies".dimmed().to_string()
                } else {
                    format!("depends on: {}", stream.dependencies.join(", "))
                };
                println!("{} ({}) {}", stream.stream_id.bold(), stream.stream_name, deps);
            }
        }

        Command::Progress { stream_id, campaign } => {
            let campaign = resolve_campaign(&client, campaign)?;
            match client.stream_progress(&stream_id, campaign.as_deref())? {
                Some(progress) => {
                    println!(
                        "{}: {}/{} completed ({}%), {} in progress, {} pending, {} blocked",
                        progress.stream_id.bold(),
                        progress.completed_tasks,
                        progress.total_tasks,
                        progress.completion_percentage(),
                        progress.in_progress_tasks,
                        progress.pending_tasks,
                        progress.blocked_tasks,
                    );
                }
                None => println!("No tasks found for stream {}", stream_id),
            }
        }

        Command::Summary { campaign } => {
            let campaign = resolve_campaign(&client, campaign)?;
            let summary = client.progress_summary(campaign.as_deref())?;

            println!(
                "Tasks: {}/{} completed ({}%)",
                summary.completed_tasks,
                summary.total_tasks,
                summary.completion_percentage()
            );
            println!("  In progress: {}", summary.in_progress_tasks);
            println!("  Pending:     {}", summary.pending_tasks);
            println!("  Blocked:     {}", summary.blocked_tasks);
            println!(
                "Streams: {}/{} complete",
                summary.completed_stream_count, summary.stream_count
            );
        }

        Command::Campaign => match client.active_campaign_id()? {
            Some(id) => {
                match client.campaign_details(&id)? {
                    Some(details) => {
                        println!("{} ({})", details.name.bold(), details.id);
                        println!("  Status: {}", details.status);
                        if let Some(goal) = details.goal {
                            println!("  Goal: {}", goal);
                        }
                    }
                    None => println!("{}", id),
                }
            }
            None => println!("No active campaign"),
        },
    }

    Ok(())
}

/// Use the explicitly given campaign, falling back to the active one
fn resolve_campaign(client: &StoreClient, explicit: Option<String>) -> Result<Option<String>> {
    match explicit {
        Some(c) => Ok(Some(c)),
        None => Ok(client.active_campaign_id()?),
    }
}
