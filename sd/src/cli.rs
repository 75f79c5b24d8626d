//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// StreamDaemon - dependency-aware stream orchestrator
#[derive(Parser)]
#[command(
    name = "sd",
    about = "Orchestrate parallel worker streams with dependency-aware scheduling",
    version,
    after_help = "Logs are written to: ~/.local/share/streamdaemon/logs/streamdaemon.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start all streams respecting dependencies, or one stream by ID
    Start {
        /// Stream to start (all ready streams when omitted)
        stream_id: Option<String>,
    },

    /// Show status of all streams grouped by dependency depth
    Status,

    /// Stop all running workers, or one stream's worker
    Stop {
        /// Stream to stop (all workers when omitted)
        stream_id: Option<String>,
    },

    /// Tail a stream's log for the current run
    Logs {
        /// Stream whose log to follow
        stream_id: String,
    },

    /// Run environment checks without scheduling anything
    Preflight,

    /// Print the execution plan without spawning workers (dry run)
    Plan,

    /// Check for dead workers, optionally restarting them
    Monitor {
        /// Restart dead workers within the restart bound
        #[arg(long)]
        auto_restart: bool,

        /// Keep checking on an interval instead of once
        #[arg(long)]
        daemon: bool,

        /// Check interval in seconds for daemon mode
        #[arg(long, default_value = "30")]
        interval: u64,

        /// Override the maximum restarts per worker
        #[arg(long)]
        max_restarts: Option<u32>,
    },
}
