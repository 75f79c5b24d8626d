//! CLI argument parsing for the store inspection tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(version, about = "Inspect the stream task store", long_about = None)]
pub struct Cli {
    /// Base directory holding per-workspace store databases
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Workspace identifier (defaults to the current directory name)
    #[arg(short, long)]
    pub workspace: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List streams with their dependency references
    Streams {
        /// Restrict to one campaign (defaults to the active campaign)
        #[arg(short, long)]
        campaign: Option<String>,
    },

    /// Show task counts for one stream
    Progress {
        /// Stream ID
        #[arg(required = true)]
        stream_id: String,

        /// Restrict to one campaign (defaults to the active campaign)
        #[arg(short, long)]
        campaign: Option<String>,
    },

    /// Show overall progress across all streams
    Summary {
        /// Restrict to one campaign (defaults to the active campaign)
        #[arg(short, long)]
        campaign: Option<String>,
    },

    /// Show the active campaign
    Campaign,
}
