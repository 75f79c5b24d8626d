//! StreamDaemon - dependency-aware orchestrator for parallel worker streams
//!
//! Streams are independent units of work with their own task lists, tracked
//! in an external task store. StreamDaemon decides when each stream may
//! start, spawns a detached worker process per stream, detects and restarts
//! crashed workers within a bound, and gives every non-root stream an
//! isolated git worktree that is merged back into the main line when the
//! whole run completes.
//!
//! # Core Concepts
//!
//! - **Store as truth**: completion is only ever read from the task store,
//!   never inferred from worker output
//! - **Detached workers**: workers survive the orchestrator; only a PID file
//!   and a log file connect them back
//! - **Bounded recovery**: crashed workers restart at most a configured
//!   number of times before surfacing as stuck
//! - **Isolated failures**: worktree, spawn, and merge failures affect only
//!   their stream
//!
//! # Modules
//!
//! - [`graph`] - dependency resolution and depth ordering
//! - [`supervisor`] - process spawning and liveness
//! - [`monitor`] - dead-worker detection and restart accounting
//! - [`worktree`] - worktree lifecycle and merge phase
//! - [`preflight`] - environment validation
//! - [`orchestrator`] - the scheduling loop
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod brief;
pub mod cli;
pub mod config;
pub mod graph;
pub mod monitor;
pub mod orchestrator;
pub mod preflight;
pub mod supervisor;
pub mod worktree;

// Re-export commonly used types
pub use brief::build_brief;
pub use config::{AgentConfig, Config, GitConfig, OrchestratorConfig};
pub use graph::DependencyGraph;
pub use monitor::{DeadWorkerScan, RestartTracker};
pub use orchestrator::{BlockedStream, MAIN_STREAM_ID, Orchestrator, RunOutcome};
pub use preflight::{Check, CheckOutcome, PreflightReport, PreflightValidator};
pub use supervisor::{ProcessProbe, SpawnOutcome, SpawnSpec, Supervisor, SystemProbe};
pub use worktree::{MergeOutcome, MergeReport, WorktreeError, WorktreeManager};
