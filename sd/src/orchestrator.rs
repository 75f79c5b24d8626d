//! The scheduling loop
//!
//! Polls stream readiness against the task store, spawns ready streams,
//! restarts dead workers within their bound, and detects global completion
//! or deadlock. Completion drives the merge/archive/cleanup phase. The loop
//! itself is sequential: one poll iteration runs to completion before the
//! next begins, and all parallelism lives in the detached worker processes.
//!
//! A single orchestrator instance owns a PID directory; two instances
//! racing on the same directory are not supported.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use eyre::{Context, Result, bail};
use tracing::{info, warn};

use streamstore::{CampaignDetails, StoreClient, StreamInfo, StreamProgress, TaskRecord, TaskStatus};

use crate::brief::build_brief;
use crate::config::Config;
use crate::graph::DependencyGraph;
use crate::monitor::{DeadWorkerScan, RestartTracker};
use crate::supervisor::{SpawnOutcome, SpawnSpec, Supervisor};
use crate::worktree::{self, WorktreeManager};

/// The stream that runs in the project root with no worktree
pub const MAIN_STREAM_ID: &str = "main";

/// A stream that cannot start, with the dependencies holding it back
#[derive(Debug, Clone)]
pub struct BlockedStream {
    pub stream_id: String,
    pub waiting_on: Vec<String>,
}

/// Terminal state of a full orchestration run
#[derive(Debug)]
pub enum RunOutcome {
    /// Every stream completed; branches merged and archived
    Complete,
    /// Nothing ready, nothing running, work remaining
    Stuck { blocked: Vec<BlockedStream> },
}

fn note(msg: impl AsRef<str>) {
    println!("{} {}", "[sd]".blue().bold(), msg.as_ref());
}

fn report_ok(msg: impl AsRef<str>) {
    println!("{} {}", "[ok]".green().bold(), msg.as_ref());
}

fn report_warn(msg: impl AsRef<str>) {
    println!("{} {}", "[warn]".yellow().bold(), msg.as_ref());
}

fn report_error(msg: impl AsRef<str>) {
    println!("{} {}", "[error]".red().bold(), msg.as_ref());
}

/// Orchestrates one campaign's streams from spawn to merge
pub struct Orchestrator {
    config: Config,
    project_root: PathBuf,
    store: StoreClient,
    campaign_id: String,
    campaign: Option<CampaignDetails>,
    streams: BTreeMap<String, StreamInfo>,
    graph: DependencyGraph,
    supervisor: Supervisor,
    worktrees: WorktreeManager,
    restarts: RestartTracker,
    run_tag: String,
}

impl Orchestrator {
    /// Build an orchestrator for the active campaign
    ///
    /// Fails when the store is unreachable, no campaign is active, or the
    /// campaign has no streams.
    pub fn new(config: Config, project_root: PathBuf) -> Result<Self> {
        let store = StoreClient::new(config.store.db_path(&project_root));

        let campaign_id = store
            .active_campaign_id()
            .context("Failed to query the task store for the active campaign")?
            .ok_or_else(|| eyre::eyre!("No active campaign found in the task store"))?;

        let campaign = store.campaign_details(&campaign_id)?;
        if let Some(details) = &campaign {
            note(format!("Campaign: {}", details.name));
            if let Some(goal) = &details.goal {
                note(format!("Goal: {}", goal.chars().take(100).collect::<String>()));
            }
        }

        let infos = store.stream_list(Some(&campaign_id))?;
        if infos.is_empty() {
            bail!("No streams found for campaign {}", campaign_id);
        }
        note(format!("Found {} streams", infos.len()));

        let graph = DependencyGraph::build(&infos);
        let streams: BTreeMap<String, StreamInfo> = infos.into_iter().map(|s| (s.stream_id.clone(), s)).collect();

        let supervisor = Supervisor::new(
            config.orchestrator.pid_dir(&project_root),
            config.orchestrator.log_dir(&project_root),
        );
        supervisor.ensure_dirs()?;

        let cleaned = supervisor.cleanup_stale_pids();
        if cleaned > 0 {
            note(format!("Cleaned up {} stale PID file(s)", cleaned));
        }

        let worktrees = WorktreeManager::new(project_root.clone(), config.git.worktrees_base(&project_root));
        let restarts = RestartTracker::new(config.orchestrator.max_restarts);
        let run_tag: String = campaign_id.chars().take(8).collect();

        Ok(Self {
            config,
            project_root,
            store,
            campaign_id,
            campaign,
            streams,
            graph,
            supervisor,
            worktrees,
            restarts,
            run_tag,
        })
    }

    /// The campaign this run serves
    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    fn campaign_label(&self) -> String {
        self.campaign
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| self.campaign_id.clone())
    }

    /// Progress is re-read from the store on every call, never cached
    fn progress(&self, stream_id: &str) -> Option<StreamProgress> {
        match self.store.stream_progress(stream_id, Some(&self.campaign_id)) {
            Ok(progress) => progress,
            Err(e) => {
                warn!(stream = %stream_id, error = %e, "Failed to read stream progress");
                None
            }
        }
    }

    fn is_complete(&self, stream_id: &str) -> bool {
        self.progress(stream_id).map(|p| p.is_complete()).unwrap_or(false)
    }

    fn deps_complete(&self, stream_id: &str) -> bool {
        self.graph
            .dependencies_of(stream_id)
            .iter()
            .all(|dep| self.is_complete(dep))
    }

    /// Streams that may start now: not running, not complete, all
    /// dependencies complete
    pub fn ready_streams(&self) -> Vec<String> {
        self.streams
            .keys()
            .filter(|id| !self.supervisor.is_running(id))
            .filter(|id| !self.is_complete(id))
            .filter(|id| self.deps_complete(id))
            .cloned()
            .collect()
    }

    /// Streams held back by incomplete dependencies
    pub fn blocked_streams(&self) -> Vec<BlockedStream> {
        let mut blocked = Vec::new();

        for stream_id in self.streams.keys() {
            if self.supervisor.is_running(stream_id) || self.is_complete(stream_id) {
                continue;
            }

            let waiting_on: Vec<String> = self
                .graph
                .dependencies_of(stream_id)
                .into_iter()
                .filter(|dep| !self.is_complete(dep))
                .collect();

            if !waiting_on.is_empty() {
                blocked.push(BlockedStream {
                    stream_id: stream_id.clone(),
                    waiting_on,
                });
            }
        }

        blocked
    }

    /// Global completion: every stream's progress reports complete
    pub fn all_complete(&self) -> bool {
        self.streams.keys().all(|id| self.is_complete(id))
    }

    fn work_dir(&self, stream_id: &str) -> PathBuf {
        if stream_id == MAIN_STREAM_ID {
            self.project_root.clone()
        } else {
            self.worktrees.path_for(stream_id)
        }
    }

    /// Spawn one stream's worker
    ///
    /// Creates and validates the worktree on first spawn for non-root
    /// streams. All failures are stream-scoped: the method reports them and
    /// returns false rather than erroring the run.
    pub async fn spawn_stream(&self, stream_id: &str, check_deps: bool) -> Result<bool> {
        let Some(stream) = self.streams.get(stream_id) else {
            bail!("Stream '{}' not found", stream_id);
        };

        if self.supervisor.is_running(stream_id) {
            report_warn(format!("Worker {} already running", stream_id));
            return Ok(true);
        }

        if check_deps && !self.deps_complete(stream_id) {
            let deps = self.graph.dependencies_of(stream_id);
            report_warn(format!(
                "Dependencies not complete for {}: {}",
                stream_id,
                deps.into_iter().collect::<Vec<_>>().join(", ")
            ));
            return Ok(false);
        }

        if stream_id != MAIN_STREAM_ID {
            if !self.worktrees.exists(stream_id) {
                note(format!("Creating worktree for {}...", stream_id));
                if let Err(e) = self.worktrees.create(stream_id).await {
                    report_error(format!("Failed to create worktree for {}: {}", stream_id, e));
                    return Ok(false);
                }
            }

            // Validate pre-existing directories too: a manual mkdir must not
            // stand in for a real worktree
            if let Err(e) = self.worktrees.validate(stream_id).await {
                report_error(format!("Worktree validation failed for {}: {}", stream_id, e));
                report_error("   → remove the directory and retry; it will be recreated as a real worktree".to_string());
                let _ = self.worktrees.force_remove(stream_id).await;
                return Ok(false);
            }
        }

        let deps = self.graph.dependencies_of(stream_id);
        let brief = build_brief(stream_id, &stream.stream_name, &deps);
        let work_dir = self.work_dir(stream_id);

        let spec = SpawnSpec {
            stream_id,
            run_tag: &self.run_tag,
            work_dir: &work_dir,
            program: &self.config.agent.program,
            args: &self.config.agent.args,
            brief: &brief,
        };

        match self.supervisor.spawn(&spec) {
            Ok(SpawnOutcome::Started { pid }) => {
                report_ok(format!("Worker {} started (PID: {})", stream_id, pid));
                report_ok(format!("Logs: {}", self.supervisor.log_path(stream_id, &self.run_tag).display()));
                Ok(true)
            }
            Ok(SpawnOutcome::AlreadyRunning) => Ok(true),
            Err(e) => {
                report_error(format!("Failed to spawn worker for {}: {}", stream_id, e));
                Ok(false)
            }
        }
    }

    /// Restart attempts recorded for a stream this run
    pub fn restart_attempts(&self, stream_id: &str) -> u32 {
        self.restarts.attempts(stream_id)
    }

    fn dead_stream_ids(&self) -> Vec<String> {
        DeadWorkerScan {
            supervisor: &self.supervisor,
            store: &self.store,
            graph: &self.graph,
            campaign_id: &self.campaign_id,
            run_tag: &self.run_tag,
            min_log_bytes: self.config.orchestrator.min_log_bytes,
        }
        .dead_streams(self.streams.keys())
    }

    /// Run the scheduling loop until Complete or Stuck
    pub async fn run(&mut self) -> Result<RunOutcome> {
        note(format!("Starting orchestration for campaign {}", self.campaign_label()));
        self.print_dependency_structure();

        let poll = Duration::from_secs(self.config.orchestrator.poll_interval_secs);
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            // New ready streams, one spawn attempt each per run
            let ready: Vec<String> = self
                .ready_streams()
                .into_iter()
                .filter(|id| !attempted.contains(id))
                .collect();

            if !ready.is_empty() {
                note(format!("Found {} ready stream(s): {}", ready.len(), ready.join(", ")));
                for stream_id in &ready {
                    self.spawn_stream(stream_id, false).await?;
                    attempted.insert(stream_id.clone());
                }
            }

            // Dead workers restart within their per-run bound
            for stream_id in self.dead_stream_ids() {
                match self.restarts.begin_restart(&stream_id) {
                    Some(attempt) => {
                        report_warn(format!(
                            "Worker {} died with incomplete tasks, restarting (attempt {}/{})",
                            stream_id,
                            attempt,
                            self.restarts.max()
                        ));
                        self.spawn_stream(&stream_id, false).await?;
                    }
                    None => {
                        report_error(format!(
                            "Worker {} failed {} times, marking as stuck",
                            stream_id,
                            self.restarts.max()
                        ));
                    }
                }
            }

            if self.all_complete() {
                self.finalize().await?;
                return Ok(RunOutcome::Complete);
            }

            let running = self.streams.keys().filter(|id| self.supervisor.is_running(id)).count();
            if ready.is_empty() && running == 0 {
                report_error("Orchestration stuck: no streams ready and none running");
                let blocked = self.blocked_streams();
                for entry in &blocked {
                    report_error(format!("  {} waiting for: {}", entry.stream_id, entry.waiting_on.join(", ")));
                }
                return Ok(RunOutcome::Stuck { blocked });
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// Merge, archive, clean up, and close out the campaign
    async fn finalize(&mut self) -> Result<()> {
        report_ok("All streams complete");
        let stream_ids: Vec<String> = self.streams.keys().cloned().collect();

        // Merge before archival so completed work lands on the main line
        note("Merging stream branches into the main line...");
        let report = worktree::merge_all(&self.worktrees, &stream_ids).await;
        if report.merged > 0 {
            report_ok(format!("Merged {} stream branch(es)", report.merged));
        }
        if !report.failures.is_empty() {
            report_warn(format!(
                "Failed to merge {} stream(s): {}",
                report.failures.len(),
                report.failures.join(", ")
            ));
        }

        note(format!("Archiving streams for campaign {}", self.campaign_id));
        match self.store.archive_streams(&self.campaign_id) {
            Ok(count) => report_ok(format!("Archived {} task(s)", count)),
            Err(e) => report_warn(format!("Failed to archive streams: {}", e)),
        }

        note("Cleaning up worktrees...");
        let cleaned = self.worktrees.cleanup(&stream_ids).await;
        if cleaned > 0 {
            note(format!("Removed {} worktree(s)", cleaned));
        }

        match self.store.complete_campaign(&self.campaign_id) {
            Ok(true) => report_ok("Campaign marked complete"),
            Ok(false) => report_warn("Campaign not found in the store, could not mark complete"),
            Err(e) => report_warn(format!("Failed to mark campaign complete: {}", e)),
        }

        info!(campaign = %self.campaign_id, "Orchestration finished");
        report_ok("Campaign complete: all streams merged and archived");
        Ok(())
    }

    fn print_dependency_structure(&self) {
        println!();
        println!("{}", "Stream dependency structure:".bold());

        for (depth, stream_ids) in self.graph.by_depth() {
            if depth == 0 {
                println!("  {}", format!("Depth {} (independent):", depth).green());
            } else {
                println!("  {}", format!("Depth {}:", depth).cyan());
            }

            for stream_id in stream_ids {
                let name = self
                    .streams
                    .get(&stream_id)
                    .map(|s| s.stream_name.clone())
                    .unwrap_or_default();
                let deps = self.graph.dependencies_of(&stream_id);
                let deps_note = if deps.is_empty() {
                    String::new()
                } else {
                    format!(" → depends on: {}", deps.into_iter().collect::<Vec<_>>().join(", "))
                };
                println!("    • {} ({}){}", stream_id.bold(), name, deps_note);
            }
        }
        println!();
    }

    /// Operator status display, grouped by dependency depth
    pub fn status(&self) {
        println!();
        println!("{}", format!("{} - worker status", self.campaign_label()).bold());
        println!("{}", "=".repeat(60));

        let total = self.streams.len();
        let complete = self.streams.keys().filter(|id| self.is_complete(id)).count();
        let running = self.streams.keys().filter(|id| self.supervisor.is_running(id)).count();
        println!("  Overall: {}/{} complete, {} running", complete, total, running);
        println!();

        for (depth, stream_ids) in self.graph.by_depth() {
            let label = if depth == 0 {
                format!("Depth {} (independent)", depth)
            } else {
                format!("Depth {}", depth)
            };
            println!("  {}", label.magenta());

            for stream_id in stream_ids {
                let name = self
                    .streams
                    .get(&stream_id)
                    .map(|s| s.stream_name.clone())
                    .unwrap_or_default();
                let progress = self.progress(&stream_id);
                let running = self.supervisor.is_running(&stream_id);

                let (icon, status_text) = if progress.as_ref().map(|p| p.is_complete()).unwrap_or(false) {
                    ("[done]".green().to_string(), "Complete".to_string())
                } else if running {
                    ("[run]".yellow().to_string(), "Running".to_string())
                } else if !self.deps_complete(&stream_id) {
                    let deps = self.graph.dependencies_of(&stream_id);
                    (
                        "[wait]".cyan().to_string(),
                        format!("Waiting for: {}", deps.into_iter().collect::<Vec<_>>().join(", ")),
                    )
                } else if self.supervisor.log_path(&stream_id, &self.run_tag).exists() {
                    ("[stop]".red().to_string(), "Stopped".to_string())
                } else {
                    ("[---]".dimmed().to_string(), "Not started".to_string())
                };

                let bar = match &progress {
                    Some(p) if p.total_tasks > 0 => {
                        let filled = (p.completion_percentage() / 7).min(15) as usize;
                        format!(
                            "[{}{}] {}/{}",
                            "=".repeat(filled),
                            "-".repeat(15 - filled),
                            p.completed_tasks,
                            p.total_tasks
                        )
                    }
                    _ => "[---------------] ?/?".to_string(),
                };

                println!("    {} {} | {}", icon, stream_id.bold(), name);
                println!("      {} | {}", bar, status_text);
            }
            println!();
        }

        let blocked = self.blocked_streams();
        if !blocked.is_empty() {
            println!("  {}", "Blocked streams:".yellow());
            for entry in blocked {
                println!("    • {} waiting for: {}", entry.stream_id, entry.waiting_on.join(", "));
            }
            println!();
        }
    }

    /// Dry run: print the execution plan without spawning anything
    pub fn plan(&self) -> Result<()> {
        println!();
        println!("{}", "Execution plan (dry run)".bold());
        println!("{}", "=".repeat(60));
        note(format!("Campaign: {}", self.campaign_label()));
        println!();

        let tasks = self.store.stream_tasks(Some(&self.campaign_id))?;
        let mut by_stream: BTreeMap<String, Vec<TaskRecord>> = BTreeMap::new();
        let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
        for task in tasks {
            *by_agent.entry(task.assigned_agent.clone()).or_default() += 1;
            by_stream.entry(task.stream_id.clone()).or_default().push(task);
        }

        for (_, stream_ids) in self.graph.by_depth() {
            for stream_id in stream_ids {
                let Some(tasks) = by_stream.get(&stream_id) else {
                    continue;
                };

                let name = self
                    .streams
                    .get(&stream_id)
                    .map(|s| s.stream_name.clone())
                    .unwrap_or_default();
                let deps = self.graph.dependencies_of(&stream_id);
                let deps_note = if deps.is_empty() {
                    String::new()
                } else {
                    format!(" (depends on: {})", deps.into_iter().collect::<Vec<_>>().join(", "))
                };
                println!("  {}: {}{}", stream_id.magenta(), name, deps_note);

                for task in tasks {
                    let icon = match TaskStatus::parse(&task.status) {
                        Some(TaskStatus::Completed) => "✓".green().to_string(),
                        Some(TaskStatus::InProgress) => "●".yellow().to_string(),
                        Some(TaskStatus::Blocked) => "✗".red().to_string(),
                        _ => "○".dimmed().to_string(),
                    };
                    let title: String = task.title.chars().take(60).collect();
                    println!("    {} {} → @{}", icon, task.id, task.assigned_agent);
                    println!("      {}", title.dimmed());
                }
                println!();
            }
        }

        println!("{}", "Routing summary:".bold());
        let mut agents: Vec<(String, usize)> = by_agent.into_iter().collect();
        agents.sort_by(|a, b| b.1.cmp(&a.1));
        for (agent, count) in &agents {
            println!("  @{:<8} {:>3} task(s)", agent, count);
        }
        println!();

        println!("{}", "Execution order:".bold());
        for (depth, stream_ids) in self.graph.by_depth() {
            let with_tasks: Vec<&String> = stream_ids.iter().filter(|id| by_stream.contains_key(*id)).collect();
            if with_tasks.is_empty() {
                continue;
            }
            if depth == 0 {
                println!("  {}", format!("Depth {} (can run in parallel):", depth).green());
            } else {
                println!("  {}", format!("Depth {} (starts after depth {}):", depth, depth - 1).cyan());
            }
            for stream_id in with_tasks {
                let count = by_stream.get(stream_id).map(|t| t.len()).unwrap_or(0);
                println!("    • {} ({} tasks)", stream_id, count);
            }
        }

        println!();
        println!("{}", "[dry run] No workers will be spawned. Use 'sd start' to execute.".yellow());
        Ok(())
    }

    /// Stop every worker with a PID file
    pub fn stop_all(&self) {
        note("Stopping all workers...");
        for stream_id in self.supervisor.known_streams() {
            if let Some(pid) = self.supervisor.stop(&stream_id) {
                note(format!("Stopped {} (PID: {})", stream_id, pid));
            }
        }
        report_ok("All workers stopped");
    }

    /// Stop one worker
    pub fn stop_one(&self, stream_id: &str) {
        match self.supervisor.stop(stream_id) {
            Some(pid) => note(format!("Stopped {} (PID: {})", stream_id, pid)),
            None => report_warn(format!("No PID file for {}", stream_id)),
        }
    }

    /// Tail a stream's log for the current run
    pub fn tail_logs(&self, stream_id: &str) -> Result<()> {
        let log_path = self.supervisor.log_path(stream_id, &self.run_tag);
        if !log_path.exists() {
            bail!("No logs found for {}", stream_id);
        }

        let mut child = std::process::Command::new("tail")
            .args(["-f"])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;
        child.wait()?;
        Ok(())
    }

    /// One dead-worker check, optionally restarting within the bound
    pub async fn check_dead_once(&mut self, auto_restart: bool) -> Result<Vec<String>> {
        let dead = self.dead_stream_ids();

        if dead.is_empty() {
            note("All workers healthy");
            return Ok(dead);
        }

        report_warn(format!("Found {} dead worker(s): {}", dead.len(), dead.join(", ")));

        if auto_restart {
            for stream_id in &dead {
                match self.restarts.begin_restart(stream_id) {
                    Some(attempt) => {
                        note(format!(
                            "Restarting worker {} (attempt {}/{})",
                            stream_id,
                            attempt,
                            self.restarts.max()
                        ));
                        self.spawn_stream(stream_id, false).await?;
                    }
                    None => {
                        report_error(format!(
                            "Worker {} has reached the restart limit ({})",
                            stream_id,
                            self.restarts.max()
                        ));
                    }
                }
            }
        } else {
            note("Auto-restart disabled. Pass --auto-restart to enable.");
        }

        Ok(dead)
    }

    /// Independent dead-worker monitoring loop
    pub async fn run_monitor(&mut self, interval: Duration, auto_restart: bool) -> Result<()> {
        note(format!(
            "Monitor started (interval: {}s, max restarts: {})",
            interval.as_secs(),
            self.restarts.max()
        ));

        loop {
            self.check_dead_once(auto_restart).await?;
            tokio::time::sleep(interval).await;
        }
    }
}
