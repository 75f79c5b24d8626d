//! Dead-worker detection and bounded restart accounting
//!
//! A stream is "dead" when its worker should be running but is not: the
//! process is gone, progress is incomplete, its dependencies are satisfied,
//! and there is log evidence it was started at all. Restarts are bounded
//! per run so a crash-looping worker escalates to operator attention
//! instead of restarting forever.

use std::collections::HashMap;

use streamstore::{StoreClient, StreamProgress};
use tracing::{debug, warn};

use crate::graph::DependencyGraph;
use crate::supervisor::Supervisor;

/// Per-run restart counters with a fixed bound
///
/// Owned by the scheduling loop instance, never process-wide, so multiple
/// runs in one process keep independent counts.
#[derive(Debug)]
pub struct RestartTracker {
    counts: HashMap<String, u32>,
    max: u32,
}

impl RestartTracker {
    pub fn new(max: u32) -> Self {
        Self {
            counts: HashMap::new(),
            max,
        }
    }

    /// Record a restart attempt for a stream
    ///
    /// Returns the attempt number, or `None` once the bound is exhausted.
    pub fn begin_restart(&mut self, stream_id: &str) -> Option<u32> {
        let count = self.counts.entry(stream_id.to_string()).or_insert(0);
        if *count >= self.max {
            return None;
        }
        *count += 1;
        Some(*count)
    }

    /// Restart attempts recorded so far for a stream
    pub fn attempts(&self, stream_id: &str) -> u32 {
        self.counts.get(stream_id).copied().unwrap_or(0)
    }

    /// The configured bound
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Streams that have used up their restart budget
    pub fn exhausted(&self) -> Vec<String> {
        let mut stuck: Vec<String> = self
            .counts
            .iter()
            .filter(|(_, count)| **count >= self.max)
            .map(|(id, _)| id.clone())
            .collect();
        stuck.sort();
        stuck
    }
}

/// One dead-worker detection pass over a set of streams
pub struct DeadWorkerScan<'a> {
    pub supervisor: &'a Supervisor,
    pub store: &'a StoreClient,
    pub graph: &'a DependencyGraph,
    pub campaign_id: &'a str,
    pub run_tag: &'a str,
    pub min_log_bytes: u64,
}

impl DeadWorkerScan<'_> {
    /// Streams whose worker died leaving incomplete work
    pub fn dead_streams<'b>(&self, stream_ids: impl IntoIterator<Item = &'b String>) -> Vec<String> {
        let mut dead = Vec::new();

        for stream_id in stream_ids {
            if self.supervisor.is_running(stream_id) {
                continue;
            }

            let Some(progress) = self.progress(stream_id) else {
                continue;
            };
            if progress.is_complete() {
                continue;
            }

            // Only streams that should be running qualify
            if !self.deps_complete(stream_id) {
                continue;
            }

            // Positive evidence of a prior start: a non-trivial log file
            let log_path = self.supervisor.log_path(stream_id, self.run_tag);
            let log_size = std::fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);
            if log_size <= self.min_log_bytes {
                continue;
            }

            if progress.completed_tasks > 0 || progress.in_progress_tasks > 0 {
                // Worker made progress then died
                dead.push(stream_id.clone());
            } else if progress.total_tasks > 0 {
                // Had tasks but no progress: died right after start
                dead.push(stream_id.clone());
            }
        }

        debug!(count = dead.len(), "DeadWorkerScan::dead_streams: scan complete");
        dead
    }

    fn progress(&self, stream_id: &str) -> Option<StreamProgress> {
        match self.store.stream_progress(stream_id, Some(self.campaign_id)) {
            Ok(progress) => progress,
            Err(e) => {
                warn!(stream = %stream_id, error = %e, "Failed to read stream progress");
                None
            }
        }
    }

    fn deps_complete(&self, stream_id: &str) -> bool {
        self.graph.dependencies_of(stream_id).iter().all(|dep| {
            self.progress(dep).map(|p| p.is_complete()).unwrap_or(false)
        })
    }
}
