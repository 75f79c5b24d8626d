//! Worker process supervision
//!
//! Spawns detached worker processes and answers "is this stream's worker
//! alive" reliably. The PID file is the only durable artifact: it is written
//! at spawn time and deleted the moment a liveness check finds the process
//! gone. Children are intentionally never waited on, so an exited worker
//! lingers as a zombie until this process exits; liveness therefore needs
//! the process-table check, not just a signal probe.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use eyre::{Context, Result};
use tracing::{debug, info, warn};

/// Injectable process liveness checks
///
/// Both operations are needed: a zombie answers the signal-0 probe but is
/// not a live process-table entry.
pub trait ProcessProbe: Send + Sync {
    /// Signal-0 existence probe. True for zombies too.
    fn exists(&self, pid: u32) -> bool;

    /// Authoritative process-table check. False for zombies and reaped PIDs.
    fn in_process_table(&self, pid: u32) -> bool;
}

/// Probe backed by the real OS
#[derive(Debug, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn exists(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), None).is_ok()
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }

    fn in_process_table(&self, pid: u32) -> bool {
        let output = Command::new("ps").args(["-p", &pid.to_string(), "-o", "state="]).output();

        match output {
            Ok(output) => {
                if !output.status.success() {
                    return false;
                }
                let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                !state.is_empty() && !state.starts_with('Z')
            }
            Err(_) => false,
        }
    }
}

/// What to launch for one stream
#[derive(Debug)]
pub struct SpawnSpec<'a> {
    pub stream_id: &'a str,
    pub run_tag: &'a str,
    pub work_dir: &'a Path,
    pub program: &'a str,
    pub args: &'a [String],
    pub brief: &'a str,
}

/// Result of a spawn attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// A liveness check showed the stream already running; spawn was a no-op
    AlreadyRunning,
    /// A new worker was launched
    Started { pid: u32 },
}

/// Supervisor for per-stream worker processes
pub struct Supervisor {
    pid_dir: PathBuf,
    log_dir: PathBuf,
    probe: Box<dyn ProcessProbe>,
}

impl Supervisor {
    /// Create a supervisor using the real OS probe
    pub fn new(pid_dir: PathBuf, log_dir: PathBuf) -> Self {
        Self::with_probe(pid_dir, log_dir, Box::new(SystemProbe))
    }

    /// Create a supervisor with an injected probe (used by tests)
    pub fn with_probe(pid_dir: PathBuf, log_dir: PathBuf, probe: Box<dyn ProcessProbe>) -> Self {
        debug!(?pid_dir, ?log_dir, "Supervisor::with_probe: called");
        Self { pid_dir, log_dir, probe }
    }

    /// Ensure the pid and log directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.pid_dir).context("Failed to create PID directory")?;
        fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// PID file path for a stream
    pub fn pid_path(&self, stream_id: &str) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", stream_id))
    }

    /// Log file path for a stream, named per run to avoid cross-run collisions
    pub fn log_path(&self, stream_id: &str, run_tag: &str) -> PathBuf {
        self.log_dir.join(format!("{}_{}.log", stream_id, run_tag))
    }

    fn read_pid(&self, stream_id: &str) -> Option<u32> {
        let contents = fs::read_to_string(self.pid_path(stream_id)).ok()?;
        contents.trim().parse().ok()
    }

    /// Check whether a stream's worker is currently alive
    ///
    /// Deletes the PID file whenever the check determines the process is
    /// gone, so repeated calls are idempotent.
    pub fn is_running(&self, stream_id: &str) -> bool {
        let pid_path = self.pid_path(stream_id);
        if !pid_path.exists() {
            return false;
        }

        let Some(pid) = self.read_pid(stream_id) else {
            debug!(stream = %stream_id, "Supervisor::is_running: unparsable PID file, removing");
            let _ = fs::remove_file(&pid_path);
            return false;
        };

        if !self.probe.exists(pid) {
            debug!(stream = %stream_id, pid, "Supervisor::is_running: process gone, removing PID file");
            let _ = fs::remove_file(&pid_path);
            return false;
        }

        if !self.probe.in_process_table(pid) {
            // Signal probe passed but the entry is not live: zombie
            debug!(stream = %stream_id, pid, "Supervisor::is_running: zombie process, removing PID file");
            let _ = fs::remove_file(&pid_path);
            return false;
        }

        true
    }

    /// Spawn a detached worker for a stream
    ///
    /// Idempotent: if the stream is already running this is a no-op. The
    /// worker gets its own process group so it survives this process, and
    /// its output is appended to the per-run log file.
    pub fn spawn(&self, spec: &SpawnSpec<'_>) -> Result<SpawnOutcome> {
        if self.is_running(spec.stream_id) {
            warn!(stream = %spec.stream_id, "Worker already running, skipping spawn");
            return Ok(SpawnOutcome::AlreadyRunning);
        }

        self.ensure_dirs()?;

        let log_path = self.log_path(spec.stream_id, spec.run_tag);
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context(format!("Failed to open log file {}", log_path.display()))?;
        let log_err = log_file.try_clone().context("Failed to clone log handle")?;

        let mut cmd = Command::new(spec.program);
        cmd.args(spec.args)
            .arg(spec.brief)
            .current_dir(spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .context(format!("Failed to spawn worker for stream {}", spec.stream_id))?;
        let pid = child.id();

        fs::write(self.pid_path(spec.stream_id), pid.to_string()).context("Failed to write PID file")?;

        info!(stream = %spec.stream_id, pid, log = %log_path.display(), "Worker started");
        Ok(SpawnOutcome::Started { pid })
    }

    /// Stop a stream's worker
    ///
    /// Sends SIGTERM and removes the PID file regardless of whether the
    /// signal was delivered. Returns the PID that was signalled, if any.
    pub fn stop(&self, stream_id: &str) -> Option<u32> {
        let pid = self.read_pid(stream_id);

        if let Some(pid) = pid {
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_err() {
                    debug!(stream = %stream_id, pid, "Supervisor::stop: process already gone");
                }
            }
            info!(stream = %stream_id, pid, "Worker stopped");
        }

        let _ = fs::remove_file(self.pid_path(stream_id));
        pid
    }

    /// Stream IDs that currently have a PID file
    pub fn known_streams(&self) -> Vec<String> {
        let mut streams = Vec::new();

        let Ok(entries) = fs::read_dir(&self.pid_dir) else {
            return streams;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "pid").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    streams.push(stem.to_string());
                }
            }
        }

        streams.sort();
        streams
    }

    /// Remove PID files left behind by workers that exited without cleanup
    ///
    /// Returns the number of stale files reaped.
    pub fn cleanup_stale_pids(&self) -> usize {
        let mut cleaned = 0;
        for stream_id in self.known_streams() {
            // is_running removes the file when the process is gone
            if !self.is_running(&stream_id) {
                cleaned += 1;
            }
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FakeProbe {
        exists: bool,
        in_table: bool,
    }

    impl ProcessProbe for FakeProbe {
        fn exists(&self, _pid: u32) -> bool {
            self.exists
        }

        fn in_process_table(&self, _pid: u32) -> bool {
            self.in_table
        }
    }

    fn supervisor_with(dir: &TempDir, probe: FakeProbe) -> Supervisor {
        Supervisor::with_probe(
            dir.path().join("pids"),
            dir.path().join("logs"),
            Box::new(probe),
        )
    }

    fn real_supervisor(dir: &TempDir) -> Supervisor {
        Supervisor::new(dir.path().join("pids"), dir.path().join("logs"))
    }

    #[test]
    fn test_not_running_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor_with(&dir, FakeProbe { exists: true, in_table: true });

        assert!(!sup.is_running("stream-a"));
    }

    #[test]
    fn test_dead_process_removes_pid_file() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor_with(&dir, FakeProbe { exists: false, in_table: false });

        sup.ensure_dirs().unwrap();
        fs::write(sup.pid_path("stream-a"), "12345").unwrap();

        assert!(!sup.is_running("stream-a"));
        assert!(!sup.pid_path("stream-a").exists());

        // Idempotent on repeated calls
        assert!(!sup.is_running("stream-a"));
    }

    #[test]
    fn test_zombie_fails_liveness_despite_signal_probe() {
        let dir = TempDir::new().unwrap();
        // Zombies answer the signal probe but are not live table entries
        let sup = supervisor_with(&dir, FakeProbe { exists: true, in_table: false });

        sup.ensure_dirs().unwrap();
        fs::write(sup.pid_path("stream-a"), "12345").unwrap();

        assert!(!sup.is_running("stream-a"));
        assert!(!sup.pid_path("stream-a").exists());
    }

    #[test]
    fn test_live_process_keeps_pid_file() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor_with(&dir, FakeProbe { exists: true, in_table: true });

        sup.ensure_dirs().unwrap();
        fs::write(sup.pid_path("stream-a"), "12345").unwrap();

        assert!(sup.is_running("stream-a"));
        assert!(sup.pid_path("stream-a").exists());
    }

    #[test]
    fn test_unparsable_pid_file_is_stale() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor_with(&dir, FakeProbe { exists: true, in_table: true });

        sup.ensure_dirs().unwrap();
        fs::write(sup.pid_path("stream-a"), "not a pid").unwrap();

        assert!(!sup.is_running("stream-a"));
        assert!(!sup.pid_path("stream-a").exists());
    }

    #[test]
    fn test_log_path_varies_by_run() {
        let dir = TempDir::new().unwrap();
        let sup = real_supervisor(&dir);

        let first = sup.log_path("stream-a", "run1");
        let second = sup.log_path("stream-a", "run2");

        assert_ne!(first, second);
        assert!(first.to_string_lossy().ends_with("stream-a_run1.log"));
    }

    #[test]
    fn test_spawn_stop_cycle() {
        let dir = TempDir::new().unwrap();
        let sup = real_supervisor(&dir);
        let work_dir = dir.path().to_path_buf();

        let spec = SpawnSpec {
            stream_id: "stream-a",
            run_tag: "t1",
            work_dir: &work_dir,
            program: "sh",
            args: &["-c".to_string(), "sleep 30".to_string()],
            brief: "",
        };

        let outcome = sup.spawn(&spec).unwrap();
        assert!(matches!(outcome, SpawnOutcome::Started { .. }));
        assert!(sup.is_running("stream-a"));

        // Second spawn is a no-op while the worker lives
        assert_eq!(sup.spawn(&spec).unwrap(), SpawnOutcome::AlreadyRunning);

        let pid = sup.stop("stream-a");
        assert!(pid.is_some());
        assert!(!sup.is_running("stream-a"));
        assert!(!sup.pid_path("stream-a").exists());
    }

    #[test]
    fn test_liveness_after_process_exit() {
        let dir = TempDir::new().unwrap();
        let sup = real_supervisor(&dir);
        let work_dir = dir.path().to_path_buf();

        let spec = SpawnSpec {
            stream_id: "stream-b",
            run_tag: "t1",
            work_dir: &work_dir,
            program: "true",
            args: &[],
            brief: "",
        };

        sup.spawn(&spec).unwrap();

        // The child exits immediately and becomes a zombie since nothing
        // reaps it; the process-table check must still see it as dead.
        std::thread::sleep(Duration::from_millis(300));
        assert!(!sup.is_running("stream-b"));
        assert!(!sup.pid_path("stream-b").exists());
    }

    #[test]
    fn test_cleanup_stale_pids() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor_with(&dir, FakeProbe { exists: false, in_table: false });

        sup.ensure_dirs().unwrap();
        fs::write(sup.pid_path("stream-a"), "11111").unwrap();
        fs::write(sup.pid_path("stream-b"), "22222").unwrap();

        assert_eq!(sup.cleanup_stale_pids(), 2);
        assert!(sup.known_streams().is_empty());
    }
}
