//! Worktree creation, structural validation, and removal

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Worktree failed validation: {0}")]
    Invalid(String),

    #[error("Worktree not found: {0}")]
    NotFound(String),

    #[error("Git command failed: {0}")]
    Git(String),
}

/// Manager for per-stream git worktrees
///
/// Each worktree lives at `{base_dir}/{stream_id}` and is bound to a branch
/// named after the stream, created from the current head when absent.
pub struct WorktreeManager {
    repo_root: PathBuf,
    base_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_root: PathBuf, base_dir: PathBuf) -> Self {
        debug!(?repo_root, ?base_dir, "WorktreeManager::new: called");
        Self { repo_root, base_dir }
    }

    /// Path to the main repository
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Worktree path for a stream
    pub fn path_for(&self, stream_id: &str) -> PathBuf {
        self.base_dir.join(stream_id)
    }

    /// Check if a stream's worktree directory exists
    pub fn exists(&self, stream_id: &str) -> bool {
        self.path_for(stream_id).exists()
    }

    /// Create a worktree for a stream
    ///
    /// Ensures the branch exists (ignoring "already exists"), then adds the
    /// worktree. A registration left behind after its directory was deleted
    /// is repaired by force-removing, pruning, and retrying once.
    pub async fn create(&self, stream_id: &str) -> Result<PathBuf, WorktreeError> {
        debug!(%stream_id, "WorktreeManager::create: called");
        let worktree_path = self.path_for(stream_id);

        // Branch from the current head if absent; an existing branch is fine
        let branch = self.git(&["branch", stream_id], &self.repo_root).await?;
        if !branch.status.success() {
            debug!(%stream_id, "WorktreeManager::create: branch already exists");
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.base_dir).await {
            return Err(WorktreeError::CreateFailed(format!("Failed to create base dir: {}", e)));
        }

        let path_arg = worktree_path.to_string_lossy().into_owned();
        let mut output = self.git(&["worktree", "add", &path_arg, stream_id], &self.repo_root).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let stale_registration = stderr.contains("already exists")
                || stderr.contains("already checked out")
                || stderr.contains("already registered");

            if stale_registration {
                warn!(%stream_id, "Stale worktree registration, removing and recreating");
                let _ = self.git(&["worktree", "remove", &path_arg, "--force"], &self.repo_root).await;
                let _ = self.git(&["worktree", "prune"], &self.repo_root).await;
                output = self.git(&["worktree", "add", &path_arg, stream_id], &self.repo_root).await?;
            }

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                return Err(WorktreeError::CreateFailed(stderr));
            }
        }

        info!(%stream_id, path = %worktree_path.display(), "Created worktree");
        Ok(worktree_path)
    }

    /// Structurally validate a worktree
    ///
    /// Checks that the directory exists, its `.git` marker is a file rather
    /// than a directory, git's own registry lists it, and it carries at
    /// least half as many tracked files as the main checkout. A plain
    /// `mkdir` standing in for a real worktree fails all of these.
    pub async fn validate(&self, stream_id: &str) -> Result<(), WorktreeError> {
        debug!(%stream_id, "WorktreeManager::validate: called");
        let worktree_path = self.path_for(stream_id);

        if !worktree_path.is_dir() {
            return Err(WorktreeError::NotFound(stream_id.to_string()));
        }

        let mut problems: Vec<String> = Vec::new();

        let git_marker = worktree_path.join(".git");
        if !git_marker.exists() {
            problems.push("missing .git link file".to_string());
        } else if git_marker.is_dir() {
            problems.push(".git is a directory, expected a worktree link file".to_string());
        }

        if !self.is_registered(&worktree_path).await? {
            problems.push("not listed in 'git worktree list'".to_string());
        }

        // Tracked-file heuristic: a real worktree carries the checkout
        if let (Some(main_count), Some(wt_count)) = (
            self.tracked_file_count(&self.repo_root).await,
            self.tracked_file_count(&worktree_path).await,
        ) {
            if wt_count * 2 < main_count {
                problems.push(format!(
                    "only {} tracked files, main checkout has {}",
                    wt_count, main_count
                ));
            }
        }

        if !problems.is_empty() {
            debug!(%stream_id, ?problems, "WorktreeManager::validate: worktree invalid");
            return Err(WorktreeError::Invalid(problems.join("; ")));
        }

        debug!(%stream_id, "WorktreeManager::validate: worktree healthy");
        Ok(())
    }

    /// Remove a worktree, leaving its branch intact
    ///
    /// Uses git's own removal first and falls back to a filesystem delete,
    /// then prunes stale registry entries.
    pub async fn force_remove(&self, stream_id: &str) -> Result<(), WorktreeError> {
        debug!(%stream_id, "WorktreeManager::force_remove: called");
        let worktree_path = self.path_for(stream_id);
        let path_arg = worktree_path.to_string_lossy().into_owned();

        let output = self.git(&["worktree", "remove", &path_arg, "--force"], &self.repo_root).await?;

        if !output.status.success() && worktree_path.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%stream_id, error = %stderr, "git worktree remove failed, deleting directory");
            let _ = tokio::fs::remove_dir_all(&worktree_path).await;
        }

        let _ = self.git(&["worktree", "prune"], &self.repo_root).await;

        info!(%stream_id, "Removed worktree");
        Ok(())
    }

    /// Remove every stream worktree after the merge phase
    ///
    /// Returns how many were removed. Prunes registry metadata and removes
    /// the base directory once empty.
    pub async fn cleanup(&self, stream_ids: &[String]) -> usize {
        debug!(?stream_ids, "WorktreeManager::cleanup: called");
        let mut cleaned = 0;

        for stream_id in stream_ids {
            if !self.exists(stream_id) {
                continue;
            }
            match self.force_remove(stream_id).await {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(stream = %stream_id, error = %e, "Failed to clean up worktree"),
            }
        }

        if self.base_dir.exists() {
            let empty = std::fs::read_dir(&self.base_dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                let _ = std::fs::remove_dir(&self.base_dir);
            }
        }

        debug!(cleaned, "WorktreeManager::cleanup: completed");
        cleaned
    }

    /// Check whether git's worktree registry lists a path
    async fn is_registered(&self, worktree_path: &Path) -> Result<bool, WorktreeError> {
        let output = self.git(&["worktree", "list", "--porcelain"], &self.repo_root).await?;
        if !output.status.success() {
            return Ok(false);
        }

        let canonical = worktree_path
            .canonicalize()
            .unwrap_or_else(|_| worktree_path.to_path_buf());
        let stdout = String::from_utf8_lossy(&output.stdout);

        for line in stdout.lines() {
            if let Some(listed) = line.strip_prefix("worktree ") {
                let listed_path = Path::new(listed);
                let listed_canonical = listed_path.canonicalize().unwrap_or_else(|_| listed_path.to_path_buf());
                if listed_canonical == canonical {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Count tracked files in a checkout. Best effort: `None` on any failure.
    async fn tracked_file_count(&self, dir: &Path) -> Option<usize> {
        let output = Command::new("git").arg("ls-files").current_dir(dir).output().await.ok()?;
        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(stdout.lines().filter(|l| !l.is_empty()).count())
    }

    async fn git(&self, args: &[&str], cwd: &Path) -> Result<std::process::Output, WorktreeError> {
        Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))
    }
}
