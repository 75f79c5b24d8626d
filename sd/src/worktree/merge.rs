//! Merging stream branches back into the main line
//!
//! Runs at global completion, before archival. Failures are isolated per
//! stream: a conflicting merge is aborted and recorded, and the phase
//! continues with the next stream.

use std::path::Path;

use eyre::Result;
use tokio::process::Command;
use tracing::{info, warn};

use super::manager::WorktreeManager;

/// Result of merging one stream's branch
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Branch merged into the main line
    Merged { commits: usize },
    /// Branch had no commits ahead of the main line
    UpToDate,
    /// Merge conflicted and was aborted
    Conflict { message: String },
    /// Merge failed for another reason
    Failed { message: String },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Summary of a whole merge phase
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Streams merged successfully
    pub merged: usize,
    /// Streams with nothing to merge
    pub up_to_date: usize,
    /// Streams whose merge conflicted or failed
    pub failures: Vec<String>,
}

/// Name of the currently checked-out branch, falling back to "main"
pub async fn current_branch(repo_root: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(repo_root)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if branch.is_empty() { "main".to_string() } else { branch }
        }
        _ => "main".to_string(),
    }
}

/// Merge one stream's worktree branch into the main line
pub async fn merge_stream(repo_root: &Path, worktree_path: &Path, main_branch: &str) -> Result<MergeOutcome> {
    // Anything ahead of the main line?
    let log_output = Command::new("git")
        .args(["log", &format!("{}..HEAD", main_branch), "--oneline"])
        .current_dir(worktree_path)
        .output()
        .await?;

    if !log_output.status.success() {
        let stderr = String::from_utf8_lossy(&log_output.stderr).into_owned();
        return Ok(MergeOutcome::Failed { message: stderr });
    }

    let stdout = String::from_utf8_lossy(&log_output.stdout);
    let commits = stdout.lines().filter(|l| !l.is_empty()).count();
    if commits == 0 {
        return Ok(MergeOutcome::UpToDate);
    }

    // The worktree's checked-out branch carries the stream's work
    let branch_output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(worktree_path)
        .output()
        .await?;
    let branch = String::from_utf8_lossy(&branch_output.stdout).trim().to_string();

    let merge_msg = format!("Merge {} into {}", branch, main_branch);
    let merge_output = Command::new("git")
        .args(["merge", &branch, "--no-edit", "-m", &merge_msg])
        .current_dir(repo_root)
        .output()
        .await?;

    if merge_output.status.success() {
        return Ok(MergeOutcome::Merged { commits });
    }

    let stdout = String::from_utf8_lossy(&merge_output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&merge_output.stderr).into_owned();

    if stdout.contains("CONFLICT") || stderr.contains("CONFLICT") {
        // Roll back so the main line stays clean for the next stream
        let _ = Command::new("git")
            .args(["merge", "--abort"])
            .current_dir(repo_root)
            .output()
            .await;
        return Ok(MergeOutcome::Conflict { message: stdout });
    }

    Ok(MergeOutcome::Failed { message: stderr })
}

/// Merge every stream's worktree branch, isolating failures
pub async fn merge_all(manager: &WorktreeManager, stream_ids: &[String]) -> MergeReport {
    let main_branch = current_branch(manager.repo_root()).await;
    let mut report = MergeReport::default();

    for stream_id in stream_ids {
        let worktree_path = manager.path_for(stream_id);
        if !worktree_path.exists() {
            continue;
        }

        match merge_stream(manager.repo_root(), &worktree_path, &main_branch).await {
            Ok(MergeOutcome::Merged { commits }) => {
                info!(stream = %stream_id, commits, "Merged stream branch");
                report.merged += 1;
            }
            Ok(MergeOutcome::UpToDate) => {
                info!(stream = %stream_id, "No new commits to merge");
                report.up_to_date += 1;
            }
            Ok(MergeOutcome::Conflict { .. }) => {
                warn!(stream = %stream_id, "Merge conflict, manual resolution required");
                report.failures.push(stream_id.clone());
            }
            Ok(MergeOutcome::Failed { message }) => {
                warn!(stream = %stream_id, error = %message, "Merge failed");
                report.failures.push(stream_id.clone());
            }
            Err(e) => {
                warn!(stream = %stream_id, error = %e, "Merge errored");
                report.failures.push(stream_id.clone());
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git").args(args).current_dir(dir).output().await.unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    async fn setup_git_repo(dir: &Path) {
        git(dir, &["init"]).await;
        git(dir, &["config", "user.email", "test@test.com"]).await;
        git(dir, &["config", "user.name", "Test"]).await;
        tokio::fs::write(dir.join("shared.txt"), "base\n").await.unwrap();
        git(dir, &["add", "-A"]).await;
        git(dir, &["commit", "-m", "initial"]).await;
    }

    async fn commit_file(dir: &Path, name: &str, content: &str) {
        tokio::fs::write(dir.join(name), content).await.unwrap();
        git(dir, &["add", "-A"]).await;
        git(dir, &["commit", "-m", name]).await;
    }

    #[tokio::test]
    async fn test_up_to_date_branch_is_skipped() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;
        let manager = WorktreeManager::new(repo_dir.path().to_path_buf(), repo_dir.path().join("worktrees"));

        let path = manager.create("stream-a").await.unwrap();
        let main = current_branch(repo_dir.path()).await;

        let outcome = merge_stream(repo_dir.path(), &path, &main).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::UpToDate));
    }

    #[tokio::test]
    async fn test_merge_brings_commits_to_main() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;
        let manager = WorktreeManager::new(repo_dir.path().to_path_buf(), repo_dir.path().join("worktrees"));

        let path = manager.create("stream-a").await.unwrap();
        commit_file(&path, "feature.txt", "work\n").await;

        let main = current_branch(repo_dir.path()).await;
        let outcome = merge_stream(repo_dir.path(), &path, &main).await.unwrap();

        assert!(matches!(outcome, MergeOutcome::Merged { commits: 1 }));
        assert!(repo_dir.path().join("feature.txt").exists());
    }

    #[tokio::test]
    async fn test_conflict_is_aborted_and_isolated() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;
        let manager = WorktreeManager::new(repo_dir.path().to_path_buf(), repo_dir.path().join("worktrees"));

        // Conflicting stream first in ID order, clean stream after it
        let conflicted = manager.create("a-conflicted").await.unwrap();
        commit_file(&conflicted, "shared.txt", "stream version\n").await;
        let clean = manager.create("b-clean").await.unwrap();
        commit_file(&clean, "clean.txt", "fine\n").await;

        // Diverge the main line so a-conflicted cannot merge
        commit_file(repo_dir.path(), "shared.txt", "main version\n").await;

        let streams = vec!["a-conflicted".to_string(), "b-clean".to_string()];
        let report = merge_all(&manager, &streams).await;

        assert_eq!(report.merged, 1);
        assert_eq!(report.failures, vec!["a-conflicted".to_string()]);

        // The aborted merge left no in-progress state behind
        assert!(!repo_dir.path().join(".git").join("MERGE_HEAD").exists());
        assert!(repo_dir.path().join("clean.txt").exists());
    }
}
