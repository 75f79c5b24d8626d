//! Per-stream git worktree lifecycle
//!
//! Each non-root stream gets an isolated checkout bound to a branch named
//! after the stream: create, validate, use for the stream's duration, merge
//! back at global completion, then clean up.

pub mod manager;
pub mod merge;

pub use manager::{WorktreeError, WorktreeManager};
pub use merge::{MergeOutcome, MergeReport, current_branch, merge_all, merge_stream};
