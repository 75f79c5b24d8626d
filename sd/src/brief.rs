//! Worker brief construction
//!
//! The brief is the single text payload handed to a worker at spawn time.
//! The orchestrator never parses worker output, so the brief carries the
//! whole protocol: query tasks, update status per task, verify before exit.

use std::collections::BTreeSet;

/// Build the brief for one stream's worker
pub fn build_brief(stream_id: &str, stream_name: &str, dependencies: &BTreeSet<String>) -> String {
    let deps = if dependencies.is_empty() {
        "None".to_string()
    } else {
        dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    format!(
        r#"You are a worker in the streamdaemon orchestration system.

## Your Assignment
- Stream: {stream_id}
- Stream Name: {stream_name}
- Dependencies: {deps}

## MANDATORY PROTOCOL

### Step 1: Query Your Tasks
List the tasks assigned to stream "{stream_id}" in the task store.

### Step 2: For EACH Task (in order)
Before starting work, mark the task in_progress in the task store.
After finishing, mark it completed with a short note describing what was done.
Update the store after every task; never batch updates.

### Step 3: Verify Before Exiting
Query the task list for stream "{stream_id}" again and confirm every task has
status "completed". If any task is still pending or in_progress, go back and
finish it before producing any summary.

### Step 4: Output Summary
Only after verification passes, output the completed tasks with brief notes,
any commits made, and any issues encountered.

## RULES
- Work only on tasks for stream {stream_id}.
- Never claim completion without verifying the task store first.
- If a task cannot proceed, mark it blocked with a reason instead of guessing.
- Commit after each significant change.

Begin by querying your task list.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_names_stream_and_dependencies() {
        let deps = BTreeSet::from(["stream-a".to_string(), "stream-b".to_string()]);
        let brief = build_brief("stream-c", "API layer", &deps);

        assert!(brief.contains("Stream: stream-c"));
        assert!(brief.contains("Stream Name: API layer"));
        assert!(brief.contains("stream-a, stream-b"));
        assert!(brief.contains("Verify Before Exiting"));
    }

    #[test]
    fn test_brief_without_dependencies() {
        let brief = build_brief("stream-a", "Schema", &BTreeSet::new());
        assert!(brief.contains("Dependencies: None"));
    }
}
