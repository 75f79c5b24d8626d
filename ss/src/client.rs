//! SQLite client for the stream task store
//!
//! Every call opens a short-lived connection with a busy timeout, queries or
//! mutates, and closes. The store is shared with the system that owns it, so
//! no connection is held across polls.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Errors from store access
///
/// A missing row is not an error: lookups return `Option`. `Unreachable`
/// means the database itself is absent or unopenable.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task store database not found: {0}")]
    Unreachable(PathBuf),

    #[error("Task store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stream as declared in task metadata
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Unique stream identifier
    pub stream_id: String,

    /// Display name
    pub stream_name: String,

    /// Raw dependency references (stream IDs or task-title fragments)
    pub dependencies: Vec<String>,
}

/// Task counts for one stream, read fresh from the store on every call
#[derive(Debug, Clone)]
pub struct StreamProgress {
    pub stream_id: String,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub in_progress_tasks: u32,
    pub pending_tasks: u32,
    pub blocked_tasks: u32,
}

impl StreamProgress {
    /// A stream is complete once every one of its tasks is completed
    pub fn is_complete(&self) -> bool {
        self.total_tasks > 0 && self.completed_tasks >= self.total_tasks
    }

    pub fn completion_percentage(&self) -> u32 {
        if self.total_tasks == 0 {
            return 0;
        }
        self.completed_tasks * 100 / self.total_tasks
    }
}

/// Overall progress across all streams
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub in_progress_tasks: u32,
    pub pending_tasks: u32,
    pub blocked_tasks: u32,
    pub stream_count: usize,
    pub completed_stream_count: usize,
}

impl ProgressSummary {
    pub fn completion_percentage(&self) -> u32 {
        if self.total_tasks == 0 {
            return 0;
        }
        self.completed_tasks * 100 / self.total_tasks
    }
}

/// Campaign details (the grouping a set of streams belongs to)
#[derive(Debug, Clone)]
pub struct CampaignDetails {
    pub id: String,
    pub name: String,
    pub goal: Option<String>,
    pub status: String,
}

/// One task row, as needed for routing plans and assignment checks
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub status: String,
    pub assigned_agent: String,
    pub stream_id: String,
}

/// Client for one workspace's task store database
pub struct StoreClient {
    db_path: PathBuf,
}

impl StoreClient {
    /// Create a client for the given database path
    pub fn new(db_path: PathBuf) -> Self {
        debug!(?db_path, "StoreClient::new: called");
        Self { db_path }
    }

    /// Path of the underlying database
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        if !self.db_path.exists() {
            return Err(StoreError::Unreachable(self.db_path.clone()));
        }

        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Verify the store is reachable and looks like a task store
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// List all streams, optionally filtered by campaign
    pub fn stream_list(&self, campaign: Option<&str>) -> Result<Vec<StreamInfo>, StoreError> {
        let conn = self.connect()?;

        let mut stmt = conn.prepare(
            "SELECT json_extract(metadata, '$.streamId') AS stream_id,
                    MIN(json_extract(metadata, '$.streamName')) AS stream_name,
                    MIN(json_extract(metadata, '$.dependencies')) AS deps_json
             FROM tasks
             WHERE json_extract(metadata, '$.streamId') IS NOT NULL
               AND archived = 0
               AND (?1 IS NULL OR campaign_id = ?1)
             GROUP BY stream_id
             ORDER BY stream_id",
        )?;

        let rows = stmt.query_map(params![campaign], |row| {
            let stream_id: String = row.get(0)?;
            let stream_name: Option<String> = row.get(1)?;
            let deps_json: Option<String> = row.get(2)?;
            Ok((stream_id, stream_name, deps_json))
        })?;

        let mut streams = Vec::new();
        for row in rows {
            let (stream_id, stream_name, deps_json) = row?;

            let dependencies = deps_json
                .and_then(|json| serde_json::from_str::<Vec<String>>(&json).ok())
                .unwrap_or_default();

            streams.push(StreamInfo {
                stream_name: stream_name.unwrap_or_else(|| stream_id.clone()),
                stream_id,
                dependencies,
            });
        }

        debug!(count = streams.len(), "StoreClient::stream_list: returning streams");
        Ok(streams)
    }

    /// Progress counts for one stream, `None` if the stream has no tasks
    pub fn stream_progress(&self, stream_id: &str, campaign: Option<&str>) -> Result<Option<StreamProgress>, StoreError> {
        let conn = self.connect()?;

        let row = conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END)
             FROM tasks
             WHERE json_extract(metadata, '$.streamId') = ?1
               AND archived = 0
               AND (?2 IS NULL OR campaign_id = ?2)",
            params![stream_id, campaign],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            },
        )?;

        let (total, completed, in_progress, pending, blocked) = row;
        if total == 0 {
            return Ok(None);
        }

        Ok(Some(StreamProgress {
            stream_id: stream_id.to_string(),
            total_tasks: total as u32,
            completed_tasks: completed.unwrap_or(0) as u32,
            in_progress_tasks: in_progress.unwrap_or(0) as u32,
            pending_tasks: pending.unwrap_or(0) as u32,
            blocked_tasks: blocked.unwrap_or(0) as u32,
        }))
    }

    /// Overall progress summary across all streams
    pub fn progress_summary(&self, campaign: Option<&str>) -> Result<ProgressSummary, StoreError> {
        let conn = self.connect()?;

        let row = conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END)
             FROM tasks
             WHERE json_extract(metadata, '$.streamId') IS NOT NULL
               AND archived = 0
               AND (?1 IS NULL OR campaign_id = ?1)",
            params![campaign],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            },
        )?;
        drop(conn);

        let streams = self.stream_list(campaign)?;
        let mut completed_stream_count = 0;
        for stream in &streams {
            if let Some(progress) = self.stream_progress(&stream.stream_id, campaign)? {
                if progress.is_complete() {
                    completed_stream_count += 1;
                }
            }
        }

        let (total, completed, in_progress, pending, blocked) = row;
        Ok(ProgressSummary {
            total_tasks: total as u32,
            completed_tasks: completed.unwrap_or(0) as u32,
            in_progress_tasks: in_progress.unwrap_or(0) as u32,
            pending_tasks: pending.unwrap_or(0) as u32,
            blocked_tasks: blocked.unwrap_or(0) as u32,
            stream_count: streams.len(),
            completed_stream_count,
        })
    }

    /// ID of the currently active campaign, if any
    ///
    /// Priority: active, then blocked, then pending; newest first within a
    /// status. Completed campaigns are never returned.
    pub fn active_campaign_id(&self) -> Result<Option<String>, StoreError> {
        let conn = self.connect()?;

        let id = conn
            .query_row(
                "SELECT id FROM campaigns
                 WHERE status IN ('active', 'blocked', 'pending')
                 ORDER BY
                     CASE status
                         WHEN 'active' THEN 1
                         WHEN 'blocked' THEN 2
                         ELSE 3
                     END,
                     created_at DESC
                 LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(id)
    }

    /// Details for one campaign
    pub fn campaign_details(&self, campaign_id: &str) -> Result<Option<CampaignDetails>, StoreError> {
        let conn = self.connect()?;

        let details = conn
            .query_row(
                "SELECT id, name, goal, status FROM campaigns WHERE id = ?1",
                params![campaign_id],
                |row| {
                    Ok(CampaignDetails {
                        id: row.get(0)?,
                        name: row.get::<_, Option<String>>(1)?.unwrap_or_else(|| "unnamed".to_string()),
                        goal: row.get(2)?,
                        status: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
                    })
                },
            )
            .optional()?;

        Ok(details)
    }

    /// All stream tasks for a campaign, ordered by stream then creation time
    pub fn stream_tasks(&self, campaign: Option<&str>) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.connect()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, status, assigned_agent,
                    json_extract(metadata, '$.streamId') AS stream_id
             FROM tasks
             WHERE json_extract(metadata, '$.streamId') IS NOT NULL
               AND archived = 0
               AND (?1 IS NULL OR campaign_id = ?1)
             ORDER BY stream_id, created_at",
        )?;

        let rows = stmt.query_map(params![campaign], |row| {
            Ok(TaskRecord {
                id: row.get(0)?,
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                status: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                assigned_agent: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| crate::DEFAULT_ASSIGNEE.to_string()),
                stream_id: row.get(4)?,
            })
        })?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Tasks assigned to an agent other than the default worker agent
    pub fn tasks_assigned_elsewhere(&self, campaign: Option<&str>) -> Result<Vec<TaskRecord>, StoreError> {
        let tasks = self.stream_tasks(campaign)?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.assigned_agent != crate::DEFAULT_ASSIGNEE)
            .collect())
    }

    /// Reassign a task to a different agent. Returns false if the task is unknown.
    pub fn reassign_task(&self, task_id: &str, agent: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;

        let changed = conn.execute(
            "UPDATE tasks SET assigned_agent = ?2 WHERE id = ?1",
            params![task_id, agent],
        )?;

        Ok(changed > 0)
    }

    /// Archive every stream task of a campaign. Returns the number archived.
    pub fn archive_streams(&self, campaign_id: &str) -> Result<usize, StoreError> {
        let conn = self.connect()?;

        let changed = conn.execute(
            "UPDATE tasks SET archived = 1
             WHERE campaign_id = ?1
               AND archived = 0
               AND json_extract(metadata, '$.streamId') IS NOT NULL",
            params![campaign_id],
        )?;

        debug!(campaign_id, changed, "StoreClient::archive_streams: archived tasks");
        Ok(changed)
    }

    /// Mark a campaign complete. Returns false if the campaign is unknown.
    pub fn complete_campaign(&self, campaign_id: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;

        let changed = conn.execute(
            "UPDATE campaigns SET status = 'complete' WHERE id = ?1",
            params![campaign_id],
        )?;

        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn fixture_db(dir: &TempDir) -> PathBuf {
        let db_path = dir.path().join("tasks.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE tasks (
                 id TEXT PRIMARY KEY,
                 title TEXT,
                 status TEXT,
                 assigned_agent TEXT,
                 campaign_id TEXT,
                 metadata TEXT,
                 archived INTEGER NOT NULL DEFAULT 0,
                 created_at TEXT
             );
             CREATE TABLE campaigns (
                 id TEXT PRIMARY KEY,
                 name TEXT,
                 goal TEXT,
                 status TEXT,
                 created_at TEXT
             );",
        )
        .unwrap();
        db_path
    }

    fn insert_task(
        db_path: &PathBuf,
        campaign: &str,
        stream: &str,
        status: &str,
        agent: Option<&str>,
        deps: &[&str],
    ) -> String {
        let id = Uuid::now_v7().to_string();
        let metadata = serde_json::json!({
            "streamId": stream,
            "streamName": format!("{} stream", stream),
            "dependencies": deps,
        });

        let conn = Connection::open(db_path).unwrap();
        conn.execute(
            "INSERT INTO tasks (id, title, status, assigned_agent, campaign_id, metadata, archived, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, datetime('now'))",
            params![id, format!("task for {}", stream), status, agent, campaign, metadata.to_string()],
        )
        .unwrap();
        id
    }

    fn insert_campaign(db_path: &PathBuf, id: &str, status: &str, created_at: &str) {
        let conn = Connection::open(db_path).unwrap();
        conn.execute(
            "INSERT INTO campaigns (id, name, goal, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, format!("campaign {}", id), "ship it", status, created_at],
        )
        .unwrap();
    }

    #[test]
    fn test_unreachable_database() {
        let dir = TempDir::new().unwrap();
        let client = StoreClient::new(dir.path().join("missing.db"));

        assert!(matches!(client.ping(), Err(StoreError::Unreachable(_))));
    }

    #[test]
    fn test_stream_list_parses_dependencies() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_task(&db, "c1", "stream-a", "pending", None, &[]);
        insert_task(&db, "c1", "stream-b", "pending", None, &["stream-a"]);

        let client = StoreClient::new(db);
        let streams = client.stream_list(Some("c1")).unwrap();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].stream_id, "stream-a");
        assert!(streams[0].dependencies.is_empty());
        assert_eq!(streams[1].stream_id, "stream-b");
        assert_eq!(streams[1].dependencies, vec!["stream-a".to_string()]);
    }

    #[test]
    fn test_stream_list_campaign_filter() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_task(&db, "c1", "stream-a", "pending", None, &[]);
        insert_task(&db, "c2", "stream-z", "pending", None, &[]);

        let client = StoreClient::new(db);

        assert_eq!(client.stream_list(Some("c1")).unwrap().len(), 1);
        assert_eq!(client.stream_list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_stream_progress_counts_and_completion() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_task(&db, "c1", "stream-a", "completed", None, &[]);
        insert_task(&db, "c1", "stream-a", "completed", None, &[]);
        insert_task(&db, "c1", "stream-b", "in_progress", None, &[]);
        insert_task(&db, "c1", "stream-b", "pending", None, &[]);

        let client = StoreClient::new(db);

        let a = client.stream_progress("stream-a", Some("c1")).unwrap().unwrap();
        assert_eq!(a.total_tasks, 2);
        assert_eq!(a.completed_tasks, 2);
        assert!(a.is_complete());
        assert_eq!(a.completion_percentage(), 100);

        let b = client.stream_progress("stream-b", Some("c1")).unwrap().unwrap();
        assert_eq!(b.total_tasks, 2);
        assert_eq!(b.in_progress_tasks, 1);
        assert_eq!(b.pending_tasks, 1);
        assert!(!b.is_complete());
    }

    #[test]
    fn test_stream_progress_unknown_stream_is_none() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_task(&db, "c1", "stream-a", "pending", None, &[]);

        let client = StoreClient::new(db);
        assert!(client.stream_progress("nonexistent", Some("c1")).unwrap().is_none());
    }

    #[test]
    fn test_progress_summary() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_task(&db, "c1", "stream-a", "completed", None, &[]);
        insert_task(&db, "c1", "stream-b", "pending", None, &[]);
        insert_task(&db, "c1", "stream-b", "completed", None, &[]);

        let client = StoreClient::new(db);
        let summary = client.progress_summary(Some("c1")).unwrap();

        assert_eq!(summary.total_tasks, 3);
        assert_eq!(summary.completed_tasks, 2);
        assert_eq!(summary.stream_count, 2);
        assert_eq!(summary.completed_stream_count, 1);
        assert_eq!(summary.completion_percentage(), 66);
    }

    #[test]
    fn test_active_campaign_priority() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_campaign(&db, "old-active", "active", "2024-01-01");
        insert_campaign(&db, "new-pending", "pending", "2024-06-01");
        insert_campaign(&db, "done", "complete", "2024-07-01");

        let client = StoreClient::new(db);

        // Active beats pending regardless of age; complete is never returned
        assert_eq!(client.active_campaign_id().unwrap(), Some("old-active".to_string()));
    }

    #[test]
    fn test_active_campaign_none_when_all_complete() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_campaign(&db, "done", "complete", "2024-01-01");

        let client = StoreClient::new(db);
        assert_eq!(client.active_campaign_id().unwrap(), None);
    }

    #[test]
    fn test_campaign_details() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_campaign(&db, "c1", "active", "2024-01-01");

        let client = StoreClient::new(db);

        let details = client.campaign_details("c1").unwrap().unwrap();
        assert_eq!(details.id, "c1");
        assert_eq!(details.status, "active");
        assert_eq!(details.goal.as_deref(), Some("ship it"));

        assert!(client.campaign_details("nope").unwrap().is_none());
    }

    #[test]
    fn test_tasks_assigned_elsewhere() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_task(&db, "c1", "stream-a", "pending", Some("me"), &[]);
        insert_task(&db, "c1", "stream-a", "pending", Some("qa"), &[]);
        insert_task(&db, "c1", "stream-b", "pending", None, &[]);

        let client = StoreClient::new(db);
        let elsewhere = client.tasks_assigned_elsewhere(Some("c1")).unwrap();

        assert_eq!(elsewhere.len(), 1);
        assert_eq!(elsewhere[0].assigned_agent, "qa");
    }

    #[test]
    fn test_reassign_task() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        let task_id = insert_task(&db, "c1", "stream-a", "pending", Some("qa"), &[]);

        let client = StoreClient::new(db);

        assert!(client.reassign_task(&task_id, "me").unwrap());
        assert!(!client.reassign_task("unknown-task", "me").unwrap());

        let elsewhere = client.tasks_assigned_elsewhere(Some("c1")).unwrap();
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn test_archive_streams_and_complete_campaign() {
        let dir = TempDir::new().unwrap();
        let db = fixture_db(&dir);
        insert_campaign(&db, "c1", "active", "2024-01-01");
        insert_task(&db, "c1", "stream-a", "completed", None, &[]);
        insert_task(&db, "c1", "stream-b", "completed", None, &[]);
        insert_task(&db, "c2", "stream-z", "pending", None, &[]);

        let client = StoreClient::new(db);

        assert_eq!(client.archive_streams("c1").unwrap(), 2);
        // Archived tasks disappear from listings
        assert!(client.stream_list(Some("c1")).unwrap().is_empty());
        // Second archive is a no-op
        assert_eq!(client.archive_streams("c1").unwrap(), 0);

        assert!(client.complete_campaign("c1").unwrap());
        assert_eq!(client.active_campaign_id().unwrap(), None);
        assert!(!client.complete_campaign("unknown").unwrap());
    }

    #[test]
    fn test_task_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }
}
