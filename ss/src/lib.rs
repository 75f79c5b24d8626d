//! StreamStore - client for the external stream task store
//!
//! The task store is owned by another system; this crate only reads and
//! writes it through a stable interface. Streams and their dependency
//! references live in task metadata, so everything here is derived from the
//! `tasks` table plus a small `campaigns` table for grouping.
//!
//! # Store layout
//!
//! ```text
//! {data-dir}/{workspace}/tasks.db
//!
//! tasks(
//!     id TEXT PRIMARY KEY,
//!     title TEXT,
//!     status TEXT,             -- pending | in_progress | completed | blocked
//!     assigned_agent TEXT,
//!     campaign_id TEXT,
//!     metadata TEXT,           -- JSON: streamId, streamName, dependencies
//!     archived INTEGER,
//!     created_at TEXT
//! )
//! campaigns(id TEXT PRIMARY KEY, name TEXT, goal TEXT, status TEXT, created_at TEXT)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use streamstore::{StoreClient, StoreConfig};
//!
//! let config = StoreConfig::default();
//! let client = StoreClient::new(config.db_path(&project_root));
//! let campaign = client.active_campaign_id()?;
//! let streams = client.stream_list(campaign.as_deref())?;
//! ```

pub mod cli;
pub mod client;
pub mod config;

pub use client::{
    CampaignDetails, ProgressSummary, StoreClient, StoreError, StreamInfo, StreamProgress, TaskRecord, TaskStatus,
};
pub use config::StoreConfig;

/// Agent name that marks a task as owned by the stream's own worker
pub const DEFAULT_ASSIGNEE: &str = "me";
