//! StreamDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use streamstore::StoreConfig;

/// Main StreamDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduling loop settings
    pub orchestrator: OrchestratorConfig,

    /// Worker agent invocation
    pub agent: AgentConfig,

    /// Git worktree settings
    pub git: GitConfig,

    /// Task store location
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .streamdaemon.yml
        let local_config = PathBuf::from(".streamdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/streamdaemon/streamdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("streamdaemon").join("streamdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Scheduling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds between scheduling polls
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Maximum automatic restarts per stream per run
    #[serde(rename = "max-restarts")]
    pub max_restarts: u32,

    /// Minimum log size in bytes counting as evidence a worker started
    #[serde(rename = "min-log-bytes")]
    pub min_log_bytes: u64,

    /// Per-project state directory (pids, logs, worktrees live under it)
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_restarts: 2,
            min_log_bytes: 100,
            state_dir: PathBuf::from(".streamdaemon"),
        }
    }
}

impl OrchestratorConfig {
    /// Directory holding one PID file per stream
    pub fn pid_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.state_dir).join("pids")
    }

    /// Directory holding per-stream, per-run log files
    pub fn log_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.state_dir).join("logs")
    }
}

/// Worker agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable name or path
    pub program: String,

    /// Fixed flags passed before the brief (non-interactive operation)
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "--dangerously-skip-permissions".to_string()],
        }
    }
}

/// Git worktree settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Directory for per-stream worktrees, relative to the project root
    #[serde(rename = "worktrees-dir")]
    pub worktrees_dir: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktrees_dir: PathBuf::from(".streamdaemon").join("worktrees"),
        }
    }
}

impl GitConfig {
    /// Absolute worktree base directory for a project root
    pub fn worktrees_base(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.worktrees_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.orchestrator.poll_interval_secs, 30);
        assert_eq!(config.orchestrator.max_restarts, 2);
        assert_eq!(config.agent.program, "claude");
        assert!(config.agent.args.iter().any(|a| a == "-p"));
    }

    #[test]
    fn test_state_paths() {
        let config = OrchestratorConfig::default();
        let root = Path::new("/proj");

        assert_eq!(config.pid_dir(root), PathBuf::from("/proj/.streamdaemon/pids"));
        assert_eq!(config.log_dir(root), PathBuf::from("/proj/.streamdaemon/logs"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
orchestrator:
  poll-interval-secs: 5
  max-restarts: 3

agent:
  program: worker
  args: ["--batch"]

git:
  worktrees-dir: .wt

store:
  data-dir: /data
  workspace: demo
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.orchestrator.poll_interval_secs, 5);
        assert_eq!(config.orchestrator.max_restarts, 3);
        assert_eq!(config.agent.program, "worker");
        assert_eq!(config.agent.args, vec!["--batch".to_string()]);
        assert_eq!(config.git.worktrees_dir, PathBuf::from(".wt"));
        assert_eq!(config.store.workspace, "demo");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
orchestrator:
  poll-interval-secs: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.orchestrator.poll_interval_secs, 10);

        // Defaults for unspecified
        assert_eq!(config.orchestrator.max_restarts, 2);
        assert_eq!(config.agent.program, "claude");
    }
}
