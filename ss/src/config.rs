//! Store location configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Locates the task store database for a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory holding per-workspace store databases
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// Workspace identifier. Empty means "use the project directory name".
    pub workspace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("streamstore"))
            .unwrap_or_else(|| PathBuf::from(".streamstore"));

        Self {
            data_dir,
            workspace: String::new(),
        }
    }
}

impl StoreConfig {
    /// Resolve the workspace identifier for a project root
    pub fn workspace_for(&self, project_root: &Path) -> String {
        if !self.workspace.is_empty() {
            return self.workspace.clone();
        }

        project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Path to the store database for a project root
    pub fn db_path(&self, project_root: &Path) -> PathBuf {
        self.data_dir.join(self.workspace_for(project_root)).join("tasks.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_workspace_wins() {
        let config = StoreConfig {
            data_dir: PathBuf::from("/data"),
            workspace: "myproj".to_string(),
        };

        assert_eq!(config.workspace_for(Path::new("/somewhere/else")), "myproj");
        assert_eq!(config.db_path(Path::new("/somewhere/else")), PathBuf::from("/data/myproj/tasks.db"));
    }

    #[test]
    fn test_workspace_from_project_dir_name() {
        let config = StoreConfig {
            data_dir: PathBuf::from("/data"),
            workspace: String::new(),
        };

        assert_eq!(config.workspace_for(Path::new("/home/user/widgets")), "widgets");
        assert_eq!(
            config.db_path(Path::new("/home/user/widgets")),
            PathBuf::from("/data/widgets/tasks.db")
        );
    }
}
