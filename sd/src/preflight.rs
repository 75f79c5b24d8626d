//! Environment validation before any scheduling
//!
//! Every check runs regardless of earlier failures so one report shows all
//! failing prerequisites at once. Failures carry a remediation hint;
//! warnings never abort a run.

use std::path::{Path, PathBuf};

use colored::Colorize;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use streamstore::StoreClient;

/// Minimum git version with worktree support
const MIN_GIT_VERSION: (u32, u32) = (2, 5);

/// Outcome of one preflight check
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Passed { detail: String },
    Warning { message: String },
    Failed { message: String },
}

/// One named check with its outcome
#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub outcome: CheckOutcome,
}

/// Collected results of a full preflight pass
#[derive(Debug)]
pub struct PreflightReport {
    pub checks: Vec<Check>,
}

impl PreflightReport {
    /// Healthy means no failures; warnings are acceptable
    pub fn is_healthy(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Failed { .. }))
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Warning { .. }))
            .count()
    }

    /// Print the report for the operator
    pub fn print(&self) {
        println!();
        println!("{}", "Preflight Validation".bold());
        println!("{}", "=".repeat(60));

        for check in &self.checks {
            match &check.outcome {
                CheckOutcome::Passed { detail } => {
                    println!("{} {}: {}", "✓".green(), check.name.green(), detail);
                }
                CheckOutcome::Warning { message } => {
                    println!("{} {}: {}", "⚠".yellow(), check.name.yellow(), message);
                }
                CheckOutcome::Failed { message } => {
                    println!("{} {}: {}", "✗".red(), check.name.red(), message);
                }
            }
        }

        println!();
        if self.is_healthy() {
            if self.warning_count() > 0 {
                println!(
                    "{}",
                    format!("All checks passed with {} warning(s).", self.warning_count()).yellow()
                );
            } else {
                println!("{}", "All checks passed. Ready to orchestrate.".green());
            }
        } else {
            println!(
                "{}",
                format!(
                    "Preflight failed with {} error(s). Fix the issues above before starting.",
                    self.error_count()
                )
                .red()
            );
        }
        println!();
    }
}

/// Validates the environment before the scheduling loop commits to spawning
pub struct PreflightValidator {
    project_root: PathBuf,
    agent_program: String,
    state_dirs: Vec<PathBuf>,
    db_path: PathBuf,
}

impl PreflightValidator {
    pub fn new(project_root: PathBuf, agent_program: String, state_dirs: Vec<PathBuf>, db_path: PathBuf) -> Self {
        Self {
            project_root,
            agent_program,
            state_dirs,
            db_path,
        }
    }

    /// Run every check; nothing short-circuits
    pub async fn validate_all(&self) -> PreflightReport {
        debug!("PreflightValidator::validate_all: called");
        let mut checks = vec![self.check_agent()];
        checks.push(self.check_git().await);
        checks.push(self.check_directories());
        checks.push(self.check_store());

        PreflightReport { checks }
    }

    /// Agent executable is discoverable and executable
    fn check_agent(&self) -> Check {
        let name = "Agent executable";

        let Some(path) = find_executable(&self.agent_program) else {
            return Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!(
                        "'{}' NOT FOUND\n   → install it or add it to PATH",
                        self.agent_program
                    ),
                },
            };
        };

        if !is_executable(&path) {
            return Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!(
                        "found at {} but NOT EXECUTABLE\n   → run: chmod +x {}",
                        path.display(),
                        path.display()
                    ),
                },
            };
        }

        Check {
            name,
            outcome: CheckOutcome::Passed {
                detail: format!("found at {}", path.display()),
            },
        }
    }

    /// Project is a git repo with a worktree-capable git
    async fn check_git(&self) -> Check {
        let name = "Git worktree";

        if !self.project_root.join(".git").exists() {
            return Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!(
                        "NOT A GIT REPO: {}\n   → initialize with: git init",
                        self.project_root.display()
                    ),
                },
            };
        }

        let version_output = Command::new("git").arg("--version").output().await;
        let version_line = match version_output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).trim().to_string(),
            _ => {
                return Check {
                    name,
                    outcome: CheckOutcome::Failed {
                        message: "could not determine git version\n   → check your git installation".to_string(),
                    },
                };
            }
        };

        match parse_git_version(&version_line) {
            Some((major, minor)) if (major, minor) < MIN_GIT_VERSION => {
                return Check {
                    name,
                    outcome: CheckOutcome::Failed {
                        message: format!(
                            "git {}.{} found, worktrees require >= {}.{}\n   → upgrade git",
                            major, minor, MIN_GIT_VERSION.0, MIN_GIT_VERSION.1
                        ),
                    },
                };
            }
            Some(_) => {}
            None => {
                return Check {
                    name,
                    outcome: CheckOutcome::Warning {
                        message: format!("unrecognized git version output: {}", version_line),
                    },
                };
            }
        }

        // The subcommand itself must respond in this repo
        let list_output = Command::new("git")
            .args(["worktree", "list"])
            .current_dir(&self.project_root)
            .output()
            .await;

        match list_output {
            Ok(output) if output.status.success() => Check {
                name,
                outcome: CheckOutcome::Passed {
                    detail: format!("supported ({})", version_line),
                },
            },
            Ok(output) => Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!(
                        "'git worktree list' failed\n   → {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                },
            },
            Err(e) => Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!("failed to run git: {}", e),
                },
            },
        }
    }

    /// State directories are writable
    fn check_directories(&self) -> Check {
        let name = "Permissions";

        for dir in &self.state_dirs {
            if probe_writable(dir).is_err() {
                return Check {
                    name,
                    outcome: CheckOutcome::Failed {
                        message: format!(
                            "cannot write to {}\n   → check permissions: ls -la {}",
                            dir.display(),
                            dir.parent().unwrap_or(dir).display()
                        ),
                    },
                };
            }
        }

        Check {
            name,
            outcome: CheckOutcome::Passed {
                detail: "write access confirmed".to_string(),
            },
        }
    }

    /// Store database exists and answers a trivial query
    fn check_store(&self) -> Check {
        let name = "Task store";

        if !self.db_path.exists() {
            return Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!(
                        "database not found: {}\n   → check store.data-dir and store.workspace in the config",
                        self.db_path.display()
                    ),
                },
            };
        }

        let client = StoreClient::new(self.db_path.clone());
        match client.ping() {
            Ok(()) => Check {
                name,
                outcome: CheckOutcome::Passed {
                    detail: format!("reachable at {}", self.db_path.display()),
                },
            },
            Err(e) => Check {
                name,
                outcome: CheckOutcome::Failed {
                    message: format!("{}\n   → the file does not look like a task store database", e),
                },
            },
        }
    }
}

/// Parse "git version 2.43.0" into (2, 43)
fn parse_git_version(line: &str) -> Option<(u32, u32)> {
    let re = Regex::new(r"git version (\d+)\.(\d+)").ok()?;
    let captures = re.captures(line)?;
    let major = captures.get(1)?.as_str().parse().ok()?;
    let minor = captures.get(2)?.as_str().parse().ok()?;
    Some((major, minor))
}

/// Locate a program by path, PATH entry, or common install location
fn find_executable(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.exists().then_some(path);
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(program);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    let mut common: Vec<PathBuf> = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        common.push(home.join(".local").join("bin"));
    }

    for dir in common {
        let candidate = dir.join(program);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.exists()
    }
}

/// Writability test by actually writing a probe file
fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".write-probe");
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}
