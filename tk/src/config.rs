//! Taskkeeper configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::recovery::{DEFAULT_POLL_INTERVAL, RecoveryConfig, default_state_dir};
use crate::worktree::WorktreeConfig;

/// Main Taskkeeper configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the project and task state live
    pub paths: PathsConfig,

    /// Recovery limits and polling cadence
    pub recovery: RecoveryLimits,

    /// Git worktree settings
    pub git: GitConfig,

    /// Log level used when no `--log-level` flag is given
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local: .taskkeeper.yml
        let local_config = PathBuf::from(".taskkeeper.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User: ~/.config/taskkeeper/taskkeeper.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskkeeper").join("taskkeeper.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply command-line path overrides
    pub fn with_overrides(mut self, base_dir: Option<PathBuf>, state_dir: Option<PathBuf>) -> Self {
        if let Some(base_dir) = base_dir {
            self.paths.base_dir = base_dir;
        }
        if let Some(state_dir) = state_dir {
            self.paths.state_dir = Some(state_dir);
        }
        self
    }

    /// Check limits that would make recovery misbehave
    pub fn validate(&self) -> Result<()> {
        if self.recovery.max_recovery_attempts == 0 {
            return Err(eyre::eyre!("recovery.max-recovery-attempts must be at least 1"));
        }
        if self.recovery.poll_interval_secs == 0 {
            return Err(eyre::eyre!("recovery.poll-interval-secs must be at least 1"));
        }
        if self.recovery.heartbeat_interval_secs == 0 {
            return Err(eyre::eyre!("recovery.heartbeat-interval-secs must be at least 1"));
        }
        if self.recovery.heartbeat_interval_secs >= self.recovery.zombie_threshold_secs {
            tracing::warn!(
                "heartbeat-interval-secs ({}) is not below zombie-threshold-secs ({}); live tasks may be reaped",
                self.recovery.heartbeat_interval_secs,
                self.recovery.zombie_threshold_secs
            );
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.paths.base_dir
    }

    /// Configured state directory, or the default under the base directory
    pub fn state_dir(&self) -> PathBuf {
        self.paths
            .state_dir
            .clone()
            .unwrap_or_else(|| default_state_dir(&self.paths.base_dir))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.recovery.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.recovery.heartbeat_interval_secs)
    }

    /// Settings for the recovery engine
    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            base_dir: self.paths.base_dir.clone(),
            state_dir: self.state_dir(),
            lock_timeout: Duration::from_secs(self.recovery.lock_timeout_secs),
            zombie_threshold: Duration::from_secs(self.recovery.zombie_threshold_secs),
            max_recovery_attempts: self.recovery.max_recovery_attempts,
        }
    }

    /// Settings for the git worktree manager
    pub fn worktree_config(&self) -> WorktreeConfig {
        WorktreeConfig {
            repo_root: self.paths.base_dir.clone(),
            branch_prefix: self.git.branch_prefix.clone(),
            default_branches: self.git.default_branches.clone(),
            probe_timeout: Duration::from_secs(self.git.probe_timeout_secs),
            add_timeout: Duration::from_secs(self.git.add_timeout_secs),
            remove_timeout: Duration::from_secs(self.git.remove_timeout_secs),
        }
    }
}

/// Project and state locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Project root containing `.worktrees`
    #[serde(rename = "base-dir")]
    pub base_dir: PathBuf,

    /// Root of per-task state directories
    #[serde(rename = "state-dir")]
    pub state_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            state_dir: None,
        }
    }
}

/// Recovery limits and polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryLimits {
    #[serde(rename = "lock-timeout-secs")]
    pub lock_timeout_secs: u64,

    /// Idle time before a task is considered abandoned
    #[serde(rename = "zombie-threshold-secs")]
    pub zombie_threshold_secs: u64,

    #[serde(rename = "max-recovery-attempts")]
    pub max_recovery_attempts: u32,

    /// Seconds between sweeps in `tk watch`
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Seconds between marker touches in `tk heartbeat`
    #[serde(rename = "heartbeat-interval-secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for RecoveryLimits {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
            zombie_threshold_secs: 7200,
            max_recovery_attempts: 5,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            heartbeat_interval_secs: 300,
        }
    }
}

/// Git configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Task branches are named `{branch-prefix}/{task_id}`
    #[serde(rename = "branch-prefix")]
    pub branch_prefix: String,

    /// Base branches probed in order when none is given
    #[serde(rename = "default-branches")]
    pub default_branches: Vec<String>,

    #[serde(rename = "probe-timeout-secs")]
    pub probe_timeout_secs: u64,

    #[serde(rename = "add-timeout-secs")]
    pub add_timeout_secs: u64,

    #[serde(rename = "remove-timeout-secs")]
    pub remove_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "taskkeeper".to_string(),
            default_branches: vec!["main".to_string(), "master".to_string()],
            probe_timeout_secs: 30,
            add_timeout_secs: 120,
            remove_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.base_dir(), Path::new("."));
        assert_eq!(config.state_dir(), PathBuf::from("./.taskkeeper/specs"));
        assert_eq!(config.recovery.max_recovery_attempts, 5);
        assert_eq!(config.recovery.zombie_threshold_secs, 7200);
        assert_eq!(config.git.branch_prefix, "taskkeeper");
        assert!(config.log_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
paths:
  base-dir: /srv/project
  state-dir: /var/lib/taskkeeper

recovery:
  lock-timeout-secs: 5
  zombie-threshold-secs: 600
  max-recovery-attempts: 3
  poll-interval-secs: 10
  heartbeat-interval-secs: 60

git:
  branch-prefix: agent
  default-branches: [trunk]
  add-timeout-secs: 30

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/taskkeeper"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let recovery = config.recovery_config();
        assert_eq!(recovery.base_dir, PathBuf::from("/srv/project"));
        assert_eq!(recovery.lock_timeout, Duration::from_secs(5));
        assert_eq!(recovery.zombie_threshold, Duration::from_secs(600));
        assert_eq!(recovery.max_recovery_attempts, 3);

        let worktree = config.worktree_config();
        assert_eq!(worktree.repo_root, PathBuf::from("/srv/project"));
        assert_eq!(worktree.branch_prefix, "agent");
        assert_eq!(worktree.default_branches, vec!["trunk".to_string()]);
        assert_eq!(worktree.add_timeout, Duration::from_secs(30));
        assert_eq!(worktree.remove_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
recovery:
  max-recovery-attempts: 2
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.recovery.max_recovery_attempts, 2);
        assert_eq!(config.recovery.lock_timeout_secs, 30);
        assert_eq!(config.git.default_branches, vec!["main".to_string(), "master".to_string()]);
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(Some(PathBuf::from("/a")), None);
        assert_eq!(config.state_dir(), PathBuf::from("/a/.taskkeeper/specs"));

        let config = config.with_overrides(None, Some(PathBuf::from("/b")));
        assert_eq!(config.base_dir(), Path::new("/a"));
        assert_eq!(config.state_dir(), PathBuf::from("/b"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.recovery.max_recovery_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tk.yml");
        fs::write(&path, "git:\n  branch-prefix: custom\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.git.branch_prefix, "custom");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = PathBuf::from("/nonexistent/taskkeeper.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
