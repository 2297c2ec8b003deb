//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::is_valid_task_id;

/// Taskkeeper - task state recovery for worktree-isolated coding agents
#[derive(Parser)]
#[command(
    name = "tk",
    about = "Keeps task state and git worktrees consistent and recovers stuck tasks",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Project root containing `.worktrees` (overrides config)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Directory holding per-task state (overrides config)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show task state without taking locks
    Status {
        /// Only this task
        #[arg(value_parser = parse_task_id)]
        task_id: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run one recovery pass on a task
    Recover {
        #[arg(value_parser = parse_task_id)]
        task_id: String,
    },

    /// Run one recovery pass on every known task
    RecoverAll,

    /// Sweep all tasks periodically until interrupted
    Watch {
        /// Seconds between sweeps (defaults to config)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Move a ready task to coding, creating its worktree
    Start {
        #[arg(value_parser = parse_task_id)]
        task_id: String,

        /// Branch to fork the task branch from
        #[arg(short, long)]
        base_branch: Option<String>,
    },

    /// Refresh a task's activity marker once
    Touch {
        #[arg(value_parser = parse_task_id)]
        task_id: String,
    },

    /// Keep a task's activity marker fresh until interrupted
    Heartbeat {
        #[arg(value_parser = parse_task_id)]
        task_id: String,

        /// Seconds between touches (defaults to config)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

/// Installed git version, or None when git cannot be run
pub fn git_version() -> Option<String> {
    debug!("git_version: called");
    let output = std::process::Command::new("git").arg("--version").output().ok()?;
    if !output.status.success() {
        debug!("git_version: git exited with {}", output.status);
        return None;
    }
    version_from_output(&String::from_utf8_lossy(&output.stdout))
}

/// `git version 2.43.0 (Apple Git-115)` -> `2.43.0`
fn version_from_output(output: &str) -> Option<String> {
    let rest = output.trim().strip_prefix("git version")?;
    rest.split_whitespace().next().map(str::to_string)
}

/// Reject ids that would resolve outside the state or worktree roots
fn parse_task_id(s: &str) -> Result<String, String> {
    if is_valid_task_id(s) {
        Ok(s.to_string())
    } else {
        Err(format!("'{}' is not a valid task id (expected a single path segment)", s))
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskkeeper")
        .join("logs")
        .join("taskkeeper.log")
}

/// Generate the after_help text with the git check and log location
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::from("Required Tools:\n");
    match git_version() {
        Some(version) => help.push_str(&format!("  \u{2705} git {}\n", version)),
        None => help.push_str("  \u{274C} git (not found; worktrees cannot be created)\n"),
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for the status command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
