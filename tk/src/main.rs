//! tk - Taskkeeper command-line entry point

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use taskkeeper::activity::{Heartbeat, touch_activity};
use taskkeeper::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path, git_version};
use taskkeeper::config::Config;
use taskkeeper::recovery::{Poller, RecoveryAction, RecoveryEngine, StartCodingResult, recover_all};
use taskkeeper::report::{StatusReport, TaskReport, status_report, task_report};
use taskkeeper::worktree::WorktreeManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Several tk processes may run at once, so append rather than truncate
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")?
        .with_overrides(cli.base_dir.clone(), cli.state_dir.clone());

    if let Err(e) = setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()) {
        eprintln!("{} logging disabled: {:#}", "warning:".yellow(), e);
    }
    config.validate()?;

    info!(base_dir = ?config.base_dir(), state_dir = ?config.state_dir(), "tk starting");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Status { task_id, format } => cmd_status(&config, task_id.as_deref(), format),
        Command::Recover { task_id } => cmd_recover(&config, &task_id).await,
        Command::RecoverAll => cmd_recover_all(&config).await,
        Command::Watch { interval } => cmd_watch(&config, interval).await,
        Command::Start { task_id, base_branch } => cmd_start(&config, &task_id, base_branch.as_deref()).await,
        Command::Touch { task_id } => cmd_touch(&config, &task_id),
        Command::Heartbeat { task_id, interval } => cmd_heartbeat(&config, &task_id, interval).await,
    }
}

fn build_engine(config: &Config) -> RecoveryEngine {
    let worktrees = WorktreeManager::new(config.worktree_config());
    RecoveryEngine::new(config.recovery_config(), Arc::new(worktrees))
}

fn cmd_status(config: &Config, task_id: Option<&str>, format: OutputFormat) -> Result<()> {
    debug!(?task_id, %format, "cmd_status: called");
    let engine = build_engine(config);
    let report = match task_id {
        Some(id) => StatusReport {
            tasks: vec![task_report(engine.store(), engine.detector(), config.base_dir(), id)],
            orphan_worktrees: Vec::new(),
        },
        None => status_report(engine.store(), engine.detector(), config.base_dir())
            .context("Failed to list task state")?,
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize status")?);
        }
        OutputFormat::Text => print_status(&report),
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    if report.tasks.is_empty() && report.orphan_worktrees.is_empty() {
        println!("{}", "No tasks found".dimmed());
        return;
    }

    for task in &report.tasks {
        print_task(task);
    }
    for orphan in &report.orphan_worktrees {
        println!("{} {} {}", "?".yellow(), orphan.cyan(), "worktree without state".yellow());
    }
}

fn print_task(task: &TaskReport) {
    let Some(status) = &task.status else {
        println!("{} {} {}", "-".dimmed(), task.task_id.cyan(), "no state".dimmed());
        return;
    };

    let status_colored = match status.as_str() {
        "done" => status.green(),
        "failed" => status.red(),
        "coding" => status.blue(),
        _ => status.normal(),
    };
    let mut line = format!(
        "{} {} attempts={} last_activity={}",
        task.task_id.cyan(),
        status_colored,
        task.recovery_attempts.unwrap_or_default(),
        task.last_activity.as_deref().unwrap_or("-").dimmed()
    );
    if task.worktree {
        line.push_str(&format!(" {}", "worktree".green()));
    }
    if task.zombie {
        line.push_str(&format!(" {}", "zombie".red().bold()));
    }
    println!("{}", line);
    if let Some(reason) = &task.failure_reason {
        println!("    {}", reason.red());
    }
}

fn action_colored(action: RecoveryAction) -> ColoredString {
    let text = action.as_str();
    match action {
        RecoveryAction::NoAction => text.green(),
        RecoveryAction::LockFailed | RecoveryAction::NoState => text.yellow(),
        RecoveryAction::MarkFailed => text.red(),
        _ => text.cyan(),
    }
}

async fn cmd_recover(config: &Config, task_id: &str) -> Result<()> {
    debug!(%task_id, "cmd_recover: called");
    let engine = build_engine(config);
    let action = engine
        .recover_if_stuck(task_id)
        .await
        .context(format!("Failed to save recovered state for {}", task_id))?;
    println!("{} {}", task_id.cyan(), action_colored(action));
    Ok(())
}

async fn cmd_recover_all(config: &Config) -> Result<()> {
    debug!("cmd_recover_all: called");
    let engine = build_engine(config);
    let stats = recover_all(&engine).await.context("Failed to list task state")?;
    println!("{} {}", "✓".green(), stats);
    Ok(())
}

async fn cmd_watch(config: &Config, interval: Option<u64>) -> Result<()> {
    let interval = interval.map(|s| Duration::from_secs(s.max(1))).unwrap_or_else(|| config.poll_interval());
    debug!(?interval, "cmd_watch: called");
    let poller = Poller::new(Arc::new(build_engine(config)), interval);

    println!(
        "Watching {} every {}s. Press Ctrl+C to stop.",
        config.state_dir().display(),
        interval.as_secs()
    );
    let sweeps = poller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await;
    println!("Stopped after {} sweeps", sweeps);
    Ok(())
}

async fn cmd_start(config: &Config, task_id: &str, base_branch: Option<&str>) -> Result<()> {
    debug!(%task_id, ?base_branch, "cmd_start: called");
    let engine = build_engine(config);
    let result = engine
        .start_coding(task_id, base_branch)
        .await
        .context(format!("Failed to save state for {}", task_id))?;

    let text = result.as_str();
    let text = match result {
        StartCodingResult::Success => text.green(),
        StartCodingResult::WorktreeFailed | StartCodingResult::MaxRetries => text.red(),
        _ => text.yellow(),
    };
    println!("{} {}", task_id.cyan(), text);

    if result == StartCodingResult::WorktreeFailed && git_version().is_none() {
        warn!("git is not available; worktrees cannot be created");
        eprintln!("{} git was not found on PATH; worktrees cannot be created", "warning:".yellow());
    }
    Ok(())
}

fn cmd_touch(config: &Config, task_id: &str) -> Result<()> {
    debug!(%task_id, "cmd_touch: called");
    if touch_activity(task_id, config.base_dir()) {
        println!("{} {}", "✓".green(), task_id.cyan());
    } else {
        println!("{} {} {}", "✗".red(), task_id.cyan(), "marker not written".red());
    }
    Ok(())
}

async fn cmd_heartbeat(config: &Config, task_id: &str, interval: Option<u64>) -> Result<()> {
    let interval = interval.map(|s| Duration::from_secs(s.max(1))).unwrap_or_else(|| config.heartbeat_interval());
    debug!(%task_id, ?interval, "cmd_heartbeat: called");
    let heartbeat = Heartbeat::spawn(task_id, PathBuf::from(config.base_dir()), interval);

    println!(
        "Heartbeat for {} every {}s. Press Ctrl+C to stop.",
        task_id.cyan(),
        interval.as_secs()
    );
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    heartbeat.stop().await;
    Ok(())
}

