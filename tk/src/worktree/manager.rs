//! Worktree manager for creating and removing task worktrees with git

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{WORKTREES_DIR, WorktreeOps};

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("Could not determine a base branch")]
    NoBaseBranch,

    #[error("Git command timed out: {0}")]
    Timeout(String),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Configuration for worktree manager
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Project root; the main repository and parent of `.worktrees`
    pub repo_root: PathBuf,

    /// Branch prefix for task branches
    pub branch_prefix: String,

    /// Branches probed, in order, when no base branch is given
    pub default_branches: Vec<String>,

    /// Timeout for read-only git probes
    pub probe_timeout: Duration,

    /// Timeout for `git worktree add`
    pub add_timeout: Duration,

    /// Timeout for `git worktree remove`
    pub remove_timeout: Duration,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        debug!("WorktreeConfig::default: called");
        Self {
            repo_root: PathBuf::from("."),
            branch_prefix: "taskkeeper".to_string(),
            default_branches: vec!["main".to_string(), "master".to_string()],
            probe_timeout: Duration::from_secs(30),
            add_timeout: Duration::from_secs(120),
            remove_timeout: Duration::from_secs(60),
        }
    }
}

impl WorktreeConfig {
    /// Create config with specified repo root
    pub fn with_repo(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        debug!(?repo_root, "WorktreeConfig::with_repo: called");
        Self {
            repo_root,
            ..Default::default()
        }
    }

    /// Directory holding all task worktrees
    pub fn worktrees_dir(&self) -> PathBuf {
        self.repo_root.join(WORKTREES_DIR)
    }
}

/// Information about a task worktree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Task ID
    pub task_id: String,

    /// Path to the worktree
    pub path: PathBuf,

    /// Branch name
    pub branch: String,
}

/// Manager for git worktrees
pub struct WorktreeManager {
    config: WorktreeConfig,
}

impl WorktreeManager {
    /// Create a new worktree manager
    pub fn new(config: WorktreeConfig) -> Self {
        debug!(?config, "WorktreeManager::new: called");
        Self { config }
    }

    /// Manager configuration
    pub fn config(&self) -> &WorktreeConfig {
        &self.config
    }

    /// Get worktree path for a task
    pub fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.config.worktrees_dir().join(task_id)
    }

    /// Branch name used for a task's worktree
    pub fn branch_name(&self, task_id: &str) -> String {
        format!("{}/{}", self.config.branch_prefix, task_id)
    }

    /// Check if a worktree exists
    pub fn exists(&self, task_id: &str) -> bool {
        let exists = self.worktree_path(task_id).exists();
        debug!(%task_id, %exists, "WorktreeManager::exists: result");
        exists
    }

    /// Create a new worktree for a task
    ///
    /// Any stale worktree or branch with the same name is removed first, so this
    /// is safe to call again after a crash halfway through a previous attempt.
    pub async fn create_worktree(&self, task_id: &str, base_branch: Option<&str>) -> Result<WorktreeInfo, WorktreeError> {
        debug!(%task_id, ?base_branch, "WorktreeManager::create_worktree: called");

        let base = self.resolve_base_branch(base_branch).await?;
        debug!(%base, "WorktreeManager::create_worktree: resolved base branch");

        let worktrees_dir = self.config.worktrees_dir();
        if let Err(e) = tokio::fs::create_dir_all(&worktrees_dir).await {
            debug!("WorktreeManager::create_worktree: failed to create worktrees dir");
            return Err(WorktreeError::CreateFailed(format!(
                "Failed to create {}: {}",
                worktrees_dir.display(),
                e
            )));
        }

        let worktree_path = self.worktree_path(task_id);
        let branch_name = self.branch_name(task_id);
        self.cleanup_stale(&worktree_path, &branch_name).await;

        let path_arg = worktree_path.to_string_lossy().to_string();
        let output = self
            .git(
                &["worktree", "add", "-b", &branch_name, &path_arg, &base],
                &self.config.repo_root,
                self.config.add_timeout,
            )
            .await?;

        if !output.status.success() {
            debug!("WorktreeManager::create_worktree: git worktree add failed");
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::CreateFailed(stderr.trim().to_string()));
        }

        info!("Created worktree at {:?} on branch {} from {}", worktree_path, branch_name, base);

        Ok(WorktreeInfo {
            task_id: task_id.to_string(),
            path: worktree_path,
            branch: branch_name,
        })
    }

    /// Remove a task's worktree, forcing past uncommitted changes
    ///
    /// A missing worktree is not an error. When git does not recognise the
    /// directory as a worktree it is deleted directly.
    pub async fn remove_worktree(&self, task_id: &str) -> Result<(), WorktreeError> {
        debug!(%task_id, "WorktreeManager::remove_worktree: called");
        let worktree_path = self.worktree_path(task_id);

        if !worktree_path.exists() {
            debug!("WorktreeManager::remove_worktree: worktree does not exist, skipping");
            return Ok(());
        }

        let path_arg = worktree_path.to_string_lossy().to_string();
        let result = self
            .git(
                &["worktree", "remove", "--force", &path_arg],
                &self.config.repo_root,
                self.config.remove_timeout,
            )
            .await;

        match result {
            Ok(output) if output.status.success() => {
                debug!("WorktreeManager::remove_worktree: git worktree remove succeeded");
            }
            Err(WorktreeError::Timeout(msg)) => {
                debug!("WorktreeManager::remove_worktree: git worktree remove timed out");
                return Err(WorktreeError::Timeout(msg));
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(%task_id, "git worktree remove failed, deleting directory: {}", stderr.trim());
                self.remove_dir(&worktree_path).await?;
            }
            Err(e) => {
                warn!(%task_id, "git worktree remove failed, deleting directory: {}", e);
                self.remove_dir(&worktree_path).await?;
            }
        }

        self.prune().await;
        info!("Removed worktree for {}", task_id);
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), WorktreeError> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorktreeError::RemoveFailed(format!("{}: {}", path.display(), e))),
        }
    }

    /// Clear out leftovers from an earlier attempt at the same task
    async fn cleanup_stale(&self, worktree_path: &Path, branch_name: &str) {
        debug!(?worktree_path, %branch_name, "WorktreeManager::cleanup_stale: called");

        if worktree_path.exists() {
            warn!("Removing stale worktree at {:?}", worktree_path);
            let path_arg = worktree_path.to_string_lossy().to_string();
            let removed = self
                .git(
                    &["worktree", "remove", "--force", &path_arg],
                    &self.config.repo_root,
                    self.config.remove_timeout,
                )
                .await
                .map(|output| output.status.success())
                .unwrap_or(false);
            if !removed && let Err(e) = self.remove_dir(worktree_path).await {
                warn!("Failed to delete stale worktree directory: {}", e);
            }
        }

        self.prune().await;

        if self.branch_exists(branch_name).await {
            warn!("Deleting stale branch {}", branch_name);
            let _ = self
                .git(&["branch", "-D", branch_name], &self.config.repo_root, self.config.probe_timeout)
                .await;
        }
    }

    async fn prune(&self) {
        let _ = self
            .git(&["worktree", "prune"], &self.config.repo_root, self.config.probe_timeout)
            .await;
        debug!("WorktreeManager::prune: prune attempted");
    }

    /// Pick the branch new worktrees start from
    ///
    /// Explicit choice first, then the configured default branches, then
    /// whatever branch the main checkout is on.
    pub async fn resolve_base_branch(&self, explicit: Option<&str>) -> Result<String, WorktreeError> {
        debug!(?explicit, "WorktreeManager::resolve_base_branch: called");
        if let Some(branch) = explicit {
            return Ok(branch.to_string());
        }

        for candidate in &self.config.default_branches {
            if self.branch_exists(candidate).await {
                debug!(%candidate, "WorktreeManager::resolve_base_branch: found default branch");
                return Ok(candidate.clone());
            }
        }

        match self.current_branch().await {
            Some(branch) => {
                debug!(%branch, "WorktreeManager::resolve_base_branch: using current branch");
                Ok(branch)
            }
            None => {
                debug!("WorktreeManager::resolve_base_branch: no branch found");
                Err(WorktreeError::NoBaseBranch)
            }
        }
    }

    /// Whether a local branch exists
    pub async fn branch_exists(&self, branch: &str) -> bool {
        let refname = format!("refs/heads/{}", branch);
        match self
            .git(
                &["rev-parse", "--verify", "--quiet", &refname],
                &self.config.repo_root,
                self.config.probe_timeout,
            )
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(%branch, "WorktreeManager::branch_exists: probe failed: {}", e);
                false
            }
        }
    }

    /// Branch checked out in the main repository, None when detached or unknown
    pub async fn current_branch(&self) -> Option<String> {
        let output = self
            .git(
                &["rev-parse", "--abbrev-ref", "HEAD"],
                &self.config.repo_root,
                self.config.probe_timeout,
            )
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!branch.is_empty() && branch != "HEAD").then_some(branch)
    }

    /// Run git with a hard timeout; the child is killed if the timeout fires
    async fn git(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<Output, WorktreeError> {
        debug!(?args, "WorktreeManager::git: called");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(WorktreeError::GitError(format!("git {}: {}", args.join(" "), e))),
            Err(_) => Err(WorktreeError::Timeout(format!(
                "git {} after {}s",
                args.join(" "),
                timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl WorktreeOps for WorktreeManager {
    async fn create(&self, task_id: &str, base_branch: Option<&str>) -> bool {
        match self.create_worktree(task_id, base_branch).await {
            Ok(_) => true,
            Err(e) => {
                warn!(%task_id, "WORKTREE_CREATE_FAILED {}: {}", task_id, e);
                false
            }
        }
    }

    async fn remove(&self, task_id: &str) -> bool {
        match self.remove_worktree(task_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%task_id, "WORKTREE_REMOVE_FAILED {}: {}", task_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn git_in(dir: &Path, args: &[&str]) -> Output {
        Command::new("git").args(args).current_dir(dir).output().await.unwrap()
    }

    async fn setup_git_repo(dir: &Path, initial_branch: &str) {
        let head = format!("refs/heads/{}", initial_branch);
        git_in(dir, &["init"]).await;
        git_in(dir, &["symbolic-ref", "HEAD", &head]).await;
        git_in(dir, &["config", "user.email", "test@test.com"]).await;
        git_in(dir, &["config", "user.name", "Test"]).await;
        git_in(dir, &["commit", "--allow-empty", "-m", "initial"]).await;
    }

    fn manager_for(repo: &Path) -> WorktreeManager {
        WorktreeManager::new(WorktreeConfig {
            branch_prefix: "test".to_string(),
            ..WorktreeConfig::with_repo(repo)
        })
    }

    #[test]
    fn test_worktree_path_and_branch_name() {
        let manager = manager_for(Path::new("/project"));
        assert_eq!(manager.worktree_path("task-1"), PathBuf::from("/project/.worktrees/task-1"));
        assert_eq!(manager.branch_name("task-1"), "test/task-1");
    }

    #[tokio::test]
    async fn test_worktree_create_and_remove() {
        if !git_available() {
            return;
        }
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path(), "main").await;
        let manager = manager_for(repo.path());

        let info = manager.create_worktree("task-1", None).await.unwrap();
        assert!(info.path.exists());
        assert_eq!(info.branch, "test/task-1");
        assert!(manager.exists("task-1"));
        assert!(manager.branch_exists("test/task-1").await);

        manager.remove_worktree("task-1").await.unwrap();
        assert!(!info.path.exists());
    }

    #[tokio::test]
    async fn test_create_replaces_stale_worktree_and_branch() {
        if !git_available() {
            return;
        }
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path(), "main").await;
        let manager = manager_for(repo.path());

        manager.create_worktree("task-1", None).await.unwrap();
        // Simulate a crash: directory and branch left behind
        let again = manager.create_worktree("task-1", None).await;
        assert!(again.is_ok());
        assert!(manager.exists("task-1"));
    }

    #[tokio::test]
    async fn test_resolve_prefers_default_branch() {
        if !git_available() {
            return;
        }
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path(), "main").await;
        git_in(repo.path(), &["checkout", "-b", "feature-branch"]).await;
        let manager = manager_for(repo.path());

        assert_eq!(manager.resolve_base_branch(None).await.unwrap(), "main");
        assert_eq!(manager.resolve_base_branch(Some("develop")).await.unwrap(), "develop");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_current_branch() {
        if !git_available() {
            return;
        }
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path(), "trunk").await;
        let manager = manager_for(repo.path());

        assert_eq!(manager.resolve_base_branch(None).await.unwrap(), "trunk");
    }

    #[tokio::test]
    async fn test_resolve_fails_outside_repository() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let manager = manager_for(dir.path());

        let result = manager.resolve_base_branch(None).await;
        assert!(matches!(result, Err(WorktreeError::NoBaseBranch)));
        assert!(!manager.create("task-1", None).await);
    }

    #[tokio::test]
    async fn test_remove_missing_worktree_is_ok() {
        let dir = tempdir().unwrap();
        let manager = manager_for(dir.path());

        assert!(manager.remove("never-created").await);
    }

    #[tokio::test]
    async fn test_remove_plain_directory_falls_back_to_delete() {
        let dir = tempdir().unwrap();
        let manager = manager_for(dir.path());
        let path = manager.worktree_path("task-1");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("file.txt"), "data").unwrap();

        assert!(manager.remove("task-1").await);
        assert!(!path.exists());
    }
}
