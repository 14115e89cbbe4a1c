//! Git command plumbing for one fabric repository.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use log::debug;
use tokio::process::Command as TokioCommand;

use super::auth::build_auth_env;
use super::parse::{count_changed_files, format_git_error, parse_porcelain_status};
use super::types::*;
use crate::config::GitConfig;
use crate::gitops::error::{classify_git_error, GitOpsError, Result};
use crate::model::{GitAuth, GitRepositoryConfig};

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub branch: String,
    pub auth: GitAuth,
    pub user_name: String,
    pub user_email: String,
    /// Upper bound for any command that talks to the remote.
    pub timeout: Duration,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self::from_config(&GitConfig::default(), None)
    }
}

impl GitSettings {
    pub fn from_config(config: &GitConfig, repository: Option<&GitRepositoryConfig>) -> Self {
        Self {
            branch: repository
                .map(|r| r.branch.clone())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| config.default_branch.clone()),
            auth: repository.map(|r| r.auth.clone()).unwrap_or_default(),
            user_name: config.user_name.clone(),
            user_email: config.user_email.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct GitRepository {
    repo_path: PathBuf,
    settings: GitSettings,
}

impl GitRepository {
    pub fn new(repo_path: impl Into<PathBuf>, settings: GitSettings) -> Self {
        Self {
            repo_path: repo_path.into(),
            settings,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn branch(&self) -> &str {
        &self.settings.branch
    }

    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    pub fn has_commits(&self) -> bool {
        self.is_git_repo()
            && self
                .run_git(&["rev-parse", "--verify", "HEAD"])
                .map(|output| output.status.success())
                .unwrap_or(false)
    }

    pub fn current_branch(&self) -> Result<String> {
        let output = self.run_git(&["symbolic-ref", "--short", "HEAD"])?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn has_remote(&self) -> bool {
        self.run_git(&["remote", "get-url", "origin"])
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub fn status(&self) -> Result<GitStatus> {
        if !self.is_git_repo() {
            return Ok(GitStatus {
                is_repo: false,
                is_clean: true,
                ..GitStatus::default()
            });
        }

        let output = self.run_git(&["status", "--porcelain", "-b"])?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }
        let parsed = parse_porcelain_status(&String::from_utf8_lossy(&output.stdout));

        Ok(GitStatus {
            is_repo: true,
            branch: self.current_branch().ok(),
            is_clean: parsed.files.is_empty(),
            ahead: parsed.ahead,
            behind: parsed.behind,
            files: parsed.files,
        })
    }

    /// Initializes an empty repository on the configured branch. A no-op
    /// for an existing repository.
    pub fn init(&self) -> Result<()> {
        if self.is_git_repo() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.repo_path).map_err(|e| GitOpsError::CreateDirectory {
            path: self.repo_path.clone(),
            source: e,
        })?;

        let output = self.run_git(&["init"])?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }

        let head = format!("refs/heads/{}", self.settings.branch);
        self.run_checked(&["symbolic-ref", "HEAD", &head])?;
        self.configure_identity()
    }

    pub fn set_remote(&self, url: &str) -> Result<()> {
        if self.has_remote() {
            self.run_checked(&["remote", "set-url", "origin", url])
        } else {
            self.run_checked(&["remote", "add", "origin", url])
        }
    }

    /// Clones `url` into this repository's path and checks out the
    /// configured branch, creating it locally when the remote lacks it.
    pub async fn clone_from(&self, url: &str) -> Result<()> {
        let parent = self
            .repo_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent).map_err(|e| GitOpsError::CreateDirectory {
            path: parent.clone(),
            source: e,
        })?;

        let target = self.repo_path.to_string_lossy().to_string();
        self.run_remote(&parent, &["clone", "--quiet", url, &target])
            .await?;
        self.configure_identity()?;

        let branch = self.settings.branch.as_str();
        if self.current_branch().ok().as_deref() == Some(branch) {
            return Ok(());
        }

        let remote_ref = format!("origin/{}", branch);
        let remote_has_branch = self
            .run_git(&["rev-parse", "--verify", "--quiet", &remote_ref])
            .map(|o| o.status.success())
            .unwrap_or(false);

        if remote_has_branch {
            self.run_checked(&["checkout", "-B", branch, &remote_ref])
        } else if self.has_commits() {
            self.run_checked(&["checkout", "-b", branch])
        } else {
            let head = format!("refs/heads/{}", branch);
            self.run_checked(&["symbolic-ref", "HEAD", &head])
        }
    }

    /// Fast-forward pull of the configured branch. A remote that does not
    /// have the branch yet counts as up to date.
    pub async fn pull(&self) -> Result<PullResult> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }

        let branch = self.settings.branch.clone();
        match self
            .run_remote(&self.repo_path, &["pull", "--ff-only", "origin", &branch])
            .await
        {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if stdout.contains("Already up to date") {
                    return Ok(PullResult::up_to_date());
                }
                Ok(PullResult {
                    files_changed: count_changed_files(&stdout),
                    message: stdout,
                })
            }
            Err(e) if e.to_string().contains("couldn't find remote ref") => {
                debug!("Remote has no branch '{}' yet", branch);
                Ok(PullResult::up_to_date())
            }
            Err(e) => Err(e),
        }
    }

    /// Stages `paths` (files or directories, relative to the repository
    /// root, deletions included) and commits them. Returns
    /// [`CommitResult::nothing_to_commit`] when the index is unchanged.
    pub fn commit(&self, paths: &[String], message: &str) -> Result<CommitResult> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }

        let mut add: Vec<&str> = vec!["add", "-A", "--"];
        if paths.is_empty() {
            add.push(".");
        } else {
            add.extend(paths.iter().map(String::as_str));
        }
        self.run_checked(&add)?;

        let staged = self.run_git(&["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            return Ok(CommitResult::nothing_to_commit());
        }

        let user_name = format!("user.name={}", self.settings.user_name);
        let user_email = format!("user.email={}", self.settings.user_email);
        let output = self.run_git(&[
            "-c",
            &user_name,
            "-c",
            &user_email,
            "commit",
            "--quiet",
            "-m",
            message,
        ])?;
        if !output.status.success() {
            return Err(GitOpsError::GitOperation(format_git_error(&output)));
        }

        let hash_output = self.run_git(&["rev-parse", "--short", "HEAD"])?;
        let commit_hash = String::from_utf8_lossy(&hash_output.stdout)
            .trim()
            .to_string();

        Ok(CommitResult {
            message: message.to_string(),
            commit_hash: Some(commit_hash),
            pushed: false,
        })
    }

    pub async fn push(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        let branch = self.settings.branch.clone();
        self.run_remote(&self.repo_path, &["push", "--quiet", "-u", "origin", &branch])
            .await?;
        Ok(())
    }

    fn configure_identity(&self) -> Result<()> {
        self.run_checked(&["config", "user.email", &self.settings.user_email])?;
        self.run_checked(&["config", "user.name", &self.settings.user_name])
    }

    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))
    }

    fn run_checked(&self, args: &[&str]) -> Result<()> {
        let output = self.run_git(args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GitOpsError::GitOperation(format_git_error(&output)))
        }
    }

    /// Runs a command that may hit the network: authenticated, bounded by
    /// the configured timeout, and killed if the timeout fires.
    async fn run_remote(&self, cwd: &Path, args: &[&str]) -> Result<Output> {
        let auth = build_auth_env(&self.settings.auth)?;

        let mut cmd = TokioCommand::new("git");
        cmd.current_dir(cwd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))?;

        let timeout = self.settings.timeout;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| GitOpsError::GitTimeout(timeout.as_secs()))?
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))?;

        drop(auth);

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!("git {}: {}", args.first().copied().unwrap_or(""), line);
        }

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }
}
