//! Git Directory Manager: keeps a fabric's directory tree in a Git
//! working copy and moves it to and from the remote.

use log::{debug, info};
use std::path::Path;
use std::time::Duration;

use crate::config::GitConfig;
use crate::gitops::error::Result;
use crate::gitops::git::{CommitResult, GitRepository, GitSettings, GitStatus, PullResult};
use crate::gitops::layout::FabricLayout;
use crate::model::GitRepositoryConfig;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::sanitize::{redact_path, redact_url};

pub struct GitDirectoryManager {
    repo: GitRepository,
    layout: FabricLayout,
    remote_url: Option<String>,
    retry: RetryPolicy,
}

impl GitDirectoryManager {
    pub fn new(config: &GitConfig, repository: &GitRepositoryConfig) -> Self {
        let local_path = crate::secrets::expand_home(&repository.local_path.to_string_lossy());
        Self {
            repo: GitRepository::new(&local_path, GitSettings::from_config(config, Some(repository))),
            layout: FabricLayout::new(&local_path),
            remote_url: repository
                .remote_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            retry: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn layout(&self) -> &FabricLayout {
        &self.layout
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    pub fn has_remote(&self) -> bool {
        self.remote_url.is_some()
    }

    pub fn status(&self) -> Result<GitStatus> {
        self.repo.status()
    }

    /// Makes the working copy usable: clones the remote into a missing or
    /// empty directory, otherwise opens (or initializes) what is there, then
    /// creates any missing part of the directory skeleton. Returns the
    /// skeleton entries that had to be created.
    pub async fn prepare(&self) -> Result<Vec<String>> {
        let root = self.layout.root();

        if !self.repo.is_git_repo() {
            match &self.remote_url {
                Some(url) if is_missing_or_empty(root) => {
                    info!("Cloning {} into {}", redact_url(url), redact_path(root));
                    retry_with_backoff(
                        &self.retry,
                        "git clone",
                        |e: &crate::gitops::GitOpsError| e.is_retryable(),
                        || self.repo.clone_from(url),
                    )
                    .await?;
                }
                Some(url) => {
                    info!(
                        "Initializing existing directory {} against {}",
                        redact_path(root),
                        redact_url(url)
                    );
                    self.repo.init()?;
                    self.repo.set_remote(url)?;
                }
                None => {
                    info!("Initializing local-only repository in {}", redact_path(root));
                    self.repo.init()?;
                }
            }
        } else if let Some(url) = &self.remote_url {
            self.repo.set_remote(url)?;
        }

        self.layout.ensure_structure()
    }

    /// Fast-forwards the working copy. Local-only repositories have
    /// nothing to pull.
    pub async fn pull(&self) -> Result<PullResult> {
        if self.remote_url.is_none() {
            return Ok(PullResult::up_to_date());
        }

        let result = retry_with_backoff(
            &self.retry,
            "git pull",
            |e: &crate::gitops::GitOpsError| e.is_retryable(),
            || self.repo.pull(),
        )
        .await?;

        if result.files_changed > 0 {
            info!("Pulled {} changed file(s)", result.files_changed);
        }
        Ok(result)
    }

    /// Commits `paths` and pushes when a remote is configured. Commits left
    /// unpushed by an earlier failed push are pushed too.
    pub async fn commit(&self, paths: &[String], message: &str) -> Result<CommitResult> {
        let mut result = self.repo.commit(paths, message)?;

        if self.remote_url.is_none() {
            return Ok(result);
        }

        let ahead = self.repo.status().map(|s| s.ahead).unwrap_or(0);
        // a brand-new branch has no upstream, so ahead stays 0
        if result.commit_hash.is_none() && ahead == 0 {
            return Ok(result);
        }

        retry_with_backoff(
            &self.retry,
            "git push",
            |e: &crate::gitops::GitOpsError| e.is_retryable(),
            || self.repo.push(),
        )
        .await?;
        result.pushed = true;
        debug!("Pushed '{}'", message);

        Ok(result)
    }
}

fn is_missing_or_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
