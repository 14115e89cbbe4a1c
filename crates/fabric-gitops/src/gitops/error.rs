//! Errors from the fabric directory tree and the Git plumbing behind it.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Failed to read directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("sync in progress: processing lock held by {owner} (pid {pid}) since {since}")]
    LockHeld {
        owner: String,
        pid: u32,
        since: DateTime<Utc>,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Git merge conflict: {0}")]
    GitMergeConflict(String),

    #[error("Git repository not initialized")]
    GitNotInitialized,

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),
}

impl From<serde_yaml::Error> for GitOpsError {
    fn from(err: serde_yaml::Error) -> Self {
        GitOpsError::SerializeYaml(err.to_string())
    }
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Network hiccups and timeouts; worth another attempt after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitOpsError::GitNetworkError(_) | GitOpsError::GitTimeout(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GitOpsError::GitNetworkError(_) | GitOpsError::GitTimeout(_) => {
                ErrorKind::TransientNetwork
            }
            GitOpsError::GitAuthFailed(_) | GitOpsError::GitNotInitialized => {
                ErrorKind::Configuration
            }
            GitOpsError::LockHeld { .. } => ErrorKind::Concurrency,
            GitOpsError::GitMergeConflict(_) => ErrorKind::Conflict,
            GitOpsError::ParseYaml { .. } | GitOpsError::PathTraversal(_) => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Internal,
        }
    }
}

/// Maps git's stderr onto a specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();
    let trimmed = stderr.trim().to_string();

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
    {
        return GitOpsError::GitAuthFailed(trimmed);
    }

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitOpsError::GitNetworkError(trimmed);
    }

    if lower.contains("merge conflict")
        || lower.contains("not possible to fast-forward")
        || (lower.contains("conflict") && lower.contains("merge"))
    {
        return GitOpsError::GitMergeConflict(trimmed);
    }

    GitOpsError::GitOperation(trimmed)
}

pub type Result<T> = std::result::Result<T, GitOpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let err = classify_git_error(
            "fatal: unable to access 'https://github.com/org/fabric.git/': Could not resolve host: github.com",
        );
        assert!(matches!(err, GitOpsError::GitNetworkError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth_before_network() {
        let err = classify_git_error(
            "remote: Invalid username or password.\nfatal: Authentication failed for 'https://github.com/org/fabric.git/'",
        );
        assert!(matches!(err, GitOpsError::GitAuthFailed(_)));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_classify_diverged() {
        let err = classify_git_error("fatal: Not possible to fast-forward, aborting.");
        assert!(matches!(err, GitOpsError::GitMergeConflict(_)));
    }

    #[test]
    fn test_classify_generic() {
        let err = classify_git_error("fatal: bad revision 'nope'");
        assert!(matches!(err, GitOpsError::GitOperation(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_lock_held_message() {
        let err = GitOpsError::LockHeld {
            owner: "abc".into(),
            pid: 42,
            since: Utc::now(),
        };
        assert!(err.to_string().starts_with("sync in progress"));
        assert_eq!(err.kind(), ErrorKind::Concurrency);
    }
}
