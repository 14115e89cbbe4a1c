use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::gitops::GitOpsError;
use crate::ingest::IngestError;
use crate::registry::DatabaseError;
use crate::secrets::SecretError;

/// Failure of a whole sync request. Errors scoped to a single file or
/// resource never surface here; they are recorded on that file or resource
/// and the pass carries on.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("already syncing: {0}")]
    Concurrency(String),

    #[error("Unknown fabric: {0}")]
    UnknownFabric(String),

    #[error("Git error: {0}")]
    Git(#[from] GitOpsError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Registry error: {0}")]
    Registry(#[from] DatabaseError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

/// The error classes callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TransientNetwork,
    Validation,
    Conflict,
    Concurrency,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration(_) | SyncError::Secret(_) | SyncError::UnknownFabric(_) => {
                ErrorKind::Configuration
            }
            SyncError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::Concurrency(_) => ErrorKind::Concurrency,
            SyncError::Git(e) => e.kind(),
            SyncError::Cluster(e) => e.kind(),
            SyncError::Ingest(e) => e.kind(),
            SyncError::Registry(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid kind mapping '{kind}': {reason}")]
    InvalidKind { kind: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SyncError::Configuration("endpoint missing".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            SyncError::Concurrency("fabric-a".into()).kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(
            SyncError::Git(GitOpsError::GitTimeout(120)).kind(),
            ErrorKind::TransientNetwork
        );
        assert!(SyncError::Git(GitOpsError::GitNetworkError("reset".into())).is_retryable());
        assert!(!SyncError::Git(GitOpsError::GitAuthFailed("denied".into())).is_retryable());
    }

    #[test]
    fn test_concurrency_message() {
        let err = SyncError::Concurrency("fabric-a".into());
        assert_eq!(err.to_string(), "already syncing: fabric-a");
    }
}
