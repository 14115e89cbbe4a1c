use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::conflict::ConflictStrategy;
use crate::secrets::SecretSource;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// A managed network fabric: one Git directory tree paired with one
/// cluster control-plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fabric {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub git: Option<GitRepositoryConfig>,
    #[serde(default)]
    pub cluster: ClusterEndpoint,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    /// Kinds fetched from the cluster. Empty means every known kind.
    #[serde(default)]
    pub tracked_kinds: Vec<String>,
    pub sync_enabled: bool,
    pub sync_interval_secs: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    /// Informational only. Read `calculate_sync_status` for anything shown
    /// to a user.
    pub sync_status: String,
    pub sync_error: Option<String>,
    pub connection_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fabric {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            git: None,
            cluster: ClusterEndpoint::default(),
            conflict_strategy: ConflictStrategy::default(),
            tracked_kinds: Vec::new(),
            sync_enabled: true,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            last_sync: None,
            last_sync_attempt: None,
            sync_status: "never_synced".to_string(),
            sync_error: None,
            connection_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_cluster(mut self, cluster: ClusterEndpoint) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_git(mut self, git: GitRepositoryConfig) -> Self {
        self.git = Some(git);
        self
    }

    pub fn has_endpoint(&self) -> bool {
        !self.cluster.endpoint.trim().is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.sync_error.as_deref().is_some_and(|e| !e.is_empty())
            || self.connection_error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpoint {
    /// Base URL of the control-plane API, e.g. `https://10.0.0.1:6443`.
    #[serde(default)]
    pub endpoint: String,
    /// Namespaces fetched for each tracked kind. Empty means the
    /// ingestion default namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub token: SecretSource,
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

/// The Git repository backing a fabric's directory tree. Owned by the
/// fabric; deleting the fabric deletes this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositoryConfig {
    /// `None` keeps a local-only repository that commits but never pushes.
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "crate::config::schema::default_branch")]
    pub branch: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub auth: GitAuth,
}

impl GitRepositoryConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: None,
            branch: crate::config::schema::default_branch(),
            local_path: path.into(),
            auth: GitAuth::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuth {
    #[serde(default, rename = "type")]
    pub auth_type: GitAuthType,
    #[serde(default)]
    pub token: SecretSource,
    #[serde(default)]
    pub ssh_key_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAuthType {
    #[default]
    None,
    Token,
    SshKey,
}
