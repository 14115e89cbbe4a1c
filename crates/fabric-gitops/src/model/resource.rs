use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Document;

/// Identity of a resource within a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

/// Which way changes are allowed to flow for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Discovered in Git; Git is authoritative and cluster edits are reverted.
    GitToCluster,
    /// Discovered in the cluster; cluster edits are written back to Git.
    ClusterToGit,
    /// Either side may change; the side that changed since the last
    /// convergence wins.
    Bidirectional,
}

string_enum!(SyncDirection {
    GitToCluster => "git_to_cluster",
    ClusterToGit => "cluster_to_git",
    Bidirectional => "bidirectional",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    None,
    /// A collision happened and a strategy picked or merged a winner.
    Resolved,
    /// Waiting for a manual decision; nothing is written for this resource.
    Conflict,
}

string_enum!(ConflictStatus {
    None => "none",
    Resolved => "resolved",
    Conflict => "conflict",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    #[default]
    None,
    Minor,
    Major,
}

string_enum!(DriftStatus {
    None => "none",
    Minor => "minor",
    Major => "major",
});

/// Registry row for one tracked resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedResource {
    pub id: String,
    pub fabric_id: String,
    pub key: ResourceKey,
    /// Normalized manifest as it exists in Git.
    pub desired_spec: Option<Document>,
    /// Normalized manifest as last fetched from the cluster.
    pub actual_spec: Option<Document>,
    pub managed_file_path: Option<String>,
    pub file_hash: Option<String>,
    pub desired_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub actual_version: Option<String>,
    /// Fingerprints of both sides the last time they were reconciled.
    pub synced_desired_hash: Option<String>,
    pub synced_actual_hash: Option<String>,
    pub sync_direction: SyncDirection,
    pub conflict_status: ConflictStatus,
    pub drift_status: DriftStatus,
    pub drift_score: f64,
    pub reconciliation_attempts: u32,
    pub last_error: Option<String>,
    pub absent_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedResource {
    pub fn git_changed(&self) -> bool {
        self.desired_hash.is_some() && self.desired_hash != self.synced_desired_hash
    }

    pub fn cluster_changed(&self) -> bool {
        self.actual_hash.is_some() && self.actual_hash != self.synced_actual_hash
    }

    pub fn is_orphan(&self) -> bool {
        self.desired_spec.is_none() && self.actual_spec.is_none()
    }
}

/// One row of a resource's state-change history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}
