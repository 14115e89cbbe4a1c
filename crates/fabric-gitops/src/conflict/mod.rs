//! Conflict Resolution Engine: settles documents that claim the same
//! `(kind, namespace, name)` identity.

mod merge;
mod resolver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::ResourceKey;

pub use merge::{merge3, merge_documents};
pub use resolver::{Candidate, ConflictResolver, ExcessiveConflicts, ManagedState, Resolution, ResolvedKey};

/// How identity collisions are settled for a fabric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// The document with the newest file timestamp wins; later documents in
    /// the same file beat earlier ones.
    #[default]
    MostRecentWins,
    /// Nothing is written; the resource stays flagged until a host picks a
    /// winner.
    Manual,
    /// Field-level three-way merge; overlapping edits fall back to manual.
    Merge,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::MostRecentWins => "most-recent-wins",
            ConflictStrategy::Manual => "manual",
            ConflictStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "most-recent-wins" | "most-recent" | "latest" => Ok(ConflictStrategy::MostRecentWins),
            "manual" => Ok(ConflictStrategy::Manual),
            "merge" => Ok(ConflictStrategy::Merge),
            other => Err(format!("unknown conflict strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOutcome {
    KeptExisting,
    Accepted,
    Merged,
    PendingManual,
    MergeFailed,
    /// Git and the cluster both changed the resource; the cluster version
    /// was written back.
    ClusterWins,
}

impl ConflictOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictOutcome::KeptExisting => "kept_existing",
            ConflictOutcome::Accepted => "accepted",
            ConflictOutcome::Merged => "merged",
            ConflictOutcome::PendingManual => "pending_manual",
            ConflictOutcome::MergeFailed => "merge_failed",
            ConflictOutcome::ClusterWins => "cluster_wins",
        }
    }

    /// Whether the resource still waits for a decision.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConflictOutcome::PendingManual | ConflictOutcome::MergeFailed
        )
    }
}

impl FromStr for ConflictOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kept_existing" => Ok(ConflictOutcome::KeptExisting),
            "accepted" => Ok(ConflictOutcome::Accepted),
            "merged" => Ok(ConflictOutcome::Merged),
            "pending_manual" => Ok(ConflictOutcome::PendingManual),
            "merge_failed" => Ok(ConflictOutcome::MergeFailed),
            "cluster_wins" => Ok(ConflictOutcome::ClusterWins),
            other => Err(format!("unknown conflict outcome '{}'", other)),
        }
    }
}

/// One detected identity collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub key: ResourceKey,
    pub strategy: ConflictStrategy,
    pub outcome: ConflictOutcome,
    /// Where each contender came from, in resolution order.
    pub sources: Vec<String>,
    pub detected_at: DateTime<Utc>,
}
