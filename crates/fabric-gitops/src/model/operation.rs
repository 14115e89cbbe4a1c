use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Manual,
    Periodic,
    /// Requested through the event interface, e.g. after a host-side save.
    Event,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Event => "event",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SyncTrigger::Manual),
            "periodic" => Ok(SyncTrigger::Periodic),
            "event" => Ok(SyncTrigger::Event),
            other => Err(format!("unknown trigger '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Succeeded,
    /// Finished, but some files or resources recorded errors.
    Partial,
    Failed,
    /// Ingestion batch aborted; nothing was moved.
    Aborted,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Succeeded => "succeeded",
            SyncOutcome::Partial => "partial",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Aborted => "aborted",
        }
    }
}

impl FromStr for SyncOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(SyncOutcome::Succeeded),
            "partial" => Ok(SyncOutcome::Partial),
            "failed" => Ok(SyncOutcome::Failed),
            "aborted" => Ok(SyncOutcome::Aborted),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCounts {
    pub ingested: usize,
    pub applied: usize,
    pub fetched: usize,
    pub written_back: usize,
    pub drifted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub files_processed: usize,
    pub moved_to_managed: usize,
    pub moved_to_unmanaged: usize,
    pub conflicts: usize,
    pub applied: usize,
    pub apply_failures: usize,
    pub fetched: usize,
    pub written_back: usize,
    pub files_written: usize,
    pub orphans_removed: usize,
    pub per_kind: BTreeMap<String, KindCounts>,
}

impl SyncCounts {
    pub fn kind_mut(&mut self, kind: &str) -> &mut KindCounts {
        self.per_kind.entry(kind.to_string()).or_default()
    }
}

/// Audit record of one orchestrator invocation. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: String,
    pub fabric_id: String,
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SyncOutcome,
    pub counts: SyncCounts,
    pub errors: Vec<String>,
    pub message: Option<String>,
}

impl SyncOperation {
    pub fn begin(fabric_id: &str, trigger: SyncTrigger) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fabric_id: fabric_id.to_string(),
            trigger,
            started_at: now,
            finished_at: now,
            outcome: SyncOutcome::Succeeded,
            counts: SyncCounts::default(),
            errors: Vec::new(),
            message: None,
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Closes the record. An outcome already set to failed or aborted is
    /// kept; otherwise any recorded error makes the pass partial.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        if self.outcome == SyncOutcome::Succeeded && !self.errors.is_empty() {
            self.outcome = SyncOutcome::Partial;
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.message = Some(error.clone());
        self.errors.push(error);
        self.outcome = SyncOutcome::Failed;
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Succeeded | SyncOutcome::Partial)
    }
}
