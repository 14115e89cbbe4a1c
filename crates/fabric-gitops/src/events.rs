//! Explicit sync event stream and trigger channel.
//!
//! Hosts subscribe to [`SyncEvent`]s instead of polling, and request syncs
//! through a [`SyncTriggerSender`] instead of calling into the engine from
//! their own save hooks. Delivery is at-least-once: a repeated request for
//! a fabric that is mid-sync is skipped, and a sync over unchanged state
//! changes nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::model::{SyncCounts, SyncOutcome, SyncTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Pull,
    Ingest,
    Apply,
    Fetch,
    Reconcile,
    Commit,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Pull => "pull",
            SyncPhase::Ingest => "ingest",
            SyncPhase::Apply => "apply",
            SyncPhase::Fetch => "fetch",
            SyncPhase::Reconcile => "reconcile",
            SyncPhase::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        fabric_id: String,
        trigger: SyncTrigger,
        at: DateTime<Utc>,
    },
    Phase {
        fabric_id: String,
        phase: SyncPhase,
        message: String,
    },
    Completed {
        fabric_id: String,
        outcome: SyncOutcome,
        counts: SyncCounts,
        at: DateTime<Utc>,
    },
    Failed {
        fabric_id: String,
        error: String,
        at: DateTime<Utc>,
    },
    /// A request that was not run, e.g. because the fabric is mid-sync.
    Skipped { fabric_id: String, reason: String },
}

impl SyncEvent {
    pub fn fabric_id(&self) -> &str {
        match self {
            SyncEvent::Started { fabric_id, .. }
            | SyncEvent::Phase { fabric_id, .. }
            | SyncEvent::Completed { fabric_id, .. }
            | SyncEvent::Failed { fabric_id, .. }
            | SyncEvent::Skipped { fabric_id, .. } => fabric_id,
        }
    }
}

/// Broadcasts sync events to every subscriber.
#[derive(Clone)]
pub struct SyncEventBroadcaster {
    sender: Arc<broadcast::Sender<SyncEvent>>,
}

impl SyncEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn phase(&self, fabric_id: &str, phase: SyncPhase, message: impl Into<String>) {
        self.send(SyncEvent::Phase {
            fabric_id: fabric_id.to_string(),
            phase,
            message: message.into(),
        });
    }

    pub fn skipped(&self, fabric_id: &str, reason: impl Into<String>) {
        self.send(SyncEvent::Skipped {
            fabric_id: fabric_id.to_string(),
            reason: reason.into(),
        });
    }
}

impl Default for SyncEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A request to sync one fabric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub fabric_id: String,
    pub trigger: SyncTrigger,
    pub requested_at: DateTime<Utc>,
}

impl SyncRequest {
    pub fn new(fabric_id: &str, trigger: SyncTrigger) -> Self {
        Self {
            fabric_id: fabric_id.to_string(),
            trigger,
            requested_at: Utc::now(),
        }
    }
}

/// The host's handle for requesting syncs. Consumed by the scheduler.
#[derive(Clone)]
pub struct SyncTriggerSender {
    sender: broadcast::Sender<SyncRequest>,
}

impl SyncTriggerSender {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns false when nobody is listening, i.e. the scheduler is not
    /// running.
    pub fn request(&self, fabric_id: &str) -> bool {
        self.sender
            .send(SyncRequest::new(fabric_id, SyncTrigger::Event))
            .is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncRequest> {
        self.sender.subscribe()
    }
}

impl Default for SyncTriggerSender {
    fn default() -> Self {
        Self::new(64)
    }
}
