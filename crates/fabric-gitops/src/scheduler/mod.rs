//! Periodic sync scheduler.
//!
//! A tick scans every sync-enabled fabric and queues the due ones on the
//! worker pool; host requests arriving on the trigger channel are queued
//! right away. A fabric that is already syncing or queued is skipped, never
//! queued twice.

mod due;
mod error;
mod pool;

pub use due::{due_at, is_due, select_due};
pub use error::SchedulerError;
pub use pool::{SyncJob, SyncJobResult, WorkerPool};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::events::SyncRequest;
use crate::model::SyncTrigger;
use crate::orchestrator::SyncOrchestrator;
use crate::registry::fabric_repo;

/// What happened to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    AlreadySyncing,
    QueueFull,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub queued: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Clone)]
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    pool: Arc<WorkerPool>,
    tick_interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, pool: WorkerPool, tick_interval: Duration) -> Self {
        Self {
            orchestrator,
            pool: Arc::new(pool),
            tick_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Builds the pool from the scheduler section of the engine config.
    /// Passes run on `runtime`.
    pub fn from_config(orchestrator: Arc<SyncOrchestrator>, runtime: Handle) -> Self {
        let config = orchestrator.config().scheduler.clone();
        let pool = WorkerPool::new(
            Arc::clone(&orchestrator),
            runtime,
            config.worker_count.max(1),
            config.effective_queue_capacity(),
        );
        Self::new(orchestrator, pool, Duration::from_secs(config.tick_interval_secs))
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Queues every fabric due at `now`, most overdue first.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let fabrics = fabric_repo::list_sync_enabled(self.orchestrator.database())?;
        let mut report = TickReport::default();
        for fabric in select_due(fabrics, now) {
            match self.submit(&fabric.id, SyncTrigger::Periodic) {
                Submission::Queued => report.queued.push(fabric.id),
                _ => report.skipped.push(fabric.id),
            }
        }
        if !report.queued.is_empty() {
            debug!("Tick queued {} fabric(s)", report.queued.len());
        }
        Ok(report)
    }

    /// Queues a sync of one fabric regardless of its due time.
    pub fn submit(&self, fabric_id: &str, trigger: SyncTrigger) -> Submission {
        let Some(permit) = self.orchestrator.try_reserve(fabric_id) else {
            debug!("{} is already syncing, skipping {} request", fabric_id, trigger);
            self.orchestrator.events().skipped(fabric_id, "already syncing");
            return Submission::AlreadySyncing;
        };

        match self.pool.try_submit(SyncJob { permit, trigger }) {
            Ok(()) => Submission::Queued,
            Err((e, job)) => {
                // releases the marker
                drop(job);
                warn!("Could not queue {} sync of {}: {}", trigger, fabric_id, e);
                self.orchestrator.events().skipped(fabric_id, e.to_string());
                match e {
                    SchedulerError::QueueFull => Submission::QueueFull,
                    SchedulerError::ChannelClosed => Submission::Closed,
                }
            }
        }
    }

    pub fn handle_request(&self, request: &SyncRequest) -> Submission {
        info!("Sync of {} requested ({})", request.fabric_id, request.trigger);
        self.submit(&request.fabric_id, request.trigger)
    }

    /// Starts the tick loop in a background thread. The first tick fires
    /// immediately so fabrics that are already overdue run at startup.
    /// Stopping also shuts the worker pool down and waits for it.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<SyncRequest>) -> JoinHandle<()> {
        let scheduler = self.clone();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to start scheduler runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut timer = tokio::time::interval(scheduler.tick_interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    if scheduler.shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = timer.tick() => {
                            if let Err(e) = scheduler.tick(Utc::now()) {
                                error!("Scheduler tick failed: {}", e);
                            }
                        },
                        Ok(request) = trigger_rx.recv() => {
                            scheduler.handle_request(&request);
                        },
                        _ = scheduler.wake.notified() => {},
                    }

                    scheduler.drain_results();
                }
            });

            scheduler.pool.shutdown();
            scheduler.pool.wait();
            info!("Sync scheduler stopped");
        })
    }

    /// Signals the loop to stop and wakes it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    fn drain_results(&self) {
        while let Some(result) = self.pool.try_recv_result() {
            match &result.result {
                Ok(op) => debug!(
                    "{} sync of {} finished: {}",
                    result.trigger,
                    result.fabric_id,
                    op.outcome.as_str()
                ),
                Err((kind, message)) => warn!(
                    "{} sync of {} failed ({}): {}",
                    result.trigger, result.fabric_id, kind, message
                ),
            }
        }
    }
}
