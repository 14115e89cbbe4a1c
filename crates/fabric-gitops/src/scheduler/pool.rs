use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info};
use tokio::runtime::Handle;

use super::error::SchedulerError;
use crate::error::ErrorKind;
use crate::model::{SyncOperation, SyncTrigger};
use crate::orchestrator::{SyncOrchestrator, SyncPermit};

/// One queued sync. Holds the fabric's in-flight marker from the moment it
/// is queued, so the same fabric cannot be queued twice.
#[derive(Debug)]
pub struct SyncJob {
    pub permit: SyncPermit,
    pub trigger: SyncTrigger,
}

impl SyncJob {
    pub fn fabric_id(&self) -> &str {
        self.permit.fabric_id()
    }
}

#[derive(Debug)]
pub struct SyncJobResult {
    pub fabric_id: String,
    pub trigger: SyncTrigger,
    pub result: Result<SyncOperation, (ErrorKind, String)>,
}

/// OS worker threads running sync passes on a shared tokio runtime. Syncs
/// of different fabrics run in parallel; the queue is bounded.
pub struct WorkerPool {
    job_sender: Sender<SyncJob>,
    result_receiver: Receiver<SyncJobResult>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        runtime: Handle,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let capacity = queue_capacity.max(1);
        let (job_sender, job_receiver) = bounded::<SyncJob>(capacity);
        let (result_sender, result_receiver) = bounded::<SyncJobResult>(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let orchestrator = Arc::clone(&orchestrator);
            let runtime = runtime.clone();

            let handle = thread::spawn(move || {
                run_worker(worker_id, job_rx, result_tx, shutdown_flag, orchestrator, runtime);
            });
            workers.push(handle);
        }

        info!("Started {} sync workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers: Mutex::new(workers),
            shutdown,
        }
    }

    /// Queues a job without blocking. A full queue hands the job back so
    /// the caller can drop it, releasing the fabric's marker.
    pub fn try_submit(&self, job: SyncJob) -> Result<(), (SchedulerError, SyncJob)> {
        if self.is_shutdown() {
            return Err((SchedulerError::ChannelClosed, job));
        }
        self.job_sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => (SchedulerError::QueueFull, job),
            TrySendError::Disconnected(job) => (SchedulerError::ChannelClosed, job),
        })
    }

    pub fn try_recv_result(&self) -> Option<SyncJobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<SyncJobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.job_sender.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down sync worker pool...");
        self.shutdown.store(true, Ordering::Release);
    }

    /// Joins every worker. Call after [`WorkerPool::shutdown`]; a running
    /// pass finishes first since passes cannot be cancelled.
    pub fn wait(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Sync worker {} panicked: {:?}", i, e);
            } else {
                debug!("Sync worker {} finished", i);
            }
        }
        info!("All sync workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<SyncJob>,
    result_sender: Sender<SyncJobResult>,
    shutdown: Arc<AtomicBool>,
    orchestrator: Arc<SyncOrchestrator>,
    runtime: Handle,
) {
    debug!("Sync worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Sync worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                let fabric_id = job.fabric_id().to_string();
                let trigger = job.trigger;
                debug!("Sync worker {} running {} sync of {}", worker_id, trigger, fabric_id);

                let result = runtime
                    .block_on(orchestrator.sync_reserved(job.permit, trigger))
                    .map_err(|e| (e.kind(), e.to_string()));

                let result = SyncJobResult {
                    fabric_id,
                    trigger,
                    result,
                };
                // nobody draining results must not stall the worker
                if let Err(TrySendError::Full(dropped)) = result_sender.try_send(result) {
                    debug!("Result queue full, dropping result for {}", dropped.fabric_id);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Sync worker {} channel closed", worker_id);
                break;
            }
        }
    }

    debug!("Sync worker {} stopped", worker_id);
}
