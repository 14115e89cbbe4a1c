//! Scheduler and concurrency behavior across whole passes.

mod common;

use common::*;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::TryRecvError;

use fabric_gitops::model::{ClusterEndpoint, Fabric, GitRepositoryConfig, SyncOutcome, SyncTrigger};
use fabric_gitops::registry::fabric_repo;
use fabric_gitops::scheduler::{Submission, SyncScheduler, WorkerPool};
use fabric_gitops::{SyncError, SyncEvent, SyncTriggerSender};

fn runtime() -> Runtime {
    Runtime::new().expect("Failed to build runtime")
}

/// Keeps the harness fabric out of periodic ticks.
fn disable_harness_fabric(harness: &TestHarness) {
    let mut fabric = harness.reload_fabric();
    fabric.sync_enabled = false;
    fabric_repo::update(harness.db(), &fabric).expect("Failed to update fabric");
}

fn insert_fabric(harness: &TestHarness, name: &str, synced_secs_ago: i64) -> Fabric {
    let dir = harness.temp_path().join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create fabric dir");
    let last_sync = Utc::now() - ChronoDuration::seconds(synced_secs_ago);

    let mut fabric = Fabric::new(name)
        .with_git(GitRepositoryConfig::local(&dir))
        .with_cluster(ClusterEndpoint {
            endpoint: "https://fabric.example:6443".to_string(),
            ..ClusterEndpoint::default()
        });
    fabric.sync_interval_secs = 60;
    fabric.last_sync = Some(last_sync);
    fabric.last_sync_attempt = Some(last_sync);
    fabric_repo::insert(harness.db(), &fabric).expect("Failed to insert fabric");
    fabric
}

fn scheduler(harness: &TestHarness, rt: &Runtime, tick: Duration) -> SyncScheduler {
    let pool = WorkerPool::new(Arc::clone(&harness.orchestrator), rt.handle().clone(), 2, 8);
    SyncScheduler::new(Arc::clone(&harness.orchestrator), pool, tick)
}

#[test]
fn test_tick_queues_only_due_fabrics() {
    let rt = runtime();
    let harness = TestHarness::new();
    disable_harness_fabric(&harness);
    let overdue = insert_fabric(&harness, "overdue", 61);
    let fresh = insert_fabric(&harness, "fresh", 59);
    let scheduler = scheduler(&harness, &rt, Duration::from_secs(3600));

    let report = scheduler.tick(Utc::now()).unwrap();

    assert_eq!(report.queued, vec![overdue.id.clone()]);
    assert!(report.skipped.is_empty());
    assert!(!report.queued.contains(&fresh.id));

    let result = scheduler
        .pool()
        .recv_result_timeout(Duration::from_secs(30))
        .expect("No sync result");
    assert_eq!(result.fabric_id, overdue.id);
    assert_eq!(result.trigger, SyncTrigger::Periodic);
    assert_eq!(result.result.unwrap().outcome, SyncOutcome::Succeeded);

    scheduler.pool().shutdown();
    scheduler.pool().wait();
}

#[test]
fn test_submit_while_syncing_is_skipped() {
    let rt = runtime();
    let harness = TestHarness::new();
    let scheduler = scheduler(&harness, &rt, Duration::from_secs(3600));
    let mut events = harness.orchestrator.events().subscribe();

    let permit = harness.orchestrator.try_reserve(&harness.fabric.id).unwrap();
    assert_eq!(
        scheduler.submit(&harness.fabric.id, SyncTrigger::Manual),
        Submission::AlreadySyncing
    );
    assert!(matches!(events.try_recv(), Ok(SyncEvent::Skipped { .. })));
    assert_eq!(scheduler.pool().queued(), 0);

    drop(permit);
    assert!(!harness.orchestrator.is_syncing(&harness.fabric.id));

    scheduler.pool().shutdown();
    scheduler.pool().wait();
}

#[tokio::test]
async fn test_overlapping_passes_run_once() {
    let harness = TestHarness::new();
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    // keeps the first pass in flight while the second one starts
    harness.cluster.set_latency(Duration::from_millis(50));

    let (first, second) = tokio::join!(
        harness.orchestrator.sync(&harness.fabric.id, SyncTrigger::Manual),
        harness.orchestrator.sync(&harness.fabric.id, SyncTrigger::Periodic),
    );

    let results = [first, second];
    let refused: Vec<&SyncError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(refused.len(), 1);
    assert!(matches!(refused[0], SyncError::Concurrency(_)));
    assert!(refused[0].to_string().contains("already syncing"));
    assert_eq!(harness.cluster.create_calls(), 1);
    assert!(!harness.orchestrator.is_syncing(&harness.fabric.id));
}

#[test]
fn test_requested_sync_runs_and_scheduler_stops() {
    let rt = runtime();
    let harness = TestHarness::new();
    disable_harness_fabric(&harness);
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));

    let scheduler = scheduler(&harness, &rt, Duration::from_secs(3600));
    let triggers = SyncTriggerSender::default();
    let mut events = harness.orchestrator.events().subscribe();
    let handle = scheduler.start(triggers.subscribe());

    assert!(triggers.request(&harness.fabric.id));

    let deadline = Instant::now() + Duration::from_secs(30);
    let completed = loop {
        assert!(Instant::now() < deadline, "requested sync never completed");
        match events.try_recv() {
            Ok(SyncEvent::Completed { fabric_id, outcome, .. }) if fabric_id == harness.fabric.id => {
                break outcome;
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(20)),
            Err(TryRecvError::Closed) => panic!("event channel closed"),
        }
    };
    assert_eq!(completed, SyncOutcome::Succeeded);
    assert!(harness.cluster.document(&vpc_key("vpc-1")).is_some());

    scheduler.stop();
    handle.join().expect("Scheduler thread panicked");
    assert!(scheduler.pool().is_shutdown());
}

#[test]
fn test_stop_before_first_request() {
    let rt = runtime();
    let harness = TestHarness::new();
    disable_harness_fabric(&harness);
    let scheduler = scheduler(&harness, &rt, Duration::from_millis(50));
    let triggers = SyncTriggerSender::default();

    let handle = scheduler.start(triggers.subscribe());
    std::thread::sleep(Duration::from_millis(120));
    scheduler.stop();

    handle.join().expect("Scheduler thread panicked");
    assert!(scheduler.pool().is_shutdown());
    assert!(harness.cluster.is_empty());
}
