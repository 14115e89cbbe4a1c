//! End-to-end sync passes against a real Git working copy and an
//! in-memory cluster.

mod common;

use common::*;

use fabric_gitops::conflict::{ConflictOutcome, ConflictStrategy};
use fabric_gitops::drift::{calculate_sync_status, CalculatedSyncStatus};
use fabric_gitops::model::{ConflictStatus, DriftStatus, SyncDirection, SyncOutcome, SyncTrigger};
use fabric_gitops::registry::{conflict_repo, operation_repo};
use fabric_gitops::{ErrorKind, SyncError};

#[tokio::test]
async fn test_git_resource_is_applied() {
    let harness = TestHarness::new();
    harness.write_raw("vpcs.yaml", &stream(&[vpc_yaml("vpc-1", "10.0.1.0/24"), vpc_yaml("vpc-2", "10.0.2.0/24")]));

    let op = harness.sync().await;

    assert_eq!(op.outcome, SyncOutcome::Succeeded);
    assert_eq!(op.counts.files_processed, 1);
    assert_eq!(op.counts.moved_to_managed, 2);
    assert_eq!(op.counts.applied, 2);
    assert_eq!(op.counts.per_kind["VPC"].ingested, 2);
    assert_eq!(op.counts.per_kind["VPC"].applied, 2);
    assert!(harness.layout.raw_dir().join("vpcs.yaml.archived").exists());

    let applied = harness.cluster.document(&vpc_key("vpc-1")).unwrap();
    assert_eq!(applied.fingerprint(), vpc("vpc-1", "10.0.1.0/24").fingerprint());

    let resource = harness.resource(&vpc_key("vpc-1"));
    assert_eq!(resource.sync_direction, SyncDirection::GitToCluster);
    assert_eq!(resource.drift_status, DriftStatus::None);
    assert_eq!(resource.synced_desired_hash, resource.desired_hash);
    assert_eq!(
        resource.managed_file_path.as_deref(),
        Some("managed/vpc/default/vpc-1.yaml")
    );

    let fabric = harness.reload_fabric();
    assert!(fabric.last_sync.is_some());
    assert_eq!(
        calculate_sync_status(&fabric, chrono::Utc::now()),
        CalculatedSyncStatus::InSync
    );
    assert_eq!(harness.commit_count(), 1);
}

#[tokio::test]
async fn test_second_sync_changes_nothing() {
    let harness = TestHarness::new();
    harness.write_raw("vpcs.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    harness.cluster.insert(&server("server-01", "compute node"));

    harness.sync().await;
    let before = harness.snapshot();
    let commits = harness.commit_count();
    harness.cluster.reset_counters();

    let op = harness.sync().await;

    assert_eq!(op.outcome, SyncOutcome::Succeeded);
    assert_eq!(op.counts.applied, 0);
    assert_eq!(op.counts.written_back, 0);
    assert_eq!(op.counts.files_written, 0);
    assert_eq!(harness.cluster.apply_calls(), 0);
    assert_eq!(harness.snapshot(), before);
    assert_eq!(harness.commit_count(), commits);
}

#[tokio::test]
async fn test_cluster_only_resource_round_trips() {
    let harness = TestHarness::new();
    let original = server("server-01", "compute node");
    harness.cluster.insert(&original);

    let op = harness.sync().await;

    assert_eq!(op.counts.written_back, 1);
    assert_eq!(op.counts.per_kind["Server"].written_back, 1);
    let written = harness.managed_document(&server_key("server-01"));
    assert_eq!(written.comparable(), original.comparable());
    assert!(written.provenance().is_some());

    let resource = harness.resource(&server_key("server-01"));
    assert_eq!(resource.sync_direction, SyncDirection::ClusterToGit);
    assert_eq!(resource.drift_status, DriftStatus::None);

    let log = std::process::Command::new("git")
        .args(["log", "-1", "--format=%s"])
        .current_dir(&harness.fabric_dir)
        .output()
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&log.stdout).trim(),
        "sync: 1 resources updated from cluster"
    );

    harness.cluster.reset_counters();
    let before = harness.snapshot();
    let op = harness.sync().await;
    assert_eq!(op.counts.written_back, 0);
    assert_eq!(harness.cluster.apply_calls(), 0);
    assert_eq!(harness.snapshot(), before);
}

#[tokio::test]
async fn test_git_edit_is_applied() {
    let harness = TestHarness::new();
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    harness.sync().await;

    harness.edit_managed(&vpc_key("vpc-1"), &vpc("vpc-1", "10.0.7.0/24"));
    let op = harness.sync().await;

    assert_eq!(op.counts.applied, 1);
    let applied = harness.cluster.document(&vpc_key("vpc-1")).unwrap();
    assert_eq!(applied.spec["subnets"]["default"]["subnet"], "10.0.7.0/24");
}

#[tokio::test]
async fn test_cluster_edit_of_git_resource_is_reverted() {
    let harness = TestHarness::new();
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    harness.sync().await;

    harness.cluster.insert(&vpc("vpc-1", "10.0.99.0/24"));
    let op = harness.sync().await;

    assert_eq!(op.counts.applied, 1);
    assert_eq!(op.counts.written_back, 0);
    let reverted = harness.cluster.document(&vpc_key("vpc-1")).unwrap();
    assert_eq!(reverted.spec["subnets"]["default"]["subnet"], "10.0.1.0/24");
}

#[tokio::test]
async fn test_cluster_edit_of_cluster_resource_is_written_back() {
    let harness = TestHarness::new();
    harness.cluster.insert(&server("server-01", "compute node"));
    harness.sync().await;

    harness.cluster.insert(&server("server-01", "storage node"));
    let op = harness.sync().await;

    assert_eq!(op.counts.written_back, 1);
    let written = harness.managed_document(&server_key("server-01"));
    assert_eq!(written.spec["description"], "storage node");
}

#[tokio::test]
async fn test_cluster_resource_version_is_recorded() {
    let harness = TestHarness::new();
    harness.cluster.insert(&server("server-01", "compute node"));
    harness.sync().await;

    let first = harness.resource(&server_key("server-01")).actual_version;
    assert!(first.is_some());
    assert_eq!(
        first,
        harness.cluster.document(&server_key("server-01")).unwrap().metadata.resource_version
    );

    // same content stored again under a new version
    harness.cluster.insert(&server("server-01", "compute node"));
    let op = harness.sync().await;

    assert_eq!(op.counts.written_back, 0);
    let second = harness.resource(&server_key("server-01")).actual_version;
    assert!(second.is_some());
    assert_ne!(second, first);
    assert_eq!(
        second,
        harness.cluster.document(&server_key("server-01")).unwrap().metadata.resource_version
    );
}

#[tokio::test]
async fn test_applied_resource_version_is_recorded() {
    let harness = TestHarness::new();
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    harness.sync().await;

    let stored = harness.cluster.document(&vpc_key("vpc-1")).unwrap();
    assert!(stored.metadata.resource_version.is_some());
    assert_eq!(
        harness.resource(&vpc_key("vpc-1")).actual_version,
        stored.metadata.resource_version
    );
}

/// Both sides changed between two passes: the cluster version lands in Git
/// and the resource is flagged.
async fn concurrent_edit() -> (String, ConflictStatus, Vec<ConflictOutcome>) {
    let harness = TestHarness::new();
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    harness.sync().await;

    harness.edit_managed(&vpc_key("vpc-1"), &vpc("vpc-1", "10.0.2.0/24"));
    harness.cluster.insert(&vpc("vpc-1", "10.0.3.0/24"));
    let op = harness.sync().await;
    assert_eq!(op.counts.conflicts, 1);
    assert_eq!(op.counts.applied, 0);

    let managed = harness.managed_document(&vpc_key("vpc-1"));
    let subnet = managed.spec["subnets"]["default"]["subnet"]
        .as_str()
        .unwrap()
        .to_string();
    let status = harness.resource(&vpc_key("vpc-1")).conflict_status;
    let outcomes = conflict_repo::list(harness.db(), &harness.fabric.id)
        .unwrap()
        .into_iter()
        .map(|c| c.record.outcome)
        .collect();
    (subnet, status, outcomes)
}

#[tokio::test]
async fn test_concurrent_edit_cluster_wins_deterministically() {
    let first = concurrent_edit().await;
    let second = concurrent_edit().await;

    assert_eq!(first.0, "10.0.3.0/24");
    assert_eq!(first.1, ConflictStatus::Conflict);
    assert_eq!(first.2, vec![ConflictOutcome::ClusterWins]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_invalid_file_goes_to_unmanaged() {
    let harness = TestHarness::new();
    harness.write_raw("broken.yaml", "kind: [unclosed\n");

    let op = harness.sync().await;

    assert_eq!(op.outcome, SyncOutcome::Succeeded);
    assert_eq!(op.counts.moved_to_unmanaged, 1);
    let unmanaged = harness.unmanaged_files();
    assert_eq!(unmanaged.len(), 2);
    assert!(unmanaged.iter().any(|n| n.ends_with(".reason")));
    assert!(!harness.layout.raw_dir().join("broken.yaml").exists());
    assert!(harness.cluster.is_empty());
}

#[tokio::test]
async fn test_manual_conflict_waits_for_resolution() {
    let harness = TestHarness::with_strategy(ConflictStrategy::Manual);
    harness.write_raw(
        "dup.yaml",
        &stream(&[vpc_yaml("vpc-1", "10.0.1.0/24"), vpc_yaml("vpc-1", "10.0.9.0/24")]),
    );

    let op = harness.sync().await;
    assert_eq!(op.counts.conflicts, 1);
    assert!(!harness.managed_path(&vpc_key("vpc-1")).exists());
    assert!(harness.cluster.is_empty());
    assert_eq!(conflict_repo::list_open(harness.db(), &harness.fabric.id).unwrap().len(), 1);

    // still blocked on the next pass
    harness.sync().await;
    assert!(harness.cluster.is_empty());

    harness
        .orchestrator
        .resolve_manual(&harness.fabric.id, &vpc_key("vpc-1"), Some(vpc("vpc-1", "10.0.9.0/24")))
        .await
        .unwrap();
    assert!(conflict_repo::list_open(harness.db(), &harness.fabric.id).unwrap().is_empty());
    assert_eq!(harness.resource(&vpc_key("vpc-1")).conflict_status, ConflictStatus::Resolved);

    let op = harness.sync().await;
    assert_eq!(op.counts.applied, 1);
    let applied = harness.cluster.document(&vpc_key("vpc-1")).unwrap();
    assert_eq!(applied.spec["subnets"]["default"]["subnet"], "10.0.9.0/24");
}

#[tokio::test]
async fn test_excessive_conflicts_abort_the_batch() {
    let mut config = test_config();
    config.ingestion.conflict_threshold = 1;
    let harness = TestHarness::build(ConflictStrategy::MostRecentWins, config);

    let mut documents = Vec::new();
    for i in 0..2 {
        documents.push(vpc_yaml(&format!("vpc-{}", i), "10.0.1.0/24"));
        documents.push(vpc_yaml(&format!("vpc-{}", i), "10.0.2.0/24"));
    }
    harness.write_raw("storm.yaml", &stream(&documents));

    let err = harness
        .orchestrator
        .sync(&harness.fabric.id, SyncTrigger::Manual)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(harness.layout.raw_dir().join("storm.yaml").exists());
    assert!(harness.cluster.is_empty());

    let op = operation_repo::latest(harness.db(), &harness.fabric.id)
        .unwrap()
        .unwrap();
    assert_eq!(op.outcome, SyncOutcome::Aborted);
    assert!(op.message.unwrap().starts_with("aborted: excessive conflicts"));
}

#[tokio::test]
async fn test_unreachable_cluster_records_connection_error() {
    let harness = TestHarness::new();
    harness.cluster.set_unreachable(true);

    let err = harness
        .orchestrator
        .sync(&harness.fabric.id, SyncTrigger::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cluster(_)));
    assert_eq!(err.kind(), ErrorKind::TransientNetwork);

    let fabric = harness.reload_fabric();
    assert!(fabric.connection_error.is_some());
    assert!(fabric.last_sync.is_none());
    assert!(fabric.last_sync_attempt.is_some());
    assert_eq!(
        calculate_sync_status(&fabric, chrono::Utc::now()),
        CalculatedSyncStatus::Error
    );

    // a later successful pass clears the error
    harness.cluster.set_unreachable(false);
    harness.sync().await;
    assert!(harness.reload_fabric().connection_error.is_none());
}

#[tokio::test]
async fn test_rejected_apply_is_partial() {
    let harness = TestHarness::new();
    harness.cluster.reject_kind("VPC");
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));

    let op = harness.sync().await;

    assert_eq!(op.outcome, SyncOutcome::Partial);
    assert_eq!(op.counts.apply_failures, 1);
    let resource = harness.resource(&vpc_key("vpc-1"));
    assert_eq!(resource.reconciliation_attempts, 1);
    assert!(resource.last_error.is_some());
    assert_eq!(resource.drift_status, DriftStatus::Major);
}

#[tokio::test]
async fn test_validate_only_touches_nothing() {
    let harness = TestHarness::new();
    harness.sync().await;
    harness.write_raw("vpc.yaml", &vpc_yaml("vpc-1", "10.0.1.0/24"));
    let before = harness.snapshot();

    let report = harness.orchestrator.validate_only(&harness.fabric.id).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.documents_found, 1);
    assert_eq!(harness.snapshot(), before);
    assert!(harness.registry().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_connection_test_is_recorded() {
    let harness = TestHarness::new();
    let version = harness
        .orchestrator
        .test_connection(&harness.fabric.id)
        .await
        .unwrap();
    assert_eq!(version, "in-memory");

    harness.cluster.set_unreachable(true);
    assert!(harness.orchestrator.test_connection(&harness.fabric.id).await.is_err());
    assert!(harness.reload_fabric().connection_error.is_some());
}

#[tokio::test]
async fn test_operation_history_is_pruned() {
    let mut config = test_config();
    config.registry.operation_history_limit = 2;
    let harness = TestHarness::build(ConflictStrategy::MostRecentWins, config);

    for _ in 0..4 {
        harness.sync().await;
    }

    let history = operation_repo::list(harness.db(), &harness.fabric.id, 10).unwrap();
    assert_eq!(history.len(), 2);
}
