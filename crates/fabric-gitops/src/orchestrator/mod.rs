//! Sync Orchestrator: runs one full reconciliation pass for a fabric.
//!
//! A pass pulls the working copy, ingests `raw/`, refreshes the registry
//! from `managed/`, fetches the tracked kinds from the cluster, then acts on
//! each resource: apply Git to the cluster, write the cluster back to Git,
//! or leave it. Drift is recomputed afterwards and cluster-originated
//! changes are committed in a single commit.
//!
//! The cluster is fetched before anything is applied so that an edit made
//! in the cluster since the last pass is seen before Git could overwrite it.

mod guard;
pub mod reconcile;

pub use guard::{InFlightSet, SyncPermit};
pub use reconcile::{decide, Action};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, Instrument};

use crate::cluster::{
    ApplyOutcome, ClusterApi, ClusterConnector, ClusterError, ClusterSyncClient, KindRegistry,
    RestConnector,
};
use crate::config::EngineConfig;
use crate::conflict::{ConflictOutcome, ConflictRecord};
use crate::drift::{calculate_sync_status, detect_drift, summarize, CalculatedSyncStatus, DriftSummary};
use crate::error::{Result, SyncError};
use crate::events::{SyncEvent, SyncEventBroadcaster, SyncPhase};
use crate::gitops::layout::write_atomic;
use crate::gitops::provenance::append_archive_log;
use crate::gitops::{
    ArchiveLogEntry, GitDirectoryManager, GitOpsError, ManifestEntry, MoveAction, ProcessingLock,
    ProvenanceManifest,
};
use crate::ingest::{validate_document, IngestError, IngestionEngine, IngestionReport, KnownResource};
use crate::model::{
    content_hash, ConflictStatus, Document, DriftStatus, Fabric, ManagedResource, Origin,
    Provenance, ResourceKey, SyncOperation, SyncOutcome, SyncTrigger,
};
use crate::registry::{conflict_repo, fabric_repo, operation_repo, Database, ResourceRegistry};

/// `source` recorded on managed files written from the cluster.
const CLUSTER_SOURCE: &str = "cluster";

/// What a host shows for a fabric.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricStatus {
    pub fabric_id: String,
    pub name: String,
    pub status: CalculatedSyncStatus,
    pub display_name: &'static str,
    pub syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub drift: DriftSummary,
    pub open_conflicts: usize,
}

/// Everything a pass needs, resolved before anything is touched.
struct SyncContext {
    fabric: Fabric,
    manager: GitDirectoryManager,
    client: ClusterSyncClient,
    registry: ResourceRegistry,
}

pub struct SyncOrchestrator {
    db: Database,
    config: EngineConfig,
    connector: Arc<dyn ClusterConnector>,
    kinds: KindRegistry,
    events: SyncEventBroadcaster,
    in_flight: InFlightSet,
}

impl SyncOrchestrator {
    pub fn new(db: Database, config: EngineConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        let kinds = KindRegistry::builtin().with_extra(&config.cluster.kinds);
        Self {
            db,
            config,
            connector,
            kinds,
            events: SyncEventBroadcaster::default(),
            in_flight: InFlightSet::new(),
        }
    }

    /// Talks to each fabric's own endpoint over HTTPS.
    pub fn with_rest(db: Database, config: EngineConfig) -> Self {
        let connector = Arc::new(RestConnector::new(&config.cluster));
        Self::new(db, config, connector)
    }

    pub fn with_events(mut self, events: SyncEventBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &SyncEventBroadcaster {
        &self.events
    }

    pub fn is_syncing(&self, fabric_id: &str) -> bool {
        self.in_flight.contains(fabric_id)
    }

    /// Marks a fabric as syncing ahead of the pass itself, so a scheduler
    /// can hold the marker while the job waits in its queue.
    pub fn try_reserve(&self, fabric_id: &str) -> Option<SyncPermit> {
        self.in_flight.try_acquire(fabric_id)
    }

    /// Runs a pass now. A fabric that is already syncing is refused with
    /// [`SyncError::Concurrency`]; the request is not queued.
    pub async fn sync(&self, fabric_id: &str, trigger: SyncTrigger) -> Result<SyncOperation> {
        let Some(permit) = self.try_reserve(fabric_id) else {
            info!("Skipping {} sync of {}: already syncing", trigger, fabric_id);
            self.events.skipped(fabric_id, "already syncing");
            return Err(SyncError::Concurrency(fabric_id.to_string()));
        };
        self.sync_reserved(permit, trigger).await
    }

    /// Runs a pass under a marker obtained from [`Self::try_reserve`]. The
    /// marker is released when the pass ends, whatever the outcome.
    pub async fn sync_reserved(&self, permit: SyncPermit, trigger: SyncTrigger) -> Result<SyncOperation> {
        let fabric_id = permit.fabric_id().to_string();
        let span = info_span!("sync", fabric_id = %fabric_id, trigger = %trigger);
        let result = self.run(&fabric_id, trigger).instrument(span).await;
        drop(permit);
        result
    }

    async fn run(&self, fabric_id: &str, trigger: SyncTrigger) -> Result<SyncOperation> {
        let fabric = self.fabric(fabric_id)?;
        let mut op = SyncOperation::begin(fabric_id, trigger);

        let ctx = match self.context(fabric) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Sync of {} not started: {}", fabric_id, e);
                self.record_failure(&mut op, &e);
                return Err(e);
            }
        };

        fabric_repo::record_attempt(&self.db, fabric_id, op.started_at)?;
        self.events.send(SyncEvent::Started {
            fabric_id: fabric_id.to_string(),
            trigger,
            at: op.started_at,
        });
        info!("Starting {} sync of fabric '{}'", trigger, ctx.fabric.name);

        if let Err(e) = self.pass(&ctx, &mut op).await {
            error!("Sync of fabric '{}' failed: {}", ctx.fabric.name, e);
            self.record_failure(&mut op, &e);
            return Err(e);
        }

        op.finish();
        fabric_repo::record_success(&self.db, fabric_id, op.finished_at)?;
        self.store_operation(&op);
        info!(
            "Sync of fabric '{}' {}: {} applied, {} written back, {} conflicts",
            ctx.fabric.name,
            op.outcome.as_str(),
            op.counts.applied,
            op.counts.written_back,
            op.counts.conflicts
        );
        self.events.send(SyncEvent::Completed {
            fabric_id: fabric_id.to_string(),
            outcome: op.outcome,
            counts: op.counts.clone(),
            at: op.finished_at,
        });
        Ok(op)
    }

    /// Configuration problems surface here, before the tree, the registry
    /// or the cluster is touched.
    fn context(&self, fabric: Fabric) -> Result<SyncContext> {
        if !fabric.has_endpoint() {
            return Err(SyncError::Configuration(format!(
                "fabric '{}' has no cluster endpoint",
                fabric.name
            )));
        }
        let repository = fabric.git.as_ref().ok_or_else(|| {
            SyncError::Configuration(format!("fabric '{}' has no Git repository", fabric.name))
        })?;

        let manager = GitDirectoryManager::new(&self.config.git, repository);
        let api = self.connector.connect(&fabric)?;
        let client = self.client(&fabric, api);
        let registry = ResourceRegistry::new(self.db.clone(), &fabric.id);

        Ok(SyncContext {
            fabric,
            manager,
            client,
            registry,
        })
    }

    fn client(&self, fabric: &Fabric, api: Arc<dyn ClusterApi>) -> ClusterSyncClient {
        ClusterSyncClient::new(
            api,
            self.kinds.clone(),
            &fabric.cluster.namespaces,
            &self.config.ingestion.default_namespace,
        )
        .with_config(&self.config.cluster)
    }

    async fn pass(&self, ctx: &SyncContext, op: &mut SyncOperation) -> Result<()> {
        let fabric_id = ctx.fabric.id.as_str();

        self.events.phase(fabric_id, SyncPhase::Pull, "Pulling upstream changes");
        let created = ctx.manager.prepare().instrument(info_span!("prepare")).await?;
        let pull = ctx.manager.pull().instrument(info_span!("pull")).await?;
        debug!("Pull: {} file(s) changed", pull.files_changed);

        self.events.phase(fabric_id, SyncPhase::Ingest, "Ingesting raw files");
        let report = info_span!("ingest").in_scope(|| self.ingest(ctx, op))?;
        info_span!("refresh_desired").in_scope(|| self.refresh_desired(ctx, op, &report))?;

        self.events.phase(fabric_id, SyncPhase::Fetch, "Fetching cluster state");
        self.fetch(ctx, op).instrument(info_span!("fetch")).await?;

        self.events.phase(fabric_id, SyncPhase::Apply, "Reconciling resources");
        let written = self.reconcile(ctx, op).instrument(info_span!("reconcile")).await?;

        let ahead = if ctx.manager.has_remote() {
            ctx.manager.status().map(|s| s.ahead).unwrap_or(0)
        } else {
            0
        };
        if !created.is_empty() || report.has_changes() || written > 0 || ahead > 0 {
            self.events.phase(fabric_id, SyncPhase::Commit, "Committing changes");
            let message = if written > 0 {
                format!("sync: {} resources updated from cluster", written)
            } else {
                format!("ingest: {} raw files processed", report.files_processed)
            };
            let layout = ctx.manager.layout();
            let result = ctx
                .manager
                .commit(&layout.tracked_paths(), &message)
                .instrument(info_span!("commit"))
                .await?;
            if let Some(hash) = &result.commit_hash {
                info!("Committed {} ({})", hash, message);
            }
        }

        Ok(())
    }

    fn ingest(&self, ctx: &SyncContext, op: &mut SyncOperation) -> Result<IngestionReport> {
        let known = known_resources(&ctx.registry)?;
        let engine = IngestionEngine::new(
            ctx.manager.layout().clone(),
            &self.config.ingestion,
            ctx.fabric.conflict_strategy,
        );
        let report = engine.ingest(&known)?;

        op.counts.files_processed += report.files_processed;
        op.counts.moved_to_managed += report.moved_to_managed;
        op.counts.moved_to_unmanaged += report.moved_to_unmanaged;
        op.counts.conflicts += report.conflicts.len();
        for e in &report.errors {
            op.record_error(e.clone());
        }
        for record in &report.conflicts {
            conflict_repo::record(&self.db, &ctx.fabric.id, record)?;
        }
        Ok(report)
    }

    /// Brings the Git side of the registry in line with `managed/`.
    fn refresh_desired(
        &self,
        ctx: &SyncContext,
        op: &mut SyncOperation,
        report: &IngestionReport,
    ) -> Result<()> {
        let default_namespace = &self.config.ingestion.default_namespace;
        let (files, unreadable) = ctx.manager.layout().read_managed()?;
        let written: HashSet<&str> = report.written.iter().map(String::as_str).collect();

        let mut present = HashSet::new();
        for file in files {
            let document = file.document.normalized(default_namespace);
            let key = document.key(default_namespace);
            ctx.registry
                .update_desired(&key, &document, &file.relative_path, &file.file_hash)?;
            if written.contains(file.relative_path.as_str()) {
                op.counts.kind_mut(&key.kind).ingested += 1;
            }
            present.insert(key);
        }

        // a managed file that stopped parsing is not a deletion
        let unreadable: HashSet<String> = unreadable
            .into_iter()
            .map(|bad| {
                op.record_error(format!("{}: {}", bad.relative_path, bad.message));
                bad.relative_path
            })
            .collect();
        for resource in ctx.registry.list()? {
            let kept = resource
                .managed_file_path
                .as_ref()
                .is_some_and(|p| unreadable.contains(p));
            if resource.desired_spec.is_some() && !present.contains(&resource.key) && !kept {
                debug!("{} left managed/", resource.key);
                ctx.registry.clear_desired(&resource.key)?;
            }
        }

        for record in &report.conflicts {
            if let Some(resource) = ctx.registry.find(&record.key)? {
                let status = if record.outcome.is_open() {
                    ConflictStatus::Conflict
                } else {
                    ConflictStatus::Resolved
                };
                ctx.registry.set_conflict(&resource.id, status)?;
            }
        }
        Ok(())
    }

    /// Fetches every tracked kind concurrently. A kind that fails to fetch
    /// keeps its previous cluster state in the registry; the pass only
    /// fails when no kind could be fetched at all.
    async fn fetch(&self, ctx: &SyncContext, op: &mut SyncOperation) -> Result<()> {
        let default_namespace = &self.config.ingestion.default_namespace;
        let kinds = if ctx.fabric.tracked_kinds.is_empty() {
            self.kinds.kinds()
        } else {
            ctx.fabric.tracked_kinds.clone()
        };

        let results = join_all(kinds.iter().map(|kind| async move {
            (kind.as_str(), ctx.client.fetch(kind).await)
        }))
        .await;

        let mut fetched_kinds = HashSet::new();
        let mut seen = HashSet::new();
        let mut first_failure: Option<ClusterError> = None;
        for (kind, result) in results {
            match result {
                Ok(fetched) => {
                    fetched_kinds.insert(kind.to_string());
                    op.counts.fetched += fetched.len();
                    op.counts.kind_mut(kind).fetched += fetched.len();
                    for item in fetched {
                        let key = item.document.key(default_namespace);
                        ctx.registry
                            .update_actual(&key, &item.document, item.version.as_deref())?;
                        seen.insert(key);
                    }
                }
                Err(e) => {
                    warn!("Failed to fetch {}: {}", kind, e);
                    op.record_error(format!("fetch {}: {}", kind, e));
                    first_failure.get_or_insert(e);
                }
            }
        }

        if fetched_kinds.is_empty() {
            if let Some(e) = first_failure {
                return Err(e.into());
            }
        }

        let namespaces: HashSet<&str> = ctx.client.namespaces().iter().map(String::as_str).collect();
        for resource in ctx.registry.list()? {
            let covered = fetched_kinds.contains(&resource.key.kind)
                && namespaces.contains(resource.key.namespace.as_str());
            if covered && resource.actual_spec.is_some() && !seen.contains(&resource.key) {
                debug!("{} left the cluster", resource.key);
                ctx.registry.clear_actual(&resource.key)?;
            }
        }
        Ok(())
    }

    /// Acts on every resource not held by a conflict, then recomputes
    /// drift. Returns how many managed files were written from the cluster.
    async fn reconcile(&self, ctx: &SyncContext, op: &mut SyncOperation) -> Result<usize> {
        let blocked: HashSet<ResourceKey> = conflict_repo::list_open(&self.db, &ctx.fabric.id)?
            .into_iter()
            .map(|c| c.record.key)
            .collect();

        let mut write_backs = Vec::new();
        for resource in ctx.registry.list()? {
            if blocked.contains(&resource.key) || resource.conflict_status == ConflictStatus::Conflict {
                debug!("{} waits for a manual decision", resource.key);
                continue;
            }
            let action = decide(&resource);
            debug!("{}: {}", resource.key, action.as_str());
            match action {
                Action::Noop | Action::Detached => {}
                Action::Converged => ctx.registry.mark_synced(&resource)?,
                Action::Apply => self.apply(ctx, op, &resource).await?,
                Action::WriteBack { conflict } => write_backs.push((resource, conflict)),
                Action::Orphan => ctx.registry.mark_absent(&resource.id, Utc::now())?,
            }
        }

        let written = if write_backs.is_empty() {
            0
        } else {
            self.events
                .phase(&ctx.fabric.id, SyncPhase::Reconcile, "Writing cluster changes to Git");
            self.write_back(ctx, op, &write_backs)?
        };

        for resource in ctx.registry.list()? {
            if resource.is_orphan() {
                continue;
            }
            let drift = detect_drift(resource.desired_spec.as_ref(), resource.actual_spec.as_ref());
            if drift.status != DriftStatus::None {
                op.counts.kind_mut(&resource.key.kind).drifted += 1;
            }
            ctx.registry.set_drift(&resource.id, drift.status, drift.score)?;
        }

        let grace = ChronoDuration::seconds(self.config.registry.orphan_grace_secs as i64);
        op.counts.orphans_removed += ctx.registry.purge_orphans(Utc::now() - grace)?;
        Ok(written)
    }

    async fn apply(&self, ctx: &SyncContext, op: &mut SyncOperation, resource: &ManagedResource) -> Result<()> {
        let Some(desired) = &resource.desired_spec else {
            return Ok(());
        };

        match ctx.client.apply(desired).await {
            Ok(applied) => {
                if applied.outcome != ApplyOutcome::Unchanged {
                    op.counts.applied += 1;
                    op.counts.kind_mut(&resource.key.kind).applied += 1;
                }
                let (updated, _) =
                    ctx.registry
                        .update_actual(&resource.key, desired, applied.version.as_deref())?;
                ctx.registry.mark_synced(&updated)?;
            }
            Err(e) => {
                warn!("Failed to apply {}: {}", resource.key, e);
                op.counts.apply_failures += 1;
                op.record_error(format!("apply {}: {}", resource.key, e));
                ctx.registry.record_attempt(&resource.id, Some(&e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Writes cluster documents into `managed/` under the processing lock.
    fn write_back(
        &self,
        ctx: &SyncContext,
        op: &mut SyncOperation,
        items: &[(ManagedResource, bool)],
    ) -> Result<usize> {
        let layout = ctx.manager.layout();
        let lock = ProcessingLock::acquire(
            layout,
            Duration::from_secs(self.config.ingestion.lock_timeout_secs),
        )?;
        let mut manifest = ProvenanceManifest::load(layout)?;
        let mut log = Vec::new();
        let now = Utc::now();
        let provenance = Provenance {
            origin: Origin::Cluster,
            source: CLUSTER_SOURCE.to_string(),
            ingested_at: now,
        };

        let mut written = 0;
        for (resource, conflict) in items {
            let Some(actual) = &resource.actual_spec else {
                continue;
            };
            let path = resource
                .managed_file_path
                .clone()
                .unwrap_or_else(|| layout.managed_relative_path(&resource.key));
            let document = actual.clone().with_provenance(&provenance);

            let result = document.to_yaml().map_err(GitOpsError::from).and_then(|yaml| {
                write_atomic(&layout.absolute(&path), yaml.as_bytes())?;
                Ok(content_hash(yaml.as_bytes()))
            });
            let file_hash = match result {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Failed to write back {}: {}", resource.key, e);
                    op.record_error(format!("write back {}: {}", resource.key, e));
                    ctx.registry.record_attempt(&resource.id, Some(&e.to_string()))?;
                    continue;
                }
            };

            manifest.record(
                &path,
                ManifestEntry::new(&resource.key, Origin::Cluster, CLUSTER_SOURCE, &document.fingerprint()),
            );
            log.push(ArchiveLogEntry::new(MoveAction::WrittenBack, None, &path));
            let (updated, _) = ctx.registry.update_desired(&resource.key, actual, &path, &file_hash)?;
            ctx.registry.mark_synced(&updated)?;

            written += 1;
            op.counts.written_back += 1;
            op.counts.files_written += 1;
            op.counts.kind_mut(&resource.key.kind).written_back += 1;

            if *conflict {
                info!("{} changed on both sides; the cluster version was kept", resource.key);
                let record = ConflictRecord {
                    key: resource.key.clone(),
                    strategy: ctx.fabric.conflict_strategy,
                    outcome: ConflictOutcome::ClusterWins,
                    sources: vec![path.clone(), CLUSTER_SOURCE.to_string()],
                    detected_at: now,
                };
                conflict_repo::record(&self.db, &ctx.fabric.id, &record)?;
                ctx.registry.set_conflict(&resource.id, ConflictStatus::Conflict)?;
                op.counts.conflicts += 1;
            }
        }

        manifest.save_if_changed(layout)?;
        append_archive_log(layout, &log)?;
        lock.release()?;
        Ok(written)
    }

    fn record_failure(&self, op: &mut SyncOperation, error: &SyncError) {
        let message = error.to_string();
        op.fail(&message);
        if let SyncError::Ingest(IngestError::ExcessiveConflicts(e)) = error {
            op.outcome = SyncOutcome::Aborted;
            op.message = Some(e.to_string());
        }
        op.finish();

        let connection = matches!(error, SyncError::Cluster(_));
        if let Err(e) = fabric_repo::record_failure(&self.db, &op.fabric_id, op.finished_at, &message, connection) {
            error!("Failed to record sync failure for {}: {}", op.fabric_id, e);
        }
        self.store_operation(op);
        self.events.send(SyncEvent::Failed {
            fabric_id: op.fabric_id.clone(),
            error: op.message.clone().unwrap_or(message),
            at: op.finished_at,
        });
    }

    fn store_operation(&self, op: &SyncOperation) {
        let stored = operation_repo::record(&self.db, op).and_then(|()| {
            operation_repo::prune(&self.db, &op.fabric_id, self.config.registry.operation_history_limit)
        });
        if let Err(e) = stored {
            error!("Failed to store sync operation {}: {}", op.id, e);
        }
    }

    fn fabric(&self, fabric_id: &str) -> Result<Fabric> {
        fabric_repo::find(&self.db, fabric_id)?
            .ok_or_else(|| SyncError::UnknownFabric(fabric_id.to_string()))
    }

    /// Checks the fabric's cluster endpoint. Read-only apart from the
    /// fabric's `connection_error`.
    pub async fn test_connection(&self, fabric_id: &str) -> Result<String> {
        let fabric = self.fabric(fabric_id)?;
        let result = match self.connector.connect(&fabric) {
            Ok(api) => self.client(&fabric, api).test_connection().await,
            Err(e) => Err(e),
        };

        let error = result.as_ref().err().map(|e| e.to_string());
        fabric_repo::record_connection(&self.db, fabric_id, error.as_deref())?;
        match &result {
            Ok(version) => info!("Fabric '{}' reachable, server {}", fabric.name, version),
            Err(e) => warn!("Fabric '{}' unreachable: {}", fabric.name, e),
        }
        Ok(result?)
    }

    /// Reports what ingesting `raw/` would do, without the lock and without
    /// touching the tree or the registry.
    pub fn validate_only(&self, fabric_id: &str) -> Result<IngestionReport> {
        let fabric = self.fabric(fabric_id)?;
        let repository = fabric.git.as_ref().ok_or_else(|| {
            SyncError::Configuration(format!("fabric '{}' has no Git repository", fabric.name))
        })?;
        let manager = GitDirectoryManager::new(&self.config.git, repository);
        let registry = ResourceRegistry::new(self.db.clone(), fabric_id);
        let engine = IngestionEngine::new(
            manager.layout().clone(),
            &self.config.ingestion,
            fabric.conflict_strategy,
        );
        Ok(engine.validate_only(&known_resources(&registry)?)?)
    }

    /// Settles a resource left in `conflict`. With a document, that
    /// document becomes the managed file and is committed; without one the
    /// current managed file stands. Either way the open records for the
    /// key are closed and the next pass reconciles the resource again.
    pub async fn resolve_manual(
        &self,
        fabric_id: &str,
        key: &ResourceKey,
        document: Option<Document>,
    ) -> Result<()> {
        let permit = self
            .try_reserve(fabric_id)
            .ok_or_else(|| SyncError::Concurrency(fabric_id.to_string()))?;
        let fabric = self.fabric(fabric_id)?;
        let registry = ResourceRegistry::new(self.db.clone(), fabric_id);
        let default_namespace = &self.config.ingestion.default_namespace;

        let existing = registry.find(key)?;
        let has_open = conflict_repo::list_open(&self.db, fabric_id)?
            .iter()
            .any(|c| &c.record.key == key);
        let flagged = existing
            .as_ref()
            .is_some_and(|r| r.conflict_status == ConflictStatus::Conflict);
        if !has_open && !flagged {
            return Err(SyncError::Conflict(format!("no open conflict for {}", key)));
        }

        let mut resolution = "kept_existing";
        if let Some(document) = document {
            let document = validate_document(&document.to_value(), &self.config.ingestion.recognized_groups)
                .map_err(|r| SyncError::Validation(r.message))?
                .normalized(default_namespace);
            if &document.key(default_namespace) != key {
                return Err(SyncError::Validation(format!(
                    "document is {}, expected {}",
                    document.key(default_namespace),
                    key
                )));
            }
            let repository = fabric.git.as_ref().ok_or_else(|| {
                SyncError::Configuration(format!("fabric '{}' has no Git repository", fabric.name))
            })?;
            let manager = GitDirectoryManager::new(&self.config.git, repository);
            let path = existing
                .as_ref()
                .and_then(|r| r.managed_file_path.clone())
                .unwrap_or_else(|| manager.layout().managed_relative_path(key));
            let file_hash = self.write_resolution(&manager, key, &document, &path)?;
            registry.update_desired(key, &document, &path, &file_hash)?;
            manager
                .commit(&manager.layout().tracked_paths(), &format!("resolve: {}", key))
                .await?;
            resolution = "manual";
        }

        let closed = conflict_repo::resolve(&self.db, fabric_id, key, resolution)?;
        if let Some(resource) = registry.find(key)? {
            registry.set_conflict(&resource.id, ConflictStatus::Resolved)?;
        }
        info!("Resolved {} ({}), closed {} record(s)", key, resolution, closed);
        drop(permit);
        Ok(())
    }

    fn write_resolution(
        &self,
        manager: &GitDirectoryManager,
        key: &ResourceKey,
        document: &Document,
        path: &str,
    ) -> Result<String> {
        let layout = manager.layout();
        let lock = ProcessingLock::acquire(
            layout,
            Duration::from_secs(self.config.ingestion.lock_timeout_secs),
        )?;
        let provenance = Provenance {
            origin: Origin::Git,
            source: "manual".to_string(),
            ingested_at: Utc::now(),
        };
        let written = document.clone().with_provenance(&provenance);
        let yaml = written.to_yaml().map_err(GitOpsError::from)?;
        write_atomic(&layout.absolute(path), yaml.as_bytes())?;

        let mut manifest = ProvenanceManifest::load(layout)?;
        manifest.record(
            path,
            ManifestEntry::new(key, Origin::Git, "manual", &written.fingerprint()),
        );
        manifest.save_if_changed(layout)?;
        append_archive_log(
            layout,
            &[ArchiveLogEntry::new(MoveAction::Managed, None, path).with_reason("manual_resolution")],
        )?;
        lock.release()?;
        Ok(content_hash(yaml.as_bytes()))
    }

    /// Status surface for one fabric.
    pub fn status(&self, fabric_id: &str, now: DateTime<Utc>) -> Result<FabricStatus> {
        let fabric = self.fabric(fabric_id)?;
        let resources = ResourceRegistry::new(self.db.clone(), fabric_id).list()?;
        let open_conflicts = conflict_repo::list_open(&self.db, fabric_id)?.len();
        let status = calculate_sync_status(&fabric, now);
        Ok(FabricStatus {
            fabric_id: fabric.id.clone(),
            name: fabric.name.clone(),
            status,
            display_name: status.display_name(),
            syncing: self.is_syncing(fabric_id),
            last_sync: fabric.last_sync,
            error: non_blank(&fabric.connection_error).or_else(|| non_blank(&fabric.sync_error)),
            drift: summarize(&resources),
            open_conflicts,
        })
    }
}

fn non_blank(error: &Option<String>) -> Option<String> {
    error.as_deref().filter(|e| !e.trim().is_empty()).map(str::to_string)
}

/// Registry view handed to ingestion.
fn known_resources(registry: &ResourceRegistry) -> Result<HashMap<ResourceKey, KnownResource>> {
    Ok(registry
        .list()?
        .into_iter()
        .map(|r| {
            (
                r.key,
                KnownResource {
                    file_hash: r.file_hash,
                    desired: r.desired_spec,
                },
            )
        })
        .collect())
}
