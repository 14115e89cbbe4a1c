use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::error::{IngestError, Result};
use super::parser::parse_stream;
use super::scanner::{scan, RawFile};
use super::validate::{validate_document, RejectReason, Rejection};
use crate::config::IngestionConfig;
use crate::conflict::{
    Candidate, ConflictRecord, ConflictResolver, ConflictStrategy, ManagedState, Resolution,
};
use crate::gitops::layout::{move_file, write_atomic, ARCHIVED_SUFFIX, REASON_SUFFIX, UNMANAGED_DIR};
use crate::gitops::provenance::append_archive_log;
use crate::gitops::{
    ArchiveLogEntry, FabricLayout, GitOpsError, ManifestEntry, MoveAction, ProcessingLock,
    ProvenanceManifest,
};
use crate::model::{Document, Origin, Provenance, ResourceKey};
use crate::sanitize::path_component;

/// What the registry last recorded for a managed resource. Lets the engine
/// tell a hand-edited managed file from one it wrote itself.
#[derive(Debug, Clone, Default)]
pub struct KnownResource {
    pub file_hash: Option<String>,
    pub desired: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionSummary {
    pub source: String,
    pub document_index: Option<usize>,
    pub reason: RejectReason,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    /// Nothing on disk was touched.
    pub dry_run: bool,
    pub files_processed: usize,
    pub documents_found: usize,
    pub moved_to_managed: usize,
    pub moved_to_unmanaged: usize,
    pub documents_rejected: usize,
    pub archived: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub rejections: Vec<RejectionSummary>,
    /// Managed files written, relative to the fabric root.
    pub written: Vec<String>,
    pub errors: Vec<String>,
    /// Set when the batch was abandoned before any change was made.
    pub aborted: Option<String>,
}

impl IngestionReport {
    pub fn has_changes(&self) -> bool {
        !self.written.is_empty() || self.moved_to_unmanaged > 0 || self.archived > 0
    }
}

/// Contents of the `.reason` sidecar next to everything in `unmanaged/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRecord {
    pub reason: RejectReason,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_index: Option<usize>,
    pub at: DateTime<Utc>,
}

/// A single document that cannot be managed.
struct RejectedDocument {
    source: String,
    stem: String,
    index: usize,
    value: Value,
    rejection: Rejection,
}

enum Disposition {
    /// Parsed; valid documents became candidates, the file gets archived.
    Archive,
    /// The whole file goes to `unmanaged/`.
    Unmanage(Rejection),
}

struct FilePlan {
    file: RawFile,
    disposition: Disposition,
}

struct ManagedWrite {
    key: ResourceKey,
    path: String,
    document: Document,
    source: String,
}

#[derive(Default)]
struct Plan {
    files: Vec<FilePlan>,
    documents_found: usize,
    writes: Vec<ManagedWrite>,
    rejected: Vec<RejectedDocument>,
    conflicts: Vec<ConflictRecord>,
    errors: Vec<String>,
}

impl Plan {
    fn report(&self, dry_run: bool) -> IngestionReport {
        let whole_files = self
            .files
            .iter()
            .filter(|f| matches!(f.disposition, Disposition::Unmanage(_)))
            .count();

        let mut rejections: Vec<RejectionSummary> = self
            .files
            .iter()
            .filter_map(|f| match &f.disposition {
                Disposition::Unmanage(r) => Some(RejectionSummary {
                    source: f.file.relative_path.clone(),
                    document_index: None,
                    reason: r.reason,
                    message: r.message.clone(),
                }),
                Disposition::Archive => None,
            })
            .collect();
        rejections.extend(self.rejected.iter().map(|d| RejectionSummary {
            source: d.source.clone(),
            document_index: Some(d.index),
            reason: d.rejection.reason,
            message: d.rejection.message.clone(),
        }));

        IngestionReport {
            dry_run,
            files_processed: self.files.len(),
            documents_found: self.documents_found,
            moved_to_managed: self.writes.len(),
            moved_to_unmanaged: whole_files + self.rejected.len(),
            documents_rejected: self.rejected.len(),
            archived: self.files.len() - whole_files,
            conflicts: self.conflicts.clone(),
            rejections,
            written: Vec::new(),
            errors: self.errors.clone(),
            aborted: None,
        }
    }
}

/// File Ingestion Engine: turns whatever lands in `raw/` into one
/// normalized file per resource under `managed/`.
pub struct IngestionEngine {
    layout: FabricLayout,
    config: IngestionConfig,
    resolver: ConflictResolver,
}

impl IngestionEngine {
    pub fn new(layout: FabricLayout, config: &IngestionConfig, strategy: ConflictStrategy) -> Self {
        Self {
            resolver: ConflictResolver::new(
                strategy,
                config.conflict_threshold,
                &config.default_namespace,
            ),
            layout,
            config: config.clone(),
        }
    }

    pub fn layout(&self) -> &FabricLayout {
        &self.layout
    }

    /// Processes the inbox under the processing lock. Either the whole
    /// batch is applied or, when it carries too many identity conflicts,
    /// nothing is and [`IngestError::ExcessiveConflicts`] is returned.
    pub fn ingest(&self, known: &HashMap<ResourceKey, KnownResource>) -> Result<IngestionReport> {
        let lock = ProcessingLock::acquire(
            &self.layout,
            Duration::from_secs(self.config.lock_timeout_secs),
        )?;

        let plan = self.plan(known)?;
        let report = self.execute(plan)?;

        lock.release()?;

        info!(
            "Ingested {} raw files: {} managed writes, {} unmanaged, {} conflicts",
            report.files_processed,
            report.written.len(),
            report.moved_to_unmanaged,
            report.conflicts.len()
        );
        Ok(report)
    }

    /// Runs scan, parse, validation and conflict detection without the
    /// lock and without touching the tree.
    pub fn validate_only(
        &self,
        known: &HashMap<ResourceKey, KnownResource>,
    ) -> Result<IngestionReport> {
        match self.plan(known) {
            Ok(plan) => Ok(plan.report(true)),
            Err(IngestError::ExcessiveConflicts(e)) => Ok(IngestionReport {
                dry_run: true,
                aborted: Some(e.to_string()),
                ..IngestionReport::default()
            }),
            Err(e) => Err(e),
        }
    }

    fn plan(&self, known: &HashMap<ResourceKey, KnownResource>) -> Result<Plan> {
        let mut plan = Plan::default();
        let mut candidates = Vec::new();
        // candidate sequence -> (file index, document index)
        let mut origins = Vec::new();

        for raw in scan(&self.layout)? {
            let content = match fs::read(&raw.path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    // left in place for the next pass
                    warn!("Cannot read {}: {}", raw.relative_path, e);
                    plan.errors.push(format!("{}: {}", raw.relative_path, e));
                    continue;
                }
            };

            let parsed = String::from_utf8(content)
                .map_err(|e| e.to_string())
                .and_then(|text| parse_stream(&text));
            let values = match parsed {
                Ok(values) => values,
                Err(message) => {
                    debug!("{} is not valid YAML: {}", raw.relative_path, message);
                    plan.files.push(FilePlan {
                        file: raw,
                        disposition: Disposition::Unmanage(Rejection {
                            reason: RejectReason::InvalidYaml,
                            message,
                        }),
                    });
                    continue;
                }
            };

            let file_index = plan.files.len();
            plan.documents_found += values.len();
            for (index, value) in values.into_iter().enumerate() {
                match validate_document(&value, &self.config.recognized_groups) {
                    Ok(document) => {
                        let document = document.normalized(&self.config.default_namespace);
                        origins.push((file_index, index));
                        candidates.push(Candidate {
                            key: document.key(&self.config.default_namespace),
                            document,
                            source: raw.relative_path.clone(),
                            timestamp: raw.modified,
                            sequence: candidates.len(),
                        });
                    }
                    Err(rejection) => {
                        debug!(
                            "Rejected document {} of {}: {}",
                            index, raw.relative_path, rejection.message
                        );
                        plan.rejected.push(RejectedDocument {
                            source: raw.relative_path.clone(),
                            stem: file_stem(&raw.path),
                            index,
                            value,
                            rejection,
                        });
                    }
                }
            }
            plan.files.push(FilePlan {
                file: raw,
                disposition: Disposition::Archive,
            });
        }

        let managed = self.managed_states(known, &mut plan.errors)?;
        let resolved = self.resolver.resolve(&candidates, &managed)?;

        for resolved_key in resolved {
            if let Some(record) = resolved_key.record {
                plan.conflicts.push(record);
            }

            match resolved_key.resolution {
                Resolution::Accept { document, source } => {
                    let existing = managed.get(&resolved_key.key);
                    if existing.is_some_and(|s| s.document.fingerprint() == document.fingerprint()) {
                        continue;
                    }
                    let path = existing
                        .map(|s| s.path.clone())
                        .unwrap_or_else(|| self.layout.managed_relative_path(&resolved_key.key));
                    plan.writes.push(ManagedWrite {
                        key: resolved_key.key,
                        path,
                        document,
                        source,
                    });
                }
                Resolution::KeepExisting => {}
                Resolution::Pending => {
                    // contenders are parked in unmanaged/ until a decision is made
                    for candidate in candidates.iter().filter(|c| c.key == resolved_key.key) {
                        let (file_index, index) = origins[candidate.sequence];
                        plan.rejected.push(RejectedDocument {
                            source: candidate.source.clone(),
                            stem: file_stem(&plan.files[file_index].file.path),
                            index,
                            value: candidate.document.to_value(),
                            rejection: Rejection {
                                reason: RejectReason::ConflictPending,
                                message: format!("{} waits for a manual decision", resolved_key.key),
                            },
                        });
                    }
                }
            }
        }

        Ok(plan)
    }

    fn managed_states(
        &self,
        known: &HashMap<ResourceKey, KnownResource>,
        errors: &mut Vec<String>,
    ) -> Result<HashMap<ResourceKey, ManagedState>> {
        let (files, broken) = self.layout.read_managed()?;
        errors.extend(
            broken
                .into_iter()
                .map(|b| format!("{}: {}", b.relative_path, b.message)),
        );

        let mut states = HashMap::new();
        for file in files {
            let key = file.document.key(&self.config.default_namespace);
            let record = known.get(&key);
            let state = ManagedState {
                dirty: record.map_or(true, |k| k.file_hash.as_deref() != Some(file.file_hash.as_str())),
                known: record.and_then(|k| k.desired.clone()),
                document: file.document,
                path: file.relative_path,
                modified: file.modified,
            };
            if let Some(previous) = states.insert(key.clone(), state) {
                warn!("{} is claimed by more than one managed file, ignoring {}", key, previous.path);
            }
        }
        Ok(states)
    }

    fn execute(&self, plan: Plan) -> Result<IngestionReport> {
        let mut report = plan.report(false);
        let mut log = Vec::new();
        let mut manifest = ProvenanceManifest::load(&self.layout)?;
        let mut failed_sources = HashSet::new();
        let now = Utc::now();

        for write in &plan.writes {
            let provenance = Provenance {
                origin: Origin::Git,
                source: write.source.clone(),
                ingested_at: now,
            };
            let document = write.document.clone().with_provenance(&provenance);
            let fingerprint = document.fingerprint();

            let result = document
                .to_yaml()
                .map_err(GitOpsError::from)
                .and_then(|yaml| write_atomic(&self.layout.absolute(&write.path), yaml.as_bytes()));
            match result {
                Ok(()) => {
                    manifest.record(
                        &write.path,
                        ManifestEntry::new(&write.key, Origin::Git, &write.source, &fingerprint),
                    );
                    log.push(ArchiveLogEntry::new(MoveAction::Managed, Some(&write.source), &write.path));
                    report.written.push(write.path.clone());
                }
                Err(e) => {
                    warn!("Failed to write {}: {}", write.path, e);
                    report.errors.push(format!("{}: {}", write.path, e));
                    failed_sources.extend(write.source.split('+').map(str::to_string));
                }
            }
        }
        report.moved_to_managed = report.written.len();

        for rejected in &plan.rejected {
            let target = self.unmanaged_target(&format!("{}-{}", rejected.stem, rejected.index), "yaml");
            let reason = ReasonRecord {
                reason: rejected.rejection.reason,
                message: rejected.rejection.message.clone(),
                source: rejected.source.clone(),
                document_index: Some(rejected.index),
                at: now,
            };
            let result = serde_yaml::to_string(&rejected.value)
                .map_err(GitOpsError::from)
                .and_then(|yaml| write_atomic(&self.layout.absolute(&target), yaml.as_bytes()))
                .and_then(|()| self.write_reason(&target, &reason));
            match result {
                Ok(()) => log.push(
                    ArchiveLogEntry::new(MoveAction::Unmanaged, Some(&rejected.source), &target)
                        .with_reason(rejected.rejection.reason.as_str()),
                ),
                Err(e) => {
                    report.errors.push(format!("{}: {}", rejected.source, e));
                    failed_sources.insert(rejected.source.clone());
                }
            }
        }

        for file_plan in &plan.files {
            let raw = &file_plan.file;
            if failed_sources.contains(&raw.relative_path) {
                if matches!(file_plan.disposition, Disposition::Archive) {
                    report.archived -= 1;
                }
                continue;
            }

            let result = match &file_plan.disposition {
                Disposition::Archive => self.archive(raw).map(|to| {
                    ArchiveLogEntry::new(MoveAction::Archived, Some(&raw.relative_path), &to)
                }),
                Disposition::Unmanage(rejection) => self.unmanage(raw, rejection, now).map(|to| {
                    ArchiveLogEntry::new(MoveAction::Unmanaged, Some(&raw.relative_path), &to)
                        .with_reason(rejection.reason.as_str())
                }),
            };
            match result {
                Ok(entry) => log.push(entry),
                Err(e) => {
                    warn!("Failed to move {}: {}", raw.relative_path, e);
                    report.errors.push(format!("{}: {}", raw.relative_path, e));
                }
            }
        }

        manifest.save_if_changed(&self.layout)?;
        append_archive_log(&self.layout, &log)?;

        Ok(report)
    }

    /// `raw/x.yaml` becomes `raw/x.yaml.archived`; an existing archive of
    /// the same name gets a unique infix instead of being overwritten.
    fn archive(&self, raw: &RawFile) -> std::result::Result<String, GitOpsError> {
        let mut target = raw.path.with_file_name(format!("{}{}", raw.file_name(), ARCHIVED_SUFFIX));
        if target.exists() {
            target = raw
                .path
                .with_file_name(format!("{}.{}{}", raw.file_name(), short_uid(), ARCHIVED_SUFFIX));
        }
        move_file(&raw.path, &target)?;
        Ok(self.layout.relative(&target))
    }

    fn unmanage(
        &self,
        raw: &RawFile,
        rejection: &Rejection,
        at: DateTime<Utc>,
    ) -> std::result::Result<String, GitOpsError> {
        let extension = raw
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "yaml".to_string());
        let target = self.unmanaged_target(&file_stem(&raw.path), &extension);
        move_file(&raw.path, &self.layout.absolute(&target))?;
        self.write_reason(
            &target,
            &ReasonRecord {
                reason: rejection.reason,
                message: rejection.message.clone(),
                source: raw.relative_path.clone(),
                document_index: None,
                at,
            },
        )?;
        Ok(target)
    }

    /// `unmanaged/<stem>-<uid>.<ext>`, relative to the fabric root.
    fn unmanaged_target(&self, stem: &str, extension: &str) -> String {
        format!(
            "{}/{}-{}.{}",
            UNMANAGED_DIR,
            path_component(stem),
            short_uid(),
            extension
        )
    }

    fn write_reason(&self, target: &str, reason: &ReasonRecord) -> std::result::Result<(), GitOpsError> {
        let body = serde_yaml::to_string(reason)?;
        write_atomic(
            &self.layout.absolute(&format!("{}{}", target, REASON_SUFFIX)),
            body.as_bytes(),
        )
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string())
}

fn short_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictOutcome;
    use crate::gitops::provenance::read_archive_log;
    use crate::model::content_hash;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FabricLayout) {
        let dir = TempDir::new().unwrap();
        let layout = FabricLayout::new(dir.path());
        layout.ensure_structure().unwrap();
        (dir, layout)
    }

    fn engine(layout: &FabricLayout, strategy: ConflictStrategy) -> IngestionEngine {
        IngestionEngine::new(layout.clone(), &IngestionConfig::default(), strategy)
    }

    fn vpc(name: &str, subnet: &str) -> String {
        format!(
            "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: {}\nspec:\n  subnets:\n    default:\n      subnet: {}\n",
            name, subnet
        )
    }

    fn unmanaged_files(layout: &FabricLayout) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(layout.unmanaged_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_ingest_splits_stream_into_managed_files() {
        let (_dir, layout) = setup();
        let content = format!("{}---\n{}", vpc("vpc-1", "10.0.1.0/24"), vpc("vpc-2", "10.0.2.0/24"));
        fs::write(layout.raw_dir().join("vpcs.yaml"), content).unwrap();

        let report = engine(&layout, ConflictStrategy::MostRecentWins)
            .ingest(&HashMap::new())
            .unwrap();

        assert_eq!(report.files_processed, 1);
        assert_eq!(report.documents_found, 2);
        assert_eq!(report.moved_to_managed, 2);
        assert_eq!(report.archived, 1);
        assert!(report.errors.is_empty());
        assert_eq!(
            report.written,
            vec!["managed/vpc/default/vpc-1.yaml", "managed/vpc/default/vpc-2.yaml"]
        );

        assert!(layout.raw_dir().join("vpcs.yaml.archived").exists());
        assert!(!layout.raw_dir().join("vpcs.yaml").exists());
        assert!(!layout.lock_path().exists());

        let written = fs::read_to_string(layout.absolute("managed/vpc/default/vpc-1.yaml")).unwrap();
        let doc = Document::from_yaml(&written).unwrap();
        let provenance = doc.provenance().unwrap();
        assert_eq!(provenance.source, "raw/vpcs.yaml");
        assert_eq!(provenance.origin, Origin::Git);
        assert_eq!(doc.metadata.namespace.as_deref(), Some("default"));

        let manifest = ProvenanceManifest::load(&layout).unwrap();
        assert_eq!(manifest.resources.len(), 2);
        let log = read_archive_log(&layout).unwrap();
        assert!(log.iter().any(|e| e.action == MoveAction::Archived));
    }

    #[test]
    fn test_invalid_yaml_moves_whole_file() {
        let (_dir, layout) = setup();
        fs::write(
            layout.raw_dir().join("broken.yaml"),
            format!("{}---\nkind: [oops\n", vpc("vpc-1", "10.0.1.0/24")),
        )
        .unwrap();

        let report = engine(&layout, ConflictStrategy::MostRecentWins)
            .ingest(&HashMap::new())
            .unwrap();
        assert_eq!(report.moved_to_unmanaged, 1);
        assert_eq!(report.moved_to_managed, 0);
        assert_eq!(report.rejections[0].reason, RejectReason::InvalidYaml);

        let files = unmanaged_files(&layout);
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("broken-") && files[0].ends_with(".yaml"));
        assert_eq!(files[1], format!("{}.reason", files[0]));

        let reason: ReasonRecord =
            serde_yaml::from_str(&fs::read_to_string(layout.unmanaged_dir().join(&files[1])).unwrap())
                .unwrap();
        assert_eq!(reason.reason, RejectReason::InvalidYaml);
        assert_eq!(reason.source, "raw/broken.yaml");
        assert!(!layout.raw_dir().join("broken.yaml").exists());
    }

    #[test]
    fn test_foreign_group_rejected_individually() {
        let (_dir, layout) = setup();
        let foreign = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n";
        fs::write(
            layout.raw_dir().join("mixed.yaml"),
            format!("{}---\n{}", vpc("vpc-1", "10.0.1.0/24"), foreign),
        )
        .unwrap();

        let report = engine(&layout, ConflictStrategy::MostRecentWins)
            .ingest(&HashMap::new())
            .unwrap();
        assert_eq!(report.moved_to_managed, 1);
        assert_eq!(report.documents_rejected, 1);
        assert_eq!(report.moved_to_unmanaged, 1);
        assert_eq!(report.rejections[0].document_index, Some(1));
        assert_eq!(report.rejections[0].reason, RejectReason::UnrecognizedGroup);
        assert!(layout.raw_dir().join("mixed.yaml.archived").exists());

        let files = unmanaged_files(&layout);
        assert!(files[0].starts_with("mixed-1-"));
    }

    #[test]
    fn test_duplicate_identity_in_one_file() {
        let (_dir, layout) = setup();
        let content = format!("{}---\n{}", vpc("vpc-1", "10.0.1.0/24"), vpc("vpc-1", "10.0.9.0/24"));
        fs::write(layout.raw_dir().join("dup.yaml"), content).unwrap();

        let report = engine(&layout, ConflictStrategy::MostRecentWins)
            .ingest(&HashMap::new())
            .unwrap();
        assert_eq!(report.written, vec!["managed/vpc/default/vpc-1.yaml"]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].outcome, ConflictOutcome::Accepted);

        let written = fs::read_to_string(layout.absolute("managed/vpc/default/vpc-1.yaml")).unwrap();
        assert!(written.contains("10.0.9.0/24"));
    }

    #[test]
    fn test_manual_conflict_writes_nothing() {
        let (_dir, layout) = setup();
        let content = format!("{}---\n{}", vpc("vpc-1", "10.0.1.0/24"), vpc("vpc-1", "10.0.9.0/24"));
        fs::write(layout.raw_dir().join("dup.yaml"), content).unwrap();

        let report = engine(&layout, ConflictStrategy::Manual)
            .ingest(&HashMap::new())
            .unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.conflicts[0].outcome, ConflictOutcome::PendingManual);
        assert_eq!(report.moved_to_unmanaged, 2);
        assert!(!layout.absolute("managed/vpc/default/vpc-1.yaml").exists());
        assert!(report
            .rejections
            .iter()
            .all(|r| r.reason == RejectReason::ConflictPending));
    }

    #[test]
    fn test_excessive_conflicts_touch_nothing() {
        let (_dir, layout) = setup();
        let mut content = String::new();
        for i in 0..3 {
            content.push_str(&vpc(&format!("vpc-{}", i), "10.0.1.0/24"));
            content.push_str("---\n");
            content.push_str(&vpc(&format!("vpc-{}", i), "10.0.2.0/24"));
            content.push_str("---\n");
        }
        fs::write(layout.raw_dir().join("storm.yaml"), content).unwrap();

        let config = IngestionConfig {
            conflict_threshold: 2,
            ..IngestionConfig::default()
        };
        let engine = IngestionEngine::new(layout.clone(), &config, ConflictStrategy::MostRecentWins);

        let dry = engine.validate_only(&HashMap::new()).unwrap();
        assert!(dry.aborted.as_deref().unwrap().starts_with("aborted: excessive conflicts"));

        let err = engine.ingest(&HashMap::new()).unwrap_err();
        assert!(matches!(err, IngestError::ExcessiveConflicts(_)));
        assert!(layout.raw_dir().join("storm.yaml").exists());
        assert!(layout.read_managed().unwrap().0.is_empty());
        assert!(!layout.lock_path().exists());
    }

    #[test]
    fn test_unchanged_document_is_not_rewritten() {
        let (_dir, layout) = setup();
        fs::write(layout.raw_dir().join("a.yaml"), vpc("vpc-1", "10.0.1.0/24")).unwrap();
        let engine = engine(&layout, ConflictStrategy::MostRecentWins);
        engine.ingest(&HashMap::new()).unwrap();

        let path = layout.absolute("managed/vpc/default/vpc-1.yaml");
        let bytes = fs::read(&path).unwrap();
        let doc = Document::from_yaml(std::str::from_utf8(&bytes).unwrap()).unwrap();
        let mut known = HashMap::new();
        known.insert(
            doc.key("default"),
            KnownResource {
                file_hash: Some(content_hash(&bytes)),
                desired: Some(doc.normalized("default")),
            },
        );

        fs::write(layout.raw_dir().join("a.yaml"), vpc("vpc-1", "10.0.1.0/24")).unwrap();
        let report = engine.ingest(&known).unwrap();
        assert!(report.written.is_empty());
        assert!(report.conflicts.is_empty());
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert!(layout.raw_dir().read_dir().unwrap().any(|e| {
            let name = e.unwrap().file_name().to_string_lossy().to_string();
            name.starts_with("a.yaml.") && name.ends_with(".archived") && name != "a.yaml.archived"
        }));
    }

    #[test]
    fn test_validate_only_is_dry() {
        let (_dir, layout) = setup();
        fs::write(layout.raw_dir().join("a.yaml"), vpc("vpc-1", "10.0.1.0/24")).unwrap();
        fs::write(layout.raw_dir().join("b.yaml"), "kind: [").unwrap();

        let report = engine(&layout, ConflictStrategy::MostRecentWins)
            .validate_only(&HashMap::new())
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.moved_to_managed, 1);
        assert_eq!(report.moved_to_unmanaged, 1);
        assert!(report.written.is_empty());
        assert!(layout.raw_dir().join("a.yaml").exists());
        assert!(layout.raw_dir().join("b.yaml").exists());
        assert!(unmanaged_files(&layout).is_empty());
    }

    #[test]
    fn test_live_lock_fails_fast() {
        let (_dir, layout) = setup();
        let _held = ProcessingLock::acquire(&layout, Duration::from_secs(300)).unwrap();
        let err = engine(&layout, ConflictStrategy::MostRecentWins)
            .ingest(&HashMap::new())
            .unwrap_err();
        assert!(err.to_string().starts_with("sync in progress"));
    }
}
