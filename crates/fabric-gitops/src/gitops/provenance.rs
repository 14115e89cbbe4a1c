//! `.meta/manifest.yaml` (where each managed file came from) and
//! `.meta/archive-log.yaml` (append-only log of every move).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;

use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::layout::{write_atomic, FabricLayout};
use crate::model::{Origin, ResourceKey};

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub origin: Origin,
    /// Raw file the document was ingested from, or `cluster`.
    pub source: String,
    /// Fingerprint of the document content.
    pub fingerprint: String,
}

impl ManifestEntry {
    pub fn new(key: &ResourceKey, origin: Origin, source: &str, fingerprint: &str) -> Self {
        Self {
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            origin,
            source: source.to_string(),
            fingerprint: fingerprint.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceManifest {
    pub version: u32,
    /// Keyed by managed file path relative to the fabric root.
    #[serde(default)]
    pub resources: BTreeMap<String, ManifestEntry>,
}

impl Default for ProvenanceManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

impl ProvenanceManifest {
    pub fn load(layout: &FabricLayout) -> Result<Self> {
        let path = layout.manifest_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(GitOpsError::ReadFile { path, source: e }),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| GitOpsError::ParseYaml {
            path,
            message: e.to_string(),
        })
    }

    pub fn record(&mut self, managed_path: &str, entry: ManifestEntry) {
        self.resources.insert(managed_path.to_string(), entry);
    }

    pub fn forget(&mut self, managed_path: &str) -> Option<ManifestEntry> {
        self.resources.remove(managed_path)
    }

    /// Writes the manifest only when it differs from what is on disk.
    /// Returns whether a write happened.
    pub fn save_if_changed(&self, layout: &FabricLayout) -> Result<bool> {
        if Self::load(layout).ok().as_ref() == Some(self) && layout.manifest_path().exists() {
            return Ok(false);
        }
        let body = serde_yaml::to_string(self)?;
        write_atomic(&layout.manifest_path(), body.as_bytes())?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAction {
    /// Raw file renamed with the archived suffix after ingestion.
    Archived,
    /// Rejected input moved or copied into `unmanaged/`.
    Unmanaged,
    /// Document written into `managed/` from a raw file.
    Managed,
    /// Cluster state written back into `managed/`.
    WrittenBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveLogEntry {
    pub at: DateTime<Utc>,
    pub action: MoveAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ArchiveLogEntry {
    pub fn new(action: MoveAction, from: Option<&str>, to: &str) -> Self {
        Self {
            at: Utc::now(),
            action,
            from: from.map(str::to_string),
            to: to.to_string(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Appends entries as YAML sequence items so the file stays one valid
/// YAML list no matter how many passes have written to it.
pub fn append_archive_log(layout: &FabricLayout, entries: &[ArchiveLogEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let body = serde_yaml::to_string(entries)?;
    let path = layout.archive_log_path();
    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()
    };
    write().map_err(|e| GitOpsError::WriteFile {
        path: path.clone(),
        source: e,
    })
}

pub fn read_archive_log(layout: &FabricLayout) -> Result<Vec<ArchiveLogEntry>> {
    let path = layout.archive_log_path();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GitOpsError::ReadFile { path, source: e }),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(&content).map_err(|e| GitOpsError::ParseYaml {
        path,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> (TempDir, FabricLayout) {
        let dir = TempDir::new().unwrap();
        let layout = FabricLayout::new(dir.path());
        layout.ensure_structure().unwrap();
        (dir, layout)
    }

    #[test]
    fn test_manifest_saved_only_when_changed() {
        let (_dir, layout) = layout();
        let mut manifest = ProvenanceManifest::load(&layout).unwrap();
        assert!(manifest.resources.is_empty());

        let key = ResourceKey::new("VPC", "default", "vpc-1");
        manifest.record(
            "managed/vpc/default/vpc-1.yaml",
            ManifestEntry::new(&key, Origin::Git, "raw/vpcs.yaml", "abc"),
        );
        assert!(manifest.save_if_changed(&layout).unwrap());
        assert!(!manifest.save_if_changed(&layout).unwrap());

        let reloaded = ProvenanceManifest::load(&layout).unwrap();
        assert_eq!(reloaded, manifest);

        manifest.forget("managed/vpc/default/vpc-1.yaml");
        assert!(manifest.save_if_changed(&layout).unwrap());
    }

    #[test]
    fn test_archive_log_appends() {
        let (_dir, layout) = layout();
        append_archive_log(
            &layout,
            &[ArchiveLogEntry::new(
                MoveAction::Archived,
                Some("raw/a.yaml"),
                "raw/a.yaml.archived",
            )],
        )
        .unwrap();
        append_archive_log(
            &layout,
            &[
                ArchiveLogEntry::new(MoveAction::Unmanaged, Some("raw/b.yaml"), "unmanaged/b.yaml-1")
                    .with_reason("invalid_yaml"),
                ArchiveLogEntry::new(MoveAction::WrittenBack, None, "managed/vpc/default/x.yaml"),
            ],
        )
        .unwrap();
        append_archive_log(&layout, &[]).unwrap();

        let entries = read_archive_log(&layout).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, MoveAction::Archived);
        assert_eq!(entries[1].reason.as_deref(), Some("invalid_yaml"));
        assert_eq!(entries[2].from, None);
    }
}
