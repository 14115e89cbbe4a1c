use chrono::{DateTime, Utc};
use log::{debug, info};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::gitops::layout::{is_yaml, modified_time};
use crate::gitops::{FabricLayout, GitOpsError};

/// A YAML file waiting in `raw/`.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    /// Path relative to the fabric root, e.g. `raw/site-a/vpcs.yaml`.
    pub relative_path: String,
    pub modified: DateTime<Utc>,
}

impl RawFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Lists every YAML file under `raw/`, recursively, in path order.
/// Archived files, hidden files and anything inside a hidden directory are
/// skipped so editor swap files and our own temp files never get ingested.
pub fn scan(layout: &FabricLayout) -> Result<Vec<RawFile>, GitOpsError> {
    let raw = layout.raw_dir();
    if !raw.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&raw)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry.map_err(|e| GitOpsError::ReadDirectory {
            path: raw.clone(),
            source: e.into(),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_yaml(path) {
            continue;
        }

        debug!("Found raw file: {}", layout.relative(path));
        files.push(RawFile {
            path: path.to_path_buf(),
            relative_path: layout.relative(path),
            modified: modified_time(path),
        });
    }

    info!("Scanned {} raw files", files.len());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout() -> (TempDir, FabricLayout) {
        let dir = TempDir::new().unwrap();
        let layout = FabricLayout::new(dir.path());
        layout.ensure_structure().unwrap();
        (dir, layout)
    }

    #[test]
    fn test_scan_empty_inbox() {
        let (_dir, layout) = layout();
        assert!(scan(&layout).unwrap().is_empty());
    }

    #[test]
    fn test_scan_is_recursive_and_sorted() {
        let (_dir, layout) = layout();
        fs::create_dir_all(layout.raw_dir().join("site-b")).unwrap();
        fs::write(layout.raw_dir().join("site-b/switches.yml"), "kind: Switch").unwrap();
        fs::write(layout.raw_dir().join("a-vpcs.yaml"), "kind: VPC").unwrap();

        let files = scan(&layout).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["raw/a-vpcs.yaml", "raw/site-b/switches.yml"]);
        assert_eq!(files[1].file_name(), "switches.yml");
    }

    #[test]
    fn test_scan_skips_archived_hidden_and_other_files() {
        let (_dir, layout) = layout();
        let raw = layout.raw_dir();
        fs::write(raw.join("done.yaml.archived"), "kind: VPC").unwrap();
        fs::write(raw.join(".vpcs.yaml.swp"), "").unwrap();
        fs::write(raw.join("notes.txt"), "hello").unwrap();
        fs::create_dir_all(raw.join(".cache")).unwrap();
        fs::write(raw.join(".cache/vpc.yaml"), "kind: VPC").unwrap();
        fs::write(raw.join("new.yaml"), "kind: VPC").unwrap();

        let files = scan(&layout).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "raw/new.yaml");
    }
}
