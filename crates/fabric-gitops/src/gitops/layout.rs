//! The per-fabric directory tree: `raw/` inbox, `managed/` canonical
//! one-resource-per-file store, `unmanaged/` rejects and `.meta/`
//! bookkeeping. Paths are slots; moving a file is a rename.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::gitops::error::{GitOpsError, Result};
use crate::model::{content_hash, Document, ResourceKey};
use crate::sanitize::path_component;

pub const RAW_DIR: &str = "raw";
pub const MANAGED_DIR: &str = "managed";
pub const UNMANAGED_DIR: &str = "unmanaged";
pub const META_DIR: &str = ".meta";
pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const ARCHIVE_LOG_FILE: &str = "archive-log.yaml";
pub const LOCK_FILE: &str = "processing.lock";
pub const ARCHIVED_SUFFIX: &str = ".archived";
pub const REASON_SUFFIX: &str = ".reason";

const KEEP_FILE: &str = ".gitkeep";
const GITIGNORE_LINE: &str = ".meta/processing.lock";

/// A parsed file from `managed/`.
#[derive(Debug, Clone)]
pub struct ManagedFile {
    pub relative_path: String,
    pub document: Document,
    pub file_hash: String,
    pub modified: DateTime<Utc>,
}

/// A file under `managed/` that could not be read back as a document.
#[derive(Debug, Clone)]
pub struct ManagedFileError {
    pub relative_path: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FabricLayout {
    root: PathBuf,
}

impl FabricLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn managed_dir(&self) -> PathBuf {
        self.root.join(MANAGED_DIR)
    }

    pub fn unmanaged_dir(&self) -> PathBuf {
        self.root.join(UNMANAGED_DIR)
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.meta_dir().join(MANIFEST_FILE)
    }

    pub fn archive_log_path(&self) -> PathBuf {
        self.meta_dir().join(ARCHIVE_LOG_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.meta_dir().join(LOCK_FILE)
    }

    /// Creates whatever part of the skeleton is missing. Returns the paths
    /// it had to create, relative to the root.
    pub fn ensure_structure(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();

        for dir in [RAW_DIR, MANAGED_DIR, UNMANAGED_DIR, META_DIR] {
            let path = self.root.join(dir);
            if !path.is_dir() {
                fs::create_dir_all(&path).map_err(|e| GitOpsError::CreateDirectory {
                    path: path.clone(),
                    source: e,
                })?;
                created.push(dir.to_string());
            }
            // git does not track empty directories
            let keep = path.join(KEEP_FILE);
            if !keep.exists() {
                write_atomic(&keep, b"")?;
                created.push(format!("{}/{}", dir, KEEP_FILE));
            }
        }

        let gitignore = self.root.join(".gitignore");
        let existing = match fs::read_to_string(&gitignore) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(GitOpsError::ReadFile {
                    path: gitignore,
                    source: e,
                })
            }
        };
        if !existing.lines().any(|l| l.trim() == GITIGNORE_LINE) {
            let mut content = existing;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(GITIGNORE_LINE);
            content.push('\n');
            write_atomic(&gitignore, content.as_bytes())?;
            created.push(".gitignore".to_string());
        }

        if !created.is_empty() {
            debug!("Created fabric skeleton entries: {:?}", created);
        }
        Ok(created)
    }

    /// `managed/<kind>/<namespace>/<name>.yaml`, kind lower-cased and every
    /// component sanitized.
    pub fn managed_relative_path(&self, key: &ResourceKey) -> String {
        format!(
            "{}/{}/{}/{}.yaml",
            MANAGED_DIR,
            path_component(&key.kind.to_lowercase()),
            path_component(&key.namespace),
            path_component(&key.name)
        )
    }

    /// Pathspecs a sync commit stages. Every one exists once
    /// [`FabricLayout::ensure_structure`] has run.
    pub fn tracked_paths(&self) -> Vec<String> {
        [RAW_DIR, MANAGED_DIR, UNMANAGED_DIR, META_DIR, ".gitignore"]
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Root-relative path with forward slashes.
    pub fn relative(&self, path: &Path) -> String {
        let stripped = path.strip_prefix(&self.root).unwrap_or(path);
        stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Reads every YAML file under `managed/`. Files that no longer parse
    /// are reported separately rather than failing the whole read.
    pub fn read_managed(&self) -> Result<(Vec<ManagedFile>, Vec<ManagedFileError>)> {
        let mut files = Vec::new();
        let mut errors = Vec::new();

        let managed = self.managed_dir();
        if !managed.is_dir() {
            return Ok((files, errors));
        }

        for entry in WalkDir::new(&managed)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_yaml(path) {
                continue;
            }

            let relative_path = self.relative(path);
            let bytes = fs::read(path).map_err(|e| GitOpsError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;

            let parsed = std::str::from_utf8(&bytes)
                .map_err(|e| e.to_string())
                .and_then(|text| Document::from_yaml(text).map_err(|e| e.to_string()));

            match parsed {
                Ok(document) => files.push(ManagedFile {
                    relative_path,
                    document,
                    file_hash: content_hash(&bytes),
                    modified: modified_time(path),
                }),
                Err(message) => {
                    warn!("Skipping unreadable managed file {}: {}", relative_path, message);
                    errors.push(ManagedFileError {
                        relative_path,
                        message,
                    });
                }
            }
        }

        Ok((files, errors))
    }
}

pub fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

pub fn modified_time(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Writes through a temp file in the same directory, fsyncs it and renames
/// it into place, so readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| GitOpsError::FileOperation(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| GitOpsError::CreateDirectory {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        GitOpsError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Renames `from` to `to`, creating the destination directory.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| GitOpsError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::rename(from, to).map_err(|e| GitOpsError::MoveFile {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}
