//! `.meta/processing.lock`: keeps two writers out of the directory tree.
//!
//! The lock is a file holding an owner id, the owning pid and the
//! acquisition time. The record is written to a private temp file first and
//! hard-linked into place, so the lock path never exists without its
//! content. A lock whose owner process is gone or which is older than the
//! configured timeout is stale and gets reclaimed; a live lock makes
//! `acquire` fail immediately instead of waiting. A lock that cannot be read
//! is judged by its file mtime alone.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::time::SystemTime;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::layout::FabricLayout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub owner: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let age = now
            .signed_duration_since(self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age > stale_after || !process_alive(self.pid)
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // No cheap liveness check; staleness falls back to age alone
    true
}

/// Held processing lock. Released on drop.
#[derive(Debug)]
pub struct ProcessingLock {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl ProcessingLock {
    pub fn acquire(layout: &FabricLayout, stale_after: Duration) -> Result<Self> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GitOpsError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let record = LockRecord {
            owner: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        // Second attempt only after reclaiming a stale lock
        for _ in 0..2 {
            match Self::create(&path, &record) {
                Ok(()) => {
                    debug!("Acquired processing lock {}", record.owner);
                    return Ok(Self {
                        path,
                        record,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let stale = match read_record(&path) {
                        Some(existing) if !existing.is_stale(Utc::now(), stale_after) => {
                            return Err(GitOpsError::LockHeld {
                                owner: existing.owner,
                                pid: existing.pid,
                                since: existing.acquired_at,
                            });
                        }
                        Some(existing) => format!("{} (pid {})", existing.owner, existing.pid),
                        None => match fresh_mtime(&path, stale_after) {
                            Some(since) => {
                                return Err(GitOpsError::LockHeld {
                                    owner: UNREADABLE_OWNER.to_string(),
                                    pid: 0,
                                    since,
                                });
                            }
                            None => UNREADABLE_OWNER.to_string(),
                        },
                    };
                    warn!("Reclaiming stale processing lock {}", stale);
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(GitOpsError::WriteFile { path, source: e }),
                    }
                }
                Err(e) => return Err(GitOpsError::WriteFile { path, source: e }),
            }
        }

        match read_record(&path) {
            Some(existing) => Err(GitOpsError::LockHeld {
                owner: existing.owner,
                pid: existing.pid,
                since: existing.acquired_at,
            }),
            None => Err(GitOpsError::FileOperation(format!(
                "could not acquire {}",
                path.display()
            ))),
        }
    }

    /// Publishes the record with `link(2)`, which fails with `AlreadyExists`
    /// when another holder got there first.
    fn create(path: &Path, record: &LockRecord) -> std::io::Result<()> {
        let staging = staging_path(path, &record.owner);
        let published = Self::write_staging(&staging, record)
            .and_then(|()| fs::hard_link(&staging, path));
        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != ErrorKind::NotFound {
                debug!("Failed to remove {}: {}", staging.display(), e);
            }
        }
        published
    }

    fn write_staging(staging: &Path, record: &LockRecord) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(staging)?;
        let body = serde_yaml::to_string(record)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        file.write_all(body.as_bytes())?;
        file.sync_all()
    }

    pub fn owner(&self) -> &str {
        &self.record.owner
    }

    pub fn release(mut self) -> Result<()> {
        self.remove()
    }

    /// Removes the file only if it still carries our owner id; a lock that
    /// was reclaimed from under us belongs to someone else now.
    fn remove(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match read_record(&self.path) {
            Some(current) if current.owner == self.record.owner => {
                fs::remove_file(&self.path).map_err(|e| GitOpsError::WriteFile {
                    path: self.path.clone(),
                    source: e,
                })?;
                debug!("Released processing lock {}", self.record.owner);
            }
            Some(current) => {
                warn!(
                    "Processing lock {} was taken over by {}; leaving it in place",
                    self.record.owner, current.owner
                );
            }
            None => {}
        }
        Ok(())
    }
}

impl Drop for ProcessingLock {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("Failed to release processing lock: {}", e);
        }
    }
}

const UNREADABLE_OWNER: &str = "<unreadable>";

fn staging_path(path: &Path, owner: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "processing.lock".to_string());
    path.with_file_name(format!(".{name}.{owner}.tmp"))
}

/// Modification time of a lock file that is younger than `stale_after`.
fn fresh_mtime(path: &Path, stale_after: Duration) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    (age <= stale_after).then(|| DateTime::<Utc>::from(modified))
}

pub fn read_record(path: &Path) -> Option<LockRecord> {
    let content = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&content).ok()
}
