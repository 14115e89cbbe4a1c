//! Resource Registry: durable state for fabrics, their resources, sync
//! history and conflicts.
//!
//! Uses rusqlite (SQLite) behind a thread-safe `Database` handle. All
//! access is serialized through a `Mutex<Connection>`; every
//! read-modify-write of a resource row runs inside one transaction, so a
//! manual and a scheduled sync touching the same key never lose an update.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};
use serde::de::DeserializeOwned;

pub mod conflict_repo;
pub mod error;
pub mod fabric_repo;
pub mod migrations;
pub mod operation_repo;
pub mod resource_repo;

pub use error::DatabaseError;
pub use resource_repo::Upsert;

use crate::model::{ConflictStatus, Document, DriftStatus, ManagedResource, ResourceKey, StateChange, SyncDirection};

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for file databases.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run_all(&conn)?;

        log::info!("Registry opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` in a transaction that commits only if `f` succeeds.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Returns the canonical database path: `~/.fabric-gitops/data/registry.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fabric-gitops").join("data").join("registry.db"))
}

/// Per-fabric view over the resource rows.
#[derive(Clone)]
pub struct ResourceRegistry {
    db: Database,
    fabric_id: String,
}

impl ResourceRegistry {
    pub fn new(db: Database, fabric_id: &str) -> Self {
        Self {
            db,
            fabric_id: fabric_id.to_string(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn fabric_id(&self) -> &str {
        &self.fabric_id
    }

    /// Records the Git side of a resource after ingestion.
    pub fn update_desired(
        &self,
        key: &ResourceKey,
        spec: &Document,
        path: &str,
        file_hash: &str,
    ) -> Result<(ManagedResource, Upsert), DatabaseError> {
        resource_repo::update_desired(&self.db, &self.fabric_id, key, spec, path, file_hash)
    }

    /// Records the cluster side of a resource after a fetch.
    pub fn update_actual(
        &self,
        key: &ResourceKey,
        spec: &Document,
        version: Option<&str>,
    ) -> Result<(ManagedResource, Upsert), DatabaseError> {
        resource_repo::update_actual(&self.db, &self.fabric_id, key, spec, version)
    }

    pub fn clear_desired(&self, key: &ResourceKey) -> Result<Option<ManagedResource>, DatabaseError> {
        resource_repo::clear_desired(&self.db, &self.fabric_id, key)
    }

    pub fn clear_actual(&self, key: &ResourceKey) -> Result<Option<ManagedResource>, DatabaseError> {
        resource_repo::clear_actual(&self.db, &self.fabric_id, key)
    }

    pub fn find(&self, key: &ResourceKey) -> Result<Option<ManagedResource>, DatabaseError> {
        resource_repo::find(&self.db, &self.fabric_id, key)
    }

    pub fn list(&self) -> Result<Vec<ManagedResource>, DatabaseError> {
        resource_repo::list(&self.db, &self.fabric_id)
    }

    pub fn mark_synced(&self, resource: &ManagedResource) -> Result<(), DatabaseError> {
        resource_repo::mark_synced(&self.db, &resource.id)
    }

    pub fn set_conflict(&self, id: &str, status: ConflictStatus) -> Result<(), DatabaseError> {
        resource_repo::set_conflict(&self.db, id, status)
    }

    pub fn set_drift(&self, id: &str, status: DriftStatus, score: f64) -> Result<(), DatabaseError> {
        resource_repo::set_drift(&self.db, id, status, score)
    }

    pub fn set_direction(&self, id: &str, direction: SyncDirection) -> Result<(), DatabaseError> {
        resource_repo::set_direction(&self.db, id, direction)
    }

    pub fn record_attempt(&self, id: &str, error: Option<&str>) -> Result<(), DatabaseError> {
        resource_repo::record_attempt(&self.db, id, error)
    }

    pub fn mark_absent(&self, id: &str, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        resource_repo::mark_absent(&self.db, id, now)
    }

    pub fn purge_orphans(&self, absent_before: DateTime<Utc>) -> Result<usize, DatabaseError> {
        resource_repo::purge_orphans(&self.db, &self.fabric_id, absent_before)
    }

    pub fn history(&self, id: &str) -> Result<Vec<StateChange>, DatabaseError> {
        resource_repo::history(&self.db, id)
    }
}

/// Decodes a JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(row, column, e))
}

pub(crate) fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(column)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| conversion_error(row, column, e)))
        .transpose()
}

/// Decodes a text column through `FromStr`.
pub(crate) fn parsed_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let text: String = row.get(column)?;
    text.parse()
        .map_err(|e: String| conversion_error(row, column, std::io::Error::other(e)))
}

fn conversion_error<E>(row: &Row<'_>, column: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}
