//! Resource repository: one row per `(fabric, kind, namespace, name)`.
//!
//! Every mutation reads the row, decides, and writes back inside one
//! transaction, appending a `resource_history` row for each status field
//! it changes.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{optional_json_column, parsed_column, Database, DatabaseError};
use crate::model::{
    ConflictStatus, Document, DriftStatus, ManagedResource, ResourceKey, StateChange,
    SyncDirection,
};

/// What an upsert did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}

fn from_row(row: &Row<'_>) -> Result<ManagedResource, rusqlite::Error> {
    Ok(ManagedResource {
        id: row.get("id")?,
        fabric_id: row.get("fabric_id")?,
        key: ResourceKey {
            kind: row.get("kind")?,
            namespace: row.get("namespace")?,
            name: row.get("name")?,
        },
        desired_spec: optional_json_column(row, "desired_spec")?,
        actual_spec: optional_json_column(row, "actual_spec")?,
        managed_file_path: row.get("managed_file_path")?,
        file_hash: row.get("file_hash")?,
        desired_hash: row.get("desired_hash")?,
        actual_hash: row.get("actual_hash")?,
        actual_version: row.get("actual_version")?,
        synced_desired_hash: row.get("synced_desired_hash")?,
        synced_actual_hash: row.get("synced_actual_hash")?,
        sync_direction: parsed_column(row, "sync_direction")?,
        conflict_status: parsed_column(row, "conflict_status")?,
        drift_status: parsed_column(row, "drift_status")?,
        drift_score: row.get("drift_score")?,
        reconciliation_attempts: row.get("reconciliation_attempts")?,
        last_error: row.get("last_error")?,
        absent_since: row.get("absent_since")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn load(conn: &Connection, fabric_id: &str, key: &ResourceKey) -> Result<Option<ManagedResource>, DatabaseError> {
    let resource = conn
        .query_row(
            "SELECT * FROM managed_resources
             WHERE fabric_id = ?1 AND kind = ?2 AND namespace = ?3 AND name = ?4",
            params![fabric_id, key.kind, key.namespace, key.name],
            from_row,
        )
        .optional()?;
    Ok(resource)
}

fn load_by_id(conn: &Connection, id: &str) -> Result<ManagedResource, DatabaseError> {
    conn.query_row(
        "SELECT * FROM managed_resources WHERE id = ?1",
        params![id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::NotFound(format!("resource {}", id)))
}

fn to_json(document: Option<&Document>) -> Result<Option<String>, DatabaseError> {
    Ok(document.map(serde_json::to_string).transpose()?)
}

/// Writes every mutable column of `resource`.
fn store(conn: &Connection, resource: &ManagedResource) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO managed_resources (id, fabric_id, kind, namespace, name, desired_spec,
         actual_spec, managed_file_path, file_hash, desired_hash, actual_hash, actual_version,
         synced_desired_hash, synced_actual_hash, sync_direction, conflict_status, drift_status,
         drift_score, reconciliation_attempts, last_error, absent_since, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
         ?18, ?19, ?20, ?21, ?22, ?23)
         ON CONFLICT(id) DO UPDATE SET desired_spec=?6, actual_spec=?7, managed_file_path=?8,
         file_hash=?9, desired_hash=?10, actual_hash=?11, actual_version=?12,
         synced_desired_hash=?13, synced_actual_hash=?14, sync_direction=?15,
         conflict_status=?16, drift_status=?17, drift_score=?18, reconciliation_attempts=?19,
         last_error=?20, absent_since=?21, updated_at=?23",
        params![
            resource.id,
            resource.fabric_id,
            resource.key.kind,
            resource.key.namespace,
            resource.key.name,
            to_json(resource.desired_spec.as_ref())?,
            to_json(resource.actual_spec.as_ref())?,
            resource.managed_file_path,
            resource.file_hash,
            resource.desired_hash,
            resource.actual_hash,
            resource.actual_version,
            resource.synced_desired_hash,
            resource.synced_actual_hash,
            resource.sync_direction.as_str(),
            resource.conflict_status.as_str(),
            resource.drift_status.as_str(),
            resource.drift_score,
            resource.reconciliation_attempts,
            resource.last_error,
            resource.absent_since,
            resource.created_at,
            resource.updated_at,
        ],
    )?;
    Ok(())
}

fn append_history(
    conn: &Connection,
    resource_id: &str,
    field: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO resource_history (resource_id, field, old_value, new_value, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![resource_id, field, old_value, new_value, Utc::now()],
    )?;
    Ok(())
}

fn new_resource(fabric_id: &str, key: &ResourceKey, direction: SyncDirection) -> ManagedResource {
    let now = Utc::now();
    ManagedResource {
        id: uuid::Uuid::new_v4().to_string(),
        fabric_id: fabric_id.to_string(),
        key: key.clone(),
        desired_spec: None,
        actual_spec: None,
        managed_file_path: None,
        file_hash: None,
        desired_hash: None,
        actual_hash: None,
        actual_version: None,
        synced_desired_hash: None,
        synced_actual_hash: None,
        sync_direction: direction,
        conflict_status: ConflictStatus::None,
        drift_status: DriftStatus::None,
        drift_score: 0.0,
        reconciliation_attempts: 0,
        last_error: None,
        absent_since: None,
        created_at: now,
        updated_at: now,
    }
}

/// Records the Git side of a resource. A resource first seen here is
/// created with direction `git_to_cluster`.
pub fn update_desired(
    db: &Database,
    fabric_id: &str,
    key: &ResourceKey,
    spec: &Document,
    path: &str,
    file_hash: &str,
) -> Result<(ManagedResource, Upsert), DatabaseError> {
    let fingerprint = spec.fingerprint();
    db.transaction(|tx| {
        let (mut resource, outcome) = match load(tx, fabric_id, key)? {
            Some(existing) => {
                let unchanged = existing.desired_hash.as_deref() == Some(fingerprint.as_str())
                    && existing.managed_file_path.as_deref() == Some(path)
                    && existing.file_hash.as_deref() == Some(file_hash)
                    && existing.absent_since.is_none();
                if unchanged {
                    return Ok((existing, Upsert::Unchanged));
                }
                (existing, Upsert::Updated)
            }
            None => (
                new_resource(fabric_id, key, SyncDirection::GitToCluster),
                Upsert::Created,
            ),
        };

        resource.desired_spec = Some(spec.clone());
        resource.desired_hash = Some(fingerprint.clone());
        resource.managed_file_path = Some(path.to_string());
        resource.file_hash = Some(file_hash.to_string());
        resource.absent_since = None;
        resource.updated_at = Utc::now();
        store(tx, &resource)?;

        if outcome == Upsert::Created {
            append_history(tx, &resource.id, "sync_direction", None, Some(resource.sync_direction.as_str()))?;
        }
        Ok((resource, outcome))
    })
}

/// Records the cluster side of a resource. A resource first seen here is
/// created with direction `cluster_to_git`. A new resource version with an
/// unchanged spec only refreshes the stored version.
pub fn update_actual(
    db: &Database,
    fabric_id: &str,
    key: &ResourceKey,
    spec: &Document,
    version: Option<&str>,
) -> Result<(ManagedResource, Upsert), DatabaseError> {
    let fingerprint = spec.fingerprint();
    db.transaction(|tx| {
        let (mut resource, outcome) = match load(tx, fabric_id, key)? {
            Some(mut existing) => {
                if existing.actual_hash.as_deref() == Some(fingerprint.as_str())
                    && existing.absent_since.is_none()
                {
                    if existing.actual_version.as_deref() != version {
                        existing.actual_version = version.map(str::to_string);
                        tx.execute(
                            "UPDATE managed_resources SET actual_version = ?2 WHERE id = ?1",
                            params![existing.id, existing.actual_version],
                        )?;
                    }
                    return Ok((existing, Upsert::Unchanged));
                }
                (existing, Upsert::Updated)
            }
            None => (
                new_resource(fabric_id, key, SyncDirection::ClusterToGit),
                Upsert::Created,
            ),
        };

        resource.actual_spec = Some(spec.clone());
        resource.actual_hash = Some(fingerprint.clone());
        resource.actual_version = version.map(str::to_string);
        resource.absent_since = None;
        resource.updated_at = Utc::now();
        store(tx, &resource)?;

        if outcome == Upsert::Created {
            append_history(tx, &resource.id, "sync_direction", None, Some(resource.sync_direction.as_str()))?;
        }
        Ok((resource, outcome))
    })
}

/// The managed file is gone from Git.
pub fn clear_desired(
    db: &Database,
    fabric_id: &str,
    key: &ResourceKey,
) -> Result<Option<ManagedResource>, DatabaseError> {
    db.transaction(|tx| {
        let Some(mut resource) = load(tx, fabric_id, key)? else {
            return Ok(None);
        };
        if resource.desired_spec.is_none() && resource.managed_file_path.is_none() {
            return Ok(Some(resource));
        }
        resource.desired_spec = None;
        resource.desired_hash = None;
        resource.managed_file_path = None;
        resource.file_hash = None;
        resource.updated_at = Utc::now();
        store(tx, &resource)?;
        Ok(Some(resource))
    })
}

/// The object is gone from the cluster.
pub fn clear_actual(
    db: &Database,
    fabric_id: &str,
    key: &ResourceKey,
) -> Result<Option<ManagedResource>, DatabaseError> {
    db.transaction(|tx| {
        let Some(mut resource) = load(tx, fabric_id, key)? else {
            return Ok(None);
        };
        if resource.actual_spec.is_none() {
            return Ok(Some(resource));
        }
        resource.actual_spec = None;
        resource.actual_hash = None;
        resource.actual_version = None;
        resource.updated_at = Utc::now();
        store(tx, &resource)?;
        Ok(Some(resource))
    })
}

pub fn find(
    db: &Database,
    fabric_id: &str,
    key: &ResourceKey,
) -> Result<Option<ManagedResource>, DatabaseError> {
    db.with_conn(|conn| load(conn, fabric_id, key))
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ManagedResource>, DatabaseError> {
    db.with_conn(|conn| match load_by_id(conn, id) {
        Ok(resource) => Ok(Some(resource)),
        Err(DatabaseError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    })
}

/// All resources of a fabric ordered by kind, namespace, name.
pub fn list(db: &Database, fabric_id: &str) -> Result<Vec<ManagedResource>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM managed_resources WHERE fabric_id = ?1
             ORDER BY kind, namespace, name",
        )?;
        let rows = stmt.query_map(params![fabric_id], from_row)?;
        let mut resources = Vec::new();
        for row in rows {
            resources.push(row?);
        }
        Ok(resources)
    })
}

/// Records both sides as converged: the current fingerprints become the
/// baseline the next pass compares against.
pub fn mark_synced(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE managed_resources SET synced_desired_hash = desired_hash,
             synced_actual_hash = actual_hash, reconciliation_attempts = 0, last_error = NULL,
             updated_at = ?2
             WHERE id = ?1",
            params![id, Utc::now()],
        )?;
        Ok(())
    })
}

/// Updates one status column, appending history when the value changes.
fn set_status(db: &Database, id: &str, field: &'static str, value: &str) -> Result<bool, DatabaseError> {
    db.transaction(|tx| {
        let resource = load_by_id(tx, id)?;
        let old = match field {
            "conflict_status" => resource.conflict_status.as_str(),
            "drift_status" => resource.drift_status.as_str(),
            "sync_direction" => resource.sync_direction.as_str(),
            other => return Err(DatabaseError::NotFound(format!("status field {}", other))),
        };
        if old == value {
            return Ok(false);
        }
        tx.execute(
            &format!(
                "UPDATE managed_resources SET {} = ?2, updated_at = ?3 WHERE id = ?1",
                field
            ),
            params![id, value, Utc::now()],
        )?;
        append_history(tx, id, field, Some(old), Some(value))?;
        Ok(true)
    })
}

pub fn set_conflict(db: &Database, id: &str, status: ConflictStatus) -> Result<(), DatabaseError> {
    set_status(db, id, "conflict_status", status.as_str()).map(|_| ())
}

pub fn set_direction(db: &Database, id: &str, direction: SyncDirection) -> Result<(), DatabaseError> {
    set_status(db, id, "sync_direction", direction.as_str()).map(|_| ())
}

pub fn set_drift(db: &Database, id: &str, status: DriftStatus, score: f64) -> Result<(), DatabaseError> {
    set_status(db, id, "drift_status", status.as_str())?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE managed_resources SET drift_score = ?2 WHERE id = ?1 AND drift_score != ?2",
            params![id, score],
        )?;
        Ok(())
    })
}

/// Counts a reconciliation attempt. `error` is kept as the resource's last
/// error; `None` clears it.
pub fn record_attempt(db: &Database, id: &str, error: Option<&str>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE managed_resources SET reconciliation_attempts = reconciliation_attempts + 1,
             last_error = ?2, updated_at = ?3
             WHERE id = ?1",
            params![id, error, Utc::now()],
        )?;
        Ok(())
    })
}

/// Starts the grace period of a resource absent from both stores. Keeps
/// the first timestamp on repeated calls.
pub fn mark_absent(db: &Database, id: &str, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE managed_resources SET absent_since = ?2
             WHERE id = ?1 AND absent_since IS NULL",
            params![id, now],
        )?;
        Ok(())
    })
}

/// Deletes rows absent from both stores since before `absent_before`.
pub fn purge_orphans(
    db: &Database,
    fabric_id: &str,
    absent_before: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM managed_resources
             WHERE fabric_id = ?1 AND desired_spec IS NULL AND actual_spec IS NULL
             AND absent_since IS NOT NULL AND absent_since < ?2",
            params![fabric_id, absent_before],
        )?;
        if removed > 0 {
            log::info!("Purged {} orphaned resource(s)", removed);
        }
        Ok(removed)
    })
}

/// State changes of one resource, oldest first.
pub fn history(db: &Database, resource_id: &str) -> Result<Vec<StateChange>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT field, old_value, new_value, changed_at FROM resource_history
             WHERE resource_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![resource_id], |row| {
            Ok(StateChange {
                field: row.get("field")?,
                old_value: row.get("old_value")?,
                new_value: row.get("new_value")?,
                changed_at: row.get("changed_at")?,
            })
        })?;
        let mut changes = Vec::new();
        for row in rows {
            changes.push(row?);
        }
        Ok(changes)
    })
}
