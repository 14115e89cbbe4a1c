//! Fabric repository: CRUD for `fabrics` and their owned
//! `git_repositories` row, plus the status bookkeeping of sync attempts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;

use super::{json_column, parsed_column, Database, DatabaseError};
use crate::model::{Fabric, GitAuth, GitRepositoryConfig};

const SELECT_FABRIC: &str = "SELECT f.*, g.remote_url, g.branch, g.local_path, g.auth
     FROM fabrics f LEFT JOIN git_repositories g ON g.fabric_id = f.id";

fn from_row(row: &Row<'_>) -> Result<Fabric, rusqlite::Error> {
    let local_path: Option<String> = row.get("local_path")?;
    let git = match local_path {
        Some(local_path) => Some(GitRepositoryConfig {
            remote_url: row.get("remote_url")?,
            branch: row.get::<_, Option<String>>("branch")?.unwrap_or_default(),
            local_path: PathBuf::from(local_path),
            auth: json_column::<GitAuth>(row, "auth")?,
        }),
        None => None,
    };

    Ok(Fabric {
        id: row.get("id")?,
        name: row.get("name")?,
        git,
        cluster: json_column(row, "cluster")?,
        conflict_strategy: parsed_column(row, "conflict_strategy")?,
        tracked_kinds: json_column(row, "tracked_kinds")?,
        sync_enabled: row.get("sync_enabled")?,
        sync_interval_secs: row.get::<_, i64>("sync_interval_secs")?.max(0) as u64,
        last_sync: row.get("last_sync")?,
        last_sync_attempt: row.get("last_sync_attempt")?,
        sync_status: row.get("sync_status")?,
        sync_error: row.get("sync_error")?,
        connection_error: row.get("connection_error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn write_git(conn: &Connection, fabric: &Fabric) -> Result<(), DatabaseError> {
    match &fabric.git {
        Some(git) => {
            conn.execute(
                "INSERT INTO git_repositories (fabric_id, remote_url, branch, local_path, auth)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(fabric_id) DO UPDATE SET remote_url=?2, branch=?3, local_path=?4, auth=?5",
                params![
                    fabric.id,
                    git.remote_url,
                    git.branch,
                    git.local_path.to_string_lossy(),
                    serde_json::to_string(&git.auth)?,
                ],
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM git_repositories WHERE fabric_id = ?1",
                params![fabric.id],
            )?;
        }
    }
    Ok(())
}

pub fn insert(db: &Database, fabric: &Fabric) -> Result<(), DatabaseError> {
    db.transaction(|tx| {
        tx.execute(
            "INSERT INTO fabrics (id, name, cluster, conflict_strategy, tracked_kinds,
             sync_enabled, sync_interval_secs, last_sync, last_sync_attempt, sync_status,
             sync_error, connection_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                fabric.id,
                fabric.name,
                serde_json::to_string(&fabric.cluster)?,
                fabric.conflict_strategy.as_str(),
                serde_json::to_string(&fabric.tracked_kinds)?,
                fabric.sync_enabled,
                fabric.sync_interval_secs as i64,
                fabric.last_sync,
                fabric.last_sync_attempt,
                fabric.sync_status,
                fabric.sync_error,
                fabric.connection_error,
                fabric.created_at,
                fabric.updated_at,
            ],
        )?;
        write_git(tx, fabric)
    })
}

/// Overwrites the configuration of an existing fabric. Sync bookkeeping
/// (`last_sync`, errors, status) is left alone; those columns belong to
/// the `record_*` functions.
pub fn update(db: &Database, fabric: &Fabric) -> Result<(), DatabaseError> {
    db.transaction(|tx| {
        let changed = tx.execute(
            "UPDATE fabrics SET name=?2, cluster=?3, conflict_strategy=?4, tracked_kinds=?5,
             sync_enabled=?6, sync_interval_secs=?7, updated_at=?8
             WHERE id=?1",
            params![
                fabric.id,
                fabric.name,
                serde_json::to_string(&fabric.cluster)?,
                fabric.conflict_strategy.as_str(),
                serde_json::to_string(&fabric.tracked_kinds)?,
                fabric.sync_enabled,
                fabric.sync_interval_secs as i64,
                Utc::now(),
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(format!("fabric {}", fabric.id)));
        }
        write_git(tx, fabric)
    })
}

pub fn find(db: &Database, id: &str) -> Result<Option<Fabric>, DatabaseError> {
    db.with_conn(|conn| {
        let fabric = conn
            .query_row(&format!("{} WHERE f.id = ?1", SELECT_FABRIC), params![id], from_row)
            .optional()?;
        Ok(fabric)
    })
}

pub fn find_by_name(db: &Database, name: &str) -> Result<Option<Fabric>, DatabaseError> {
    db.with_conn(|conn| {
        let fabric = conn
            .query_row(
                &format!("{} WHERE f.name = ?1", SELECT_FABRIC),
                params![name],
                from_row,
            )
            .optional()?;
        Ok(fabric)
    })
}

pub fn list(db: &Database) -> Result<Vec<Fabric>, DatabaseError> {
    query(db, &format!("{} ORDER BY f.name", SELECT_FABRIC))
}

pub fn list_sync_enabled(db: &Database) -> Result<Vec<Fabric>, DatabaseError> {
    query(
        db,
        &format!("{} WHERE f.sync_enabled = 1 ORDER BY f.name", SELECT_FABRIC),
    )
}

fn query(db: &Database, sql: &str) -> Result<Vec<Fabric>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], from_row)?;
        let mut fabrics = Vec::new();
        for row in rows {
            fabrics.push(row?);
        }
        Ok(fabrics)
    })
}

/// Deletes the fabric together with its repository reference and every
/// resource, operation and conflict row.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute("DELETE FROM fabrics WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    })
}

/// Marks the start of an attempt. Moves the scheduler's due time even if
/// the attempt later fails.
pub fn record_attempt(db: &Database, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET last_sync_attempt = ?2, sync_status = 'syncing', updated_at = ?2
             WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}

pub fn record_success(db: &Database, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET last_sync = ?2, last_sync_attempt = ?2, sync_status = 'synced',
             sync_error = NULL, connection_error = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}

/// Records a failed attempt. Connection failures go to
/// `connection_error`, everything else to `sync_error`.
pub fn record_failure(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
    error: &str,
    connection: bool,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let sql = if connection {
            "UPDATE fabrics SET last_sync_attempt = ?2, sync_status = 'error',
             connection_error = ?3, updated_at = ?2 WHERE id = ?1"
        } else {
            "UPDATE fabrics SET last_sync_attempt = ?2, sync_status = 'error',
             sync_error = ?3, updated_at = ?2 WHERE id = ?1"
        };
        conn.execute(sql, params![id, at, error])?;
        Ok(())
    })
}

/// Stores the outcome of a connection test without touching sync state.
pub fn record_connection(
    db: &Database,
    id: &str,
    error: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET connection_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, Utc::now()],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictStrategy;
    use crate::model::ClusterEndpoint;
    use crate::secrets::SecretSource;

    fn lab() -> Fabric {
        let mut fabric = Fabric::new("lab")
            .with_cluster(ClusterEndpoint {
                endpoint: "https://10.0.0.1:6443".to_string(),
                namespaces: vec!["default".to_string()],
                token: SecretSource::from_env_var("LAB_TOKEN"),
                ca_cert_path: None,
            })
            .with_git(GitRepositoryConfig::local("/srv/fabrics/lab"));
        fabric.tracked_kinds = vec!["VPC".to_string()];
        fabric.conflict_strategy = ConflictStrategy::Merge;
        fabric
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let fabric = lab();
        insert(&db, &fabric).unwrap();

        let found = find(&db, &fabric.id).unwrap().unwrap();
        assert_eq!(found.name, "lab");
        assert_eq!(found.cluster, fabric.cluster);
        assert_eq!(found.git, fabric.git);
        assert_eq!(found.conflict_strategy, ConflictStrategy::Merge);
        assert_eq!(found.tracked_kinds, vec!["VPC"]);
        assert!(found.last_sync.is_none());

        assert!(find_by_name(&db, "lab").unwrap().is_some());
        assert!(find(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_update_can_drop_git() {
        let db = Database::open_in_memory().unwrap();
        let mut fabric = lab();
        insert(&db, &fabric).unwrap();

        fabric.git = None;
        fabric.sync_interval_secs = 60;
        update(&db, &fabric).unwrap();

        let found = find(&db, &fabric.id).unwrap().unwrap();
        assert!(found.git.is_none());
        assert_eq!(found.sync_interval_secs, 60);

        assert!(matches!(
            update(&db, &Fabric::new("ghost")),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_status_bookkeeping() {
        let db = Database::open_in_memory().unwrap();
        let fabric = lab();
        insert(&db, &fabric).unwrap();
        let at = Utc::now();

        record_attempt(&db, &fabric.id, at).unwrap();
        record_failure(&db, &fabric.id, at, "connection refused", true).unwrap();
        let failed = find(&db, &fabric.id).unwrap().unwrap();
        assert_eq!(failed.connection_error.as_deref(), Some("connection refused"));
        assert!(failed.last_sync.is_none());
        assert!(failed.last_sync_attempt.is_some());

        record_success(&db, &fabric.id, at).unwrap();
        let synced = find(&db, &fabric.id).unwrap().unwrap();
        assert!(synced.connection_error.is_none());
        assert_eq!(synced.sync_status, "synced");
        assert_eq!(synced.last_sync.map(|t| t.timestamp()), Some(at.timestamp()));
    }

    #[test]
    fn test_list_sync_enabled_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let enabled = lab();
        let mut disabled = Fabric::new("staging");
        disabled.sync_enabled = false;
        insert(&db, &enabled).unwrap();
        insert(&db, &disabled).unwrap();

        assert_eq!(list(&db).unwrap().len(), 2);
        let due = list_sync_enabled(&db).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "lab");

        assert!(delete(&db, &enabled.id).unwrap());
        assert!(!delete(&db, &enabled.id).unwrap());
        assert_eq!(list(&db).unwrap().len(), 1);
    }
}
