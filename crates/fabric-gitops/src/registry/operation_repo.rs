//! Sync operation audit trail. Rows are inserted once and never updated.

use rusqlite::{params, Row};

use super::{json_column, parsed_column, Database, DatabaseError};
use crate::model::SyncOperation;

fn from_row(row: &Row<'_>) -> Result<SyncOperation, rusqlite::Error> {
    Ok(SyncOperation {
        id: row.get("id")?,
        fabric_id: row.get("fabric_id")?,
        trigger: parsed_column(row, "trigger_kind")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        outcome: parsed_column(row, "outcome")?,
        counts: json_column(row, "counts")?,
        errors: json_column(row, "errors")?,
        message: row.get("message")?,
    })
}

pub fn record(db: &Database, operation: &SyncOperation) -> Result<(), DatabaseError> {
    let counts = serde_json::to_string(&operation.counts)?;
    let errors = serde_json::to_string(&operation.errors)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sync_operations (id, fabric_id, trigger_kind, started_at, finished_at,
             outcome, counts, errors, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                operation.id,
                operation.fabric_id,
                operation.trigger.as_str(),
                operation.started_at,
                operation.finished_at,
                operation.outcome.as_str(),
                counts,
                errors,
                operation.message,
            ],
        )?;
        Ok(())
    })
}

/// Newest first.
pub fn list(db: &Database, fabric_id: &str, limit: usize) -> Result<Vec<SyncOperation>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM sync_operations WHERE fabric_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fabric_id, limit as i64], from_row)?;
        let mut operations = Vec::new();
        for row in rows {
            operations.push(row?);
        }
        Ok(operations)
    })
}

pub fn latest(db: &Database, fabric_id: &str) -> Result<Option<SyncOperation>, DatabaseError> {
    Ok(list(db, fabric_id, 1)?.into_iter().next())
}

/// Keeps the newest `keep` operations of a fabric.
pub fn prune(db: &Database, fabric_id: &str, keep: usize) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM sync_operations WHERE fabric_id = ?1 AND id NOT IN (
                 SELECT id FROM sync_operations WHERE fabric_id = ?1
                 ORDER BY started_at DESC, rowid DESC LIMIT ?2)",
            params![fabric_id, keep as i64],
        )?;
        Ok(removed)
    })
}
