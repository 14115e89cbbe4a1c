//! Conflict records: every detected identity collision, open or settled.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{json_column, parsed_column, Database, DatabaseError};
use crate::conflict::ConflictRecord;
use crate::model::ResourceKey;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredConflict {
    pub id: i64,
    pub fabric_id: String,
    pub record: ConflictRecord,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
}

impl StoredConflict {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none() && self.record.outcome.is_open()
    }
}

fn from_row(row: &Row<'_>) -> Result<StoredConflict, rusqlite::Error> {
    Ok(StoredConflict {
        id: row.get("id")?,
        fabric_id: row.get("fabric_id")?,
        record: ConflictRecord {
            key: ResourceKey {
                kind: row.get("kind")?,
                namespace: row.get("namespace")?,
                name: row.get("name")?,
            },
            strategy: parsed_column(row, "strategy")?,
            outcome: parsed_column(row, "outcome")?,
            sources: json_column(row, "sources")?,
            detected_at: row.get("detected_at")?,
        },
        resolved_at: row.get("resolved_at")?,
        resolution: row.get("resolution")?,
    })
}

/// Stores a record. Settled outcomes are stored already resolved.
pub fn record(db: &Database, fabric_id: &str, record: &ConflictRecord) -> Result<i64, DatabaseError> {
    let sources = serde_json::to_string(&record.sources)?;
    let resolved_at = (!record.outcome.is_open()).then_some(record.detected_at);
    let resolution = (!record.outcome.is_open()).then(|| record.outcome.as_str().to_string());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO conflicts (fabric_id, kind, namespace, name, strategy, outcome, sources,
             detected_at, resolved_at, resolution)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fabric_id,
                record.key.kind,
                record.key.namespace,
                record.key.name,
                record.strategy.as_str(),
                record.outcome.as_str(),
                sources,
                record.detected_at,
                resolved_at,
                resolution,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

fn query(db: &Database, sql: &str, fabric_id: &str) -> Result<Vec<StoredConflict>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![fabric_id], from_row)?;
        let mut conflicts = Vec::new();
        for row in rows {
            conflicts.push(row?);
        }
        Ok(conflicts)
    })
}

pub fn list(db: &Database, fabric_id: &str) -> Result<Vec<StoredConflict>, DatabaseError> {
    query(
        db,
        "SELECT * FROM conflicts WHERE fabric_id = ?1 ORDER BY id",
        fabric_id,
    )
}

pub fn list_open(db: &Database, fabric_id: &str) -> Result<Vec<StoredConflict>, DatabaseError> {
    query(
        db,
        "SELECT * FROM conflicts WHERE fabric_id = ?1 AND resolved_at IS NULL ORDER BY id",
        fabric_id,
    )
}

/// Closes every open record for `key`. Returns how many were closed.
pub fn resolve(
    db: &Database,
    fabric_id: &str,
    key: &ResourceKey,
    resolution: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let closed = conn.execute(
            "UPDATE conflicts SET resolved_at = ?5, resolution = ?6
             WHERE fabric_id = ?1 AND kind = ?2 AND namespace = ?3 AND name = ?4
             AND resolved_at IS NULL",
            params![
                fabric_id,
                key.kind,
                key.namespace,
                key.name,
                Utc::now(),
                resolution
            ],
        )?;
        Ok(closed)
    })
}
