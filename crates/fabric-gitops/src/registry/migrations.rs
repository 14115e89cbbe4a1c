//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_fabrics_tables",
        sql: include_str!("sql/001_create_fabrics.sql"),
    },
    Migration {
        version: 2,
        description: "create_managed_resources_tables",
        sql: include_str!("sql/002_create_managed_resources.sql"),
    },
    Migration {
        version: 3,
        description: "create_sync_operations_table",
        sql: include_str!("sql/003_create_sync_operations.sql"),
    },
    Migration {
        version: 4,
        description: "create_conflicts_table",
        sql: include_str!("sql/004_create_conflicts.sql"),
    },
];

pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
