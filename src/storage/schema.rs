//! Usage record schema and migrations.
//!
//! Defines the `SQLite` schema for the append-only usage record log and a
//! versioned migration runner. The store layer builds on top of this.

use rusqlite::Connection;

use crate::error::{Result, TallyError};

const USAGE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "CREATE TABLE usage_records (\
            id INTEGER PRIMARY KEY AUTOINCREMENT,\
            provider TEXT NOT NULL,\
            model_name TEXT NOT NULL,\
            input_tokens INTEGER NOT NULL CHECK (input_tokens >= 0),\
            output_tokens INTEGER NOT NULL CHECK (output_tokens >= 0),\
            cost REAL,\
            currency TEXT,\
            cost_basis TEXT NOT NULL DEFAULT 'priced',\
            session_id TEXT NOT NULL,\
            recorded_at TEXT NOT NULL,\
            created_at TEXT NOT NULL DEFAULT (datetime('now'))\
         );\
         CREATE INDEX idx_usage_records_recorded_at ON usage_records (recorded_at);\
         CREATE INDEX idx_usage_records_session ON usage_records (session_id);",
}];

/// Run schema migrations for the usage record database.
///
/// Returns the latest schema version applied.
///
/// # Errors
/// Returns an error if creating the migrations table, reading the schema
/// version, or applying any migration fails.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    ensure_schema_migrations_table(conn)?;

    let mut current_version = get_schema_version(conn)?;

    for migration in USAGE_MIGRATIONS {
        if migration.version > current_version {
            apply_migration(conn, migration)?;
            current_version = migration.version;
        }
    }

    Ok(current_version)
}

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: i32,
    sql: &'static str,
}

fn ensure_schema_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY,\
            applied_at TEXT DEFAULT (datetime('now'))\
        );",
    )
    .map_err(|e| TallyError::Other(anyhow::anyhow!("create schema_migrations: {e}")))?;

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .map_err(|e| TallyError::Other(anyhow::anyhow!("read schema version: {e}")))?;

    Ok(version.unwrap_or(0))
}

fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| TallyError::Other(anyhow::anyhow!("begin migration: {e}")))?;

    tx.execute_batch(migration.sql).map_err(|e| {
        TallyError::Other(anyhow::anyhow!("apply migration {}: {e}", migration.version))
    })?;

    tx.execute(
        "INSERT INTO schema_migrations (version) VALUES (?1)",
        [migration.version],
    )
    .map_err(|e| {
        TallyError::Other(anyhow::anyhow!("record migration {}: {e}", migration.version))
    })?;

    tx.commit().map_err(|e| {
        TallyError::Other(anyhow::anyhow!("commit migration {}: {e}", migration.version))
    })?;

    Ok(())
}
