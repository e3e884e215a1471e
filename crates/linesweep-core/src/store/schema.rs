//! SQLite schema DDL and migration framework for the clearance ledger.

use rusqlite::{params, Connection};

use crate::errors::LineSweepResult;

/// Current schema version. Migrations run from whatever the store reports
/// up to this value.
pub const SCHEMA_VERSION: i64 = 2;

/// Core DDL, safe to replay on an initialised store.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS file_states (
        path TEXT PRIMARY KEY,
        last_modified INTEGER NOT NULL,
        file_hash TEXT NOT NULL,
        cleared_lines TEXT NOT NULL,
        total_lines INTEGER NOT NULL,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS file_errors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL REFERENCES file_states(path) ON DELETE CASCADE,
        line INTEGER NOT NULL,
        error TEXT NOT NULL,
        stack TEXT,
        occurred_at TEXT NOT NULL
    );",
];

pub fn get_schema_version(conn: &Connection) -> i64 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i64>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i64) -> LineSweepResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![version.to_string()],
    )?;
    Ok(())
}

/// Run any pending schema migrations.
pub fn migrate_schema(conn: &Connection) -> LineSweepResult<()> {
    let mut current = get_schema_version(conn);
    while current < SCHEMA_VERSION {
        let next = current + 1;
        match next {
            // v1: base tables from SCHEMA_STATEMENTS.
            1 => {}
            2 => migrate_to_v2(conn)?,
            _ => {}
        }
        set_schema_version(conn, next)?;
        current = next;
    }
    Ok(())
}

/// v1 -> v2: index error rows by file for per-file reloads.
fn migrate_to_v2(conn: &Connection) -> LineSweepResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_file_errors_path ON file_errors(path, id);",
    )?;
    Ok(())
}

/// Create all tables on `conn` and bring it to the current version.
pub fn init_schema(conn: &Connection) -> LineSweepResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}
