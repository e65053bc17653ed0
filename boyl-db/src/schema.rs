//! SQLite schema creation and version checks.
//!
//! The client and the server keep separate databases with separate table
//! sets; both share the `schema_version` bookkeeping.

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: i32, found: i32 },
    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Which side of the system a database belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn schema_sql(self) -> &'static str {
        match self {
            Side::Client => CLIENT_SCHEMA_SQL,
            Side::Server => SERVER_SCHEMA_SQL,
        }
    }
}

/// Create all tables and indexes for `side` if they don't exist.
pub fn create_schema(conn: &Connection, side: Side) -> Result<(), SchemaError> {
    conn.execute_batch(VERSION_SQL)?;
    conn.execute_batch(side.schema_sql())?;
    set_schema_version(conn, CURRENT_VERSION)?;
    Ok(())
}

/// Open or create a database at the given path, creating parent
/// directories as needed.
pub fn open_database(path: &Path, side: Side) -> Result<Connection, SchemaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    let version = get_schema_version(&conn)?;
    if version == 0 {
        create_schema(&conn, side)?;
    } else {
        check_version(version)?;
    }

    Ok(conn)
}

/// Open an in-memory client database. Useful for testing.
pub fn open_memory_client() -> Result<Connection, SchemaError> {
    open_memory(Side::Client)
}

/// Open an in-memory server database. Useful for testing.
pub fn open_memory_server() -> Result<Connection, SchemaError> {
    open_memory(Side::Server)
}

fn open_memory(side: Side) -> Result<Connection, SchemaError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn, side)?;
    Ok(conn)
}

/// Get the current schema version, or 0 if no schema exists.
fn get_schema_version(conn: &Connection) -> Result<i32, SchemaError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), SchemaError> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Refuse a database whose recorded version differs from
/// `CURRENT_VERSION`. There is only one schema version so far, so any other
/// value means the file was written by a different build.
fn check_version(found: i32) -> Result<(), SchemaError> {
    if found != CURRENT_VERSION {
        return Err(SchemaError::VersionMismatch {
            expected: CURRENT_VERSION,
            found,
        });
    }
    Ok(())
}

const VERSION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const CLIENT_SCHEMA_SQL: &str = r#"
-- One row per requested download; the job state machine lives in `status`.
CREATE TABLE IF NOT EXISTS downloads (
    id TEXT PRIMARY KEY,
    game TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'starting',
    progress REAL NOT NULL DEFAULT 0,
    speed REAL NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    text TEXT NOT NULL DEFAULT '',
    active BOOLEAN NOT NULL DEFAULT 0,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_downloads_game ON downloads(game);

-- Installed games, keyed by the remote game id.
CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    game TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    executable TEXT NOT NULL DEFAULT '',
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

-- Process-wide settings; values are JSON documents.
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const SERVER_SCHEMA_SQL: &str = r#"
-- Catalog of archives found under the games directory.
CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT '',
    released TEXT,
    rating REAL NOT NULL DEFAULT 0,
    genres TEXT NOT NULL DEFAULT '[]',
    version TEXT NOT NULL DEFAULT '',
    provider TEXT NOT NULL DEFAULT '',
    provider_id TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    cover TEXT NOT NULL DEFAULT '',
    artworks TEXT NOT NULL DEFAULT '[]',
    screenshots TEXT NOT NULL DEFAULT '[]',
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_games_status ON games(status);

-- Progress of long-running server operations.
CREATE TABLE IF NOT EXISTS status (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    total INTEGER NOT NULL DEFAULT 0,
    current INTEGER NOT NULL DEFAULT 0
);
"#;
