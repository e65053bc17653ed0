//! Insert, update and delete operations for every collection.

use rusqlite::{Connection, params};
use thiserror::Error;

use crate::types::*;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Entity not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },
}

impl OperationError {
    pub fn not_found(entity_type: &str, id: &str) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

// ── Download Operations ─────────────────────────────────────────────────────

/// Create and persist a `starting` download for a remote game.
pub fn insert_download(conn: &Connection, game: &str) -> Result<DownloadRecord, OperationError> {
    let mut record = DownloadRecord::new(game);
    save_download(conn, &mut record)?;
    Ok(record)
}

/// Insert or update a download record, refreshing its `updated` stamp.
pub fn save_download(conn: &Connection, record: &mut DownloadRecord) -> Result<(), OperationError> {
    record.updated = now();
    conn.execute(
        "INSERT INTO downloads (id, game, status, progress, speed, total, text, active, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             game = excluded.game,
             status = excluded.status,
             progress = excluded.progress,
             speed = excluded.speed,
             total = excluded.total,
             text = excluded.text,
             active = excluded.active,
             updated = excluded.updated",
        params![
            record.id,
            record.game,
            record.status,
            record.progress,
            record.speed,
            record.total,
            record.text,
            record.active,
            record.created,
            record.updated,
        ],
    )?;
    Ok(())
}

/// Delete a download record. Returns whether a row was removed.
pub fn delete_download(conn: &Connection, id: &str) -> Result<bool, OperationError> {
    let n = conn.execute("DELETE FROM downloads WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

/// Clear the `active` flag on every download. Returns the number of rows
/// that were active.
pub fn deactivate_downloads(conn: &Connection) -> Result<usize, OperationError> {
    let n = conn.execute(
        "UPDATE downloads SET active = 0, updated = ?1 WHERE active != 0",
        params![now()],
    )?;
    Ok(n)
}

/// Move every non-terminal download back to `starting` so it replays
/// from the beginning. Returns the number of rows reset.
pub fn reset_unfinished_downloads(conn: &Connection) -> Result<usize, OperationError> {
    let n = conn.execute(
        "UPDATE downloads SET status = ?1, updated = ?2 WHERE status NOT IN (?3, ?4, ?1)",
        params![
            DownloadStatus::Starting,
            now(),
            DownloadStatus::Completed,
            DownloadStatus::Failed,
        ],
    )?;
    Ok(n)
}

// ── Client Game Operations ──────────────────────────────────────────────────

/// Insert or update an installed game, keyed by its remote game id.
pub fn upsert_client_game(conn: &Connection, game: &ClientGame) -> Result<(), OperationError> {
    let ts = now();
    conn.execute(
        "INSERT INTO games (id, game, path, executable, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(game) DO UPDATE SET
             path = excluded.path,
             executable = excluded.executable,
             updated = excluded.updated",
        params![game.id, game.game, game.path, game.executable, ts],
    )?;
    Ok(())
}

// ── Setting Operations ──────────────────────────────────────────────────────

/// Store a JSON value under `key`.
pub fn set_setting(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), OperationError> {
    let encoded = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, encoded],
    )?;
    Ok(())
}

// ── Catalog Operations ──────────────────────────────────────────────────────

/// Insert or update a catalog entry, keyed by `path`.
///
/// On conflict the existing row keeps its `id` and `created`; everything
/// else is overwritten. `record.updated` is refreshed.
pub fn save_game(conn: &Connection, record: &mut GameRecord) -> Result<(), OperationError> {
    record.updated = now();
    conn.execute(
        "INSERT INTO games (id, path, name, summary, released, rating, genres, version, provider,
                            provider_id, status, cover, artworks, screenshots, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(path) DO UPDATE SET
             name = excluded.name,
             summary = excluded.summary,
             released = excluded.released,
             rating = excluded.rating,
             genres = excluded.genres,
             version = excluded.version,
             provider = excluded.provider,
             provider_id = excluded.provider_id,
             status = excluded.status,
             cover = excluded.cover,
             artworks = excluded.artworks,
             screenshots = excluded.screenshots,
             updated = excluded.updated",
        params![
            record.id,
            record.path,
            record.name,
            record.summary,
            record.released,
            record.rating,
            serde_json::to_string(&record.genres)?,
            record.version,
            record.provider,
            record.provider_id,
            record.status,
            record.cover,
            serde_json::to_string(&record.artworks)?,
            serde_json::to_string(&record.screenshots)?,
            record.created,
            record.updated,
        ],
    )?;
    Ok(())
}

/// Set the status of the catalog entry at `path`.
pub fn set_game_status(
    conn: &Connection,
    path: &str,
    status: GameStatus,
) -> Result<(), OperationError> {
    let n = conn.execute(
        "UPDATE games SET status = ?1, updated = ?2 WHERE path = ?3",
        params![status, now(), path],
    )?;
    if n == 0 {
        return Err(OperationError::not_found("game", path));
    }
    Ok(())
}

// ── Status Operations ───────────────────────────────────────────────────────

/// Insert or update a status record.
pub fn save_status(conn: &Connection, status: &ScanStatus) -> Result<(), OperationError> {
    conn.execute(
        "INSERT INTO status (id, name, text, total, current)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             text = excluded.text,
             total = excluded.total,
             current = excluded.current",
        params![status.id, status.name, status.text, status.total, status.current],
    )?;
    Ok(())
}

/// Update only the `current` counter of a status record.
pub fn set_status_current(conn: &Connection, id: &str, current: u64) -> Result<(), OperationError> {
    conn.execute(
        "UPDATE status SET current = ?1 WHERE id = ?2",
        params![current, id],
    )?;
    Ok(())
}

pub fn delete_status(conn: &Connection, id: &str) -> Result<bool, OperationError> {
    let n = conn.execute("DELETE FROM status WHERE id = ?1", params![id])?;
    Ok(n > 0)
}
