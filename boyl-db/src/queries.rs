//! Lookups and listings for every collection.

use rusqlite::{Connection, OptionalExtension, params};

use crate::operations::OperationError;
use crate::types::*;

const DOWNLOAD_COLUMNS: &str =
    "id, game, status, progress, speed, total, text, active, created, updated";

const GAME_COLUMNS: &str = "id, path, name, summary, released, rating, genres, version, provider,
     provider_id, status, cover, artworks, screenshots, created, updated";

// ── Downloads ───────────────────────────────────────────────────────────────

pub fn find_download(conn: &Connection, id: &str) -> Result<Option<DownloadRecord>, OperationError> {
    let sql = format!("SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE id = ?1");
    let result = conn.query_row(&sql, params![id], row_to_download);
    match result {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All download records, oldest first.
pub fn list_downloads(conn: &Connection) -> Result<Vec<DownloadRecord>, OperationError> {
    let sql = format!("SELECT {DOWNLOAD_COLUMNS} FROM downloads ORDER BY created, rowid");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_download)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn row_to_download(row: &rusqlite::Row<'_>) -> rusqlite::Result<DownloadRecord> {
    Ok(DownloadRecord {
        id: row.get(0)?,
        game: row.get(1)?,
        status: row.get(2)?,
        progress: row.get(3)?,
        speed: row.get(4)?,
        total: row.get(5)?,
        text: row.get(6)?,
        active: row.get(7)?,
        created: row.get(8)?,
        updated: row.get(9)?,
    })
}

// ── Client Games ────────────────────────────────────────────────────────────

/// Find the installed game for a remote game id.
pub fn find_client_game_by_remote(
    conn: &Connection,
    game: &str,
) -> Result<Option<ClientGame>, OperationError> {
    let found = conn
        .query_row(
            "SELECT id, game, path, executable FROM games WHERE game = ?1",
            params![game],
            |row| {
                Ok(ClientGame {
                    id: row.get(0)?,
                    game: row.get(1)?,
                    path: row.get(2)?,
                    executable: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

// ── Settings ────────────────────────────────────────────────────────────────

/// Read the JSON value stored under `key`, if any.
pub fn get_setting(
    conn: &Connection,
    key: &str,
) -> Result<Option<serde_json::Value>, OperationError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

pub fn find_game_by_path(conn: &Connection, path: &str) -> Result<Option<GameRecord>, OperationError> {
    let sql = format!("SELECT {GAME_COLUMNS} FROM games WHERE path = ?1");
    let result = conn.query_row(&sql, params![path], row_to_game);
    match result {
        Ok(r) => Ok(Some(r.into_record()?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All catalog entries, ordered by path.
pub fn list_games(conn: &Connection) -> Result<Vec<GameRecord>, OperationError> {
    let sql = format!("SELECT {GAME_COLUMNS} FROM games ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_game)?;
    let mut games = Vec::new();
    for row in rows {
        games.push(row?.into_record()?);
    }
    Ok(games)
}

/// A catalog row before its JSON columns are decoded.
struct GameRow {
    record: GameRecord,
    genres: String,
    artworks: String,
    screenshots: String,
}

impl GameRow {
    fn into_record(self) -> Result<GameRecord, OperationError> {
        let mut record = self.record;
        record.genres = decode_list(&self.genres)?;
        record.artworks = decode_list(&self.artworks)?;
        record.screenshots = decode_list(&self.screenshots)?;
        Ok(record)
    }
}

/// Decode a JSON string array; `null` reads as empty.
fn decode_list(text: &str) -> Result<Vec<String>, OperationError> {
    let list: Option<Vec<String>> = serde_json::from_str(text)?;
    Ok(list.unwrap_or_default())
}

fn row_to_game(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameRow> {
    Ok(GameRow {
        record: GameRecord {
            id: row.get(0)?,
            path: row.get(1)?,
            name: row.get(2)?,
            summary: row.get(3)?,
            released: row.get(4)?,
            rating: row.get(5)?,
            genres: Vec::new(),
            version: row.get(7)?,
            provider: row.get(8)?,
            provider_id: row.get(9)?,
            status: row.get(10)?,
            cover: row.get(11)?,
            artworks: Vec::new(),
            screenshots: Vec::new(),
            created: row.get(14)?,
            updated: row.get(15)?,
        },
        genres: row.get(6)?,
        artworks: row.get(12)?,
        screenshots: row.get(13)?,
    })
}

// ── Status ──────────────────────────────────────────────────────────────────

pub fn find_status(conn: &Connection, id: &str) -> Result<Option<ScanStatus>, OperationError> {
    let found = conn
        .query_row(
            "SELECT id, name, text, total, current FROM status WHERE id = ?1",
            params![id],
            |row| {
                Ok(ScanStatus {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    text: row.get(2)?,
                    total: row.get(3)?,
                    current: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}
