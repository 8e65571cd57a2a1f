//! Upstream media-user tracking.

use rusqlite::Connection;
use opsdec_core::{Error, Result, ServerKind};

use crate::models::MediaUser;

const COLS: &str =
    "id, server_kind, username, thumb_url, last_seen, history_enabled, total_plays, total_duration";

/// Record an observation of an upstream user: create the row on first
/// sight, otherwise refresh username/thumbnail/last_seen. The
/// `history_enabled` flag and counters are preserved.
pub fn observe_user(
    conn: &Connection,
    kind: ServerKind,
    id: &str,
    username: &str,
    thumb_url: Option<&str>,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO media_users (id, server_kind, username, thumb_url, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id, server_kind) DO UPDATE SET
            username = excluded.username,
            thumb_url = COALESCE(excluded.thumb_url, media_users.thumb_url),
            last_seen = excluded.last_seen",
        rusqlite::params![id, kind.as_str(), username, thumb_url, now],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Get a user by its composite key.
pub fn get_user(conn: &Connection, kind: ServerKind, id: &str) -> Result<Option<MediaUser>> {
    let q = format!("SELECT {COLS} FROM media_users WHERE id = ?1 AND server_kind = ?2");
    let result = conn.query_row(&q, rusqlite::params![id, kind.as_str()], MediaUser::from_row);
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List all known users across servers, most recently seen first.
pub fn list_users(conn: &Connection) -> Result<Vec<MediaUser>> {
    let q = format!("SELECT {COLS} FROM media_users ORDER BY last_seen DESC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], MediaUser::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Toggle history recording for a user. Existing records are untouched.
pub fn set_history_enabled(
    conn: &Connection,
    kind: ServerKind,
    id: &str,
    enabled: bool,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE media_users SET history_enabled = ?3 WHERE id = ?1 AND server_kind = ?2",
            rusqlite::params![id, kind.as_str(), enabled],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Bump the per-user totals after a history insert. Runs inside the same
/// transaction as the insert.
pub fn increment_totals(
    conn: &Connection,
    kind: ServerKind,
    id: &str,
    plays: i64,
    duration: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE media_users SET total_plays = total_plays + ?3,
                                total_duration = total_duration + ?4
         WHERE id = ?1 AND server_kind = ?2",
        rusqlite::params![id, kind.as_str(), plays, duration],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}
