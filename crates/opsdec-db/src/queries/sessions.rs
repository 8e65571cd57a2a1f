//! Playback session persistence.
//!
//! The session engine computes state transitions in memory on a loaded
//! [`Session`] and persists the result with [`update_session`]; the store
//! itself never interprets the state machine.

use rusqlite::Connection;
use opsdec_core::{ActiveSession, Error, Result, ServerId, SessionId};

use crate::models::Session;

pub const COLS: &str = "id, server_id, session_key, user_id, username, media_kind, media_id, \
     title, grandparent_title, parent_title, season, episode, year, thumb_url, state, \
     progress_percent, current_position, duration, started_at, updated_at, stopped_at, \
     playback_time, last_position_update, paused_counter, ip_address, geo_city, geo_country";

/// Insert a freshly-observed session row.
pub fn insert_session(conn: &Connection, s: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions
            (id, server_id, session_key, user_id, username, media_kind, media_id,
             title, grandparent_title, parent_title, season, episode, year, thumb_url,
             state, progress_percent, current_position, duration, started_at, updated_at,
             stopped_at, playback_time, last_position_update, paused_counter,
             ip_address, geo_city, geo_country)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,
                 ?21,?22,?23,?24,?25,?26,?27)",
        rusqlite::params![
            s.id.to_string(),
            s.server_id.to_string(),
            s.session_key,
            s.user_id,
            s.username,
            s.media_kind.as_str(),
            s.media_id,
            s.title,
            s.grandparent_title,
            s.parent_title,
            s.season,
            s.episode,
            s.year,
            s.thumb_url,
            s.state.as_str(),
            s.progress_percent,
            s.current_time,
            s.duration,
            s.started_at,
            s.updated_at,
            s.stopped_at,
            s.playback_time,
            s.last_position_update,
            s.paused_counter,
            s.ip_address,
            s.geo_city,
            s.geo_country,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Persist the mutable fields of a session after a reconciliation step.
/// `started_at` is immutable after insert and deliberately not written.
pub fn update_session(conn: &Connection, s: &Session) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET
            state = ?2, progress_percent = ?3, current_position = ?4, duration = ?5,
            updated_at = ?6, stopped_at = ?7, playback_time = ?8,
            last_position_update = ?9, paused_counter = ?10, ip_address = ?11,
            geo_city = ?12, geo_country = ?13, thumb_url = ?14
         WHERE id = ?1",
        rusqlite::params![
            s.id.to_string(),
            s.state.as_str(),
            s.progress_percent,
            s.current_time,
            s.duration,
            s.updated_at,
            s.stopped_at,
            s.playback_time,
            s.last_position_update,
            s.paused_counter,
            s.ip_address,
            s.geo_city,
            s.geo_country,
            s.thumb_url,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Get a session by primary key.
pub fn get_session(conn: &Connection, id: SessionId) -> Result<Option<Session>> {
    let q = format!("SELECT {COLS} FROM sessions WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Session::from_row);
    match result {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Load every non-stopped session.
pub fn load_active(conn: &Connection) -> Result<Vec<Session>> {
    let q = format!("SELECT {COLS} FROM sessions WHERE state != 'stopped'");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], Session::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Load the non-stopped sessions belonging to one server.
pub fn load_active_for_server(conn: &Connection, server_id: ServerId) -> Result<Vec<Session>> {
    let q = format!("SELECT {COLS} FROM sessions WHERE state != 'stopped' AND server_id = ?1");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([server_id.to_string()], Session::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Load the live set joined with server metadata, ready for the activity
/// endpoint and WebSocket snapshots.
pub fn load_active_view(conn: &Connection) -> Result<Vec<ActiveSession>> {
    let q = "SELECT s.id, s.server_id, sv.name, sv.kind, s.session_key, s.user_id, s.username,
                    s.media_kind, s.media_id, s.title, s.grandparent_title, s.parent_title,
                    s.season, s.episode, s.year, s.thumb_url, s.state, s.progress_percent,
                    s.current_position, s.duration, s.started_at, s.playback_time,
                    s.paused_counter, s.ip_address, s.geo_city, s.geo_country
             FROM sessions s
             JOIN servers sv ON sv.id = s.server_id
             WHERE s.state != 'stopped'
             ORDER BY s.started_at DESC";
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], active_from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

fn active_from_row(row: &rusqlite::Row) -> rusqlite::Result<ActiveSession> {
    use opsdec_core::MediaKind;

    let id: String = row.get(0)?;
    let server_id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let media_kind: String = row.get(7)?;
    let state: String = row.get(16)?;

    let parse_err = |idx: usize, e: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e)
    };

    Ok(ActiveSession {
        id: id.parse().map_err(|e| parse_err(0, Box::new(e)))?,
        server_id: server_id.parse().map_err(|e| parse_err(1, Box::new(e)))?,
        server_name: row.get(2)?,
        server_kind: kind.parse().map_err(|e| parse_err(3, Box::new(e)))?,
        session_key: row.get(4)?,
        user_id: row.get(5)?,
        username: row.get(6)?,
        media_kind: MediaKind::parse_lenient(&media_kind),
        media_id: row.get(8)?,
        title: row.get(9)?,
        grandparent_title: row.get(10)?,
        parent_title: row.get(11)?,
        season: row.get(12)?,
        episode: row.get(13)?,
        year: row.get(14)?,
        thumb_url: row.get(15)?,
        state: state.parse().map_err(|e| parse_err(16, Box::new(e)))?,
        progress_percent: row.get(17)?,
        current_time: row.get(18)?,
        duration: row.get(19)?,
        started_at: row.get(20)?,
        playback_time: row.get(21)?,
        paused_counter: row.get(22)?,
        ip_address: row.get(23)?,
        geo_city: row.get(24)?,
        geo_country: row.get(25)?,
    })
}
