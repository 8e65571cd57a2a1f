//! History record persistence and aggregates.

use rusqlite::Connection;
use serde::Serialize;
use opsdec_core::{Error, HistoryId, Result};

use crate::models::HistoryRecord;

const COLS: &str = "id, session_id, server_kind, user_id, username, media_kind, media_id, \
     title, grandparent_title, parent_title, season, episode, year, thumb_url, watched_at, \
     duration, percent_complete, stream_duration, ip_address, geo_city, geo_country";

/// Insert a history record if none exists for its (session_id, media_id)
/// pair. Returns true when a row was actually written, so the caller
/// knows whether to bump user counters.
pub fn insert_history(conn: &Connection, h: &HistoryRecord) -> Result<bool> {
    let n = conn
        .execute(
            "INSERT OR IGNORE INTO history
                (id, session_id, server_kind, user_id, username, media_kind, media_id,
                 title, grandparent_title, parent_title, season, episode, year, thumb_url,
                 watched_at, duration, percent_complete, stream_duration,
                 ip_address, geo_city, geo_country)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            rusqlite::params![
                h.id.to_string(),
                h.session_id.to_string(),
                h.server_kind.as_str(),
                h.user_id,
                h.username,
                h.media_kind.as_str(),
                h.media_id,
                h.title,
                h.grandparent_title,
                h.parent_title,
                h.season,
                h.episode,
                h.year,
                h.thumb_url,
                h.watched_at,
                h.duration,
                h.percent_complete,
                h.stream_duration,
                h.ip_address,
                h.geo_city,
                h.geo_country,
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Optional filters for the history listing.
#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    pub user_id: Option<String>,
    pub server_kind: Option<String>,
    pub media_id: Option<String>,
}

/// List history records, newest first, with limit/offset paging.
pub fn list_history(
    conn: &Connection,
    filter: &HistoryFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<HistoryRecord>> {
    let (clause, params) = filter_clause(filter);
    let q = format!(
        "SELECT {COLS} FROM history {clause} ORDER BY watched_at DESC LIMIT ?{} OFFSET ?{}",
        params.len() + 1,
        params.len() + 2
    );

    let mut all: Vec<Box<dyn rusqlite::types::ToSql>> = params;
    all.push(Box::new(limit));
    all.push(Box::new(offset));

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(all.iter().map(|p| p.as_ref())),
            HistoryRecord::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Count records matching a filter (for paging metadata).
pub fn count_history(conn: &Connection, filter: &HistoryFilter) -> Result<i64> {
    let (clause, params) = filter_clause(filter);
    let q = format!("SELECT COUNT(*) FROM history {clause}");
    conn.query_row(
        &q,
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

fn filter_clause(filter: &HistoryFilter) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut conds = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref user_id) = filter.user_id {
        params.push(Box::new(user_id.clone()));
        conds.push(format!("user_id = ?{}", params.len()));
    }
    if let Some(ref kind) = filter.server_kind {
        params.push(Box::new(kind.clone()));
        conds.push(format!("server_kind = ?{}", params.len()));
    }
    if let Some(ref media_id) = filter.media_id {
        params.push(Box::new(media_id.clone()));
        conds.push(format!("media_id = ?{}", params.len()));
    }

    if conds.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", conds.join(" AND ")), params)
    }
}

/// Delete a history record. Returns true if a row was deleted.
pub fn delete_history(conn: &Connection, id: HistoryId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM history WHERE id = ?1", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Per-user aggregate for `GET /users/:id/stats`.
#[derive(Debug, Serialize)]
pub struct UserStats {
    pub user_id: String,
    pub total_plays: i64,
    pub total_duration: i64,
    pub distinct_media: i64,
    pub last_watched_at: Option<i64>,
}

pub fn user_stats(conn: &Connection, user_id: &str) -> Result<UserStats> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(stream_duration), 0),
                COUNT(DISTINCT media_id), MAX(watched_at)
         FROM history WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(UserStats {
                user_id: user_id.to_string(),
                total_plays: row.get(0)?,
                total_duration: row.get(1)?,
                distinct_media: row.get(2)?,
                last_watched_at: row.get(3)?,
            })
        },
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// A (label, plays, duration) rollup row.
#[derive(Debug, Serialize)]
pub struct TopEntry {
    pub label: String,
    pub plays: i64,
    pub duration: i64,
}

/// Dashboard rollups for `GET /stats/dashboard`.
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_plays: i64,
    pub total_duration: i64,
    pub plays_last_24h: i64,
    pub active_sessions: i64,
    pub top_users: Vec<TopEntry>,
    pub top_media: Vec<TopEntry>,
}

pub fn dashboard_stats(conn: &Connection, now: i64) -> Result<DashboardStats> {
    let (total_plays, total_duration): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(stream_duration), 0) FROM history",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let plays_last_24h: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM history WHERE watched_at >= ?1",
            [now - 86_400],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let active_sessions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE state != 'stopped'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let top_users = top_query(
        conn,
        "SELECT username, COUNT(*), COALESCE(SUM(stream_duration), 0)
         FROM history GROUP BY user_id, username ORDER BY COUNT(*) DESC LIMIT 5",
    )?;
    let top_media = top_query(
        conn,
        "SELECT title, COUNT(*), COALESCE(SUM(stream_duration), 0)
         FROM history GROUP BY media_id, title ORDER BY COUNT(*) DESC LIMIT 5",
    )?;

    Ok(DashboardStats {
        total_plays,
        total_duration,
        plays_last_24h,
        active_sessions,
        top_users,
        top_media,
    })
}

fn top_query(conn: &Connection, q: &str) -> Result<Vec<TopEntry>> {
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TopEntry {
                label: row.get(0)?,
                plays: row.get(1)?,
                duration: row.get(2)?,
            })
        })
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;
    use crate::pool::init_memory_pool;
    use crate::queries::{servers, sessions};
    use opsdec_core::{MediaKind, PlaybackState, ServerKind, SessionId};

    fn seed_session(conn: &Connection) -> SessionId {
        let server = servers::create_server(
            conn,
            ServerKind::Plex,
            "h",
            "http://x",
            "c",
            true,
            "user",
        )
        .unwrap();
        let s = Session {
            id: SessionId::new(),
            server_id: server.id,
            session_key: "k".into(),
            user_id: "u1".into(),
            username: "alice".into(),
            media_kind: MediaKind::Movie,
            media_id: "m1".into(),
            title: "Film".into(),
            grandparent_title: None,
            parent_title: None,
            season: None,
            episode: None,
            year: None,
            thumb_url: None,
            state: PlaybackState::Stopped,
            progress_percent: 80.0,
            current_time: 4800,
            duration: 6000,
            started_at: 1000,
            updated_at: 5800,
            stopped_at: Some(5800),
            playback_time: 4800,
            last_position_update: Some(5800),
            paused_counter: 0,
            ip_address: None,
            geo_city: None,
            geo_country: None,
        };
        sessions::insert_session(conn, &s).unwrap();
        s.id
    }

    fn record(session_id: SessionId, media_id: &str, user_id: &str, watched_at: i64) -> HistoryRecord {
        HistoryRecord {
            id: HistoryId::new(),
            session_id,
            server_kind: ServerKind::Plex,
            user_id: user_id.into(),
            username: "alice".into(),
            media_kind: MediaKind::Movie,
            media_id: media_id.into(),
            title: "Film".into(),
            grandparent_title: None,
            parent_title: None,
            season: None,
            episode: None,
            year: None,
            thumb_url: None,
            watched_at,
            duration: 6000,
            percent_complete: 80.0,
            stream_duration: 4800,
            ip_address: None,
            geo_city: None,
            geo_country: None,
        }
    }

    #[test]
    fn insert_is_unique_per_session_media() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let sid = seed_session(&conn);

        assert!(insert_history(&conn, &record(sid, "m1", "u1", 5800)).unwrap());
        // same (session, media) pair is ignored
        assert!(!insert_history(&conn, &record(sid, "m1", "u1", 5900)).unwrap());
        // different media under the same session inserts
        assert!(insert_history(&conn, &record(sid, "m2", "u1", 5900)).unwrap());

        assert_eq!(count_history(&conn, &HistoryFilter::default()).unwrap(), 2);
    }

    #[test]
    fn list_pages_newest_first() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let sid = seed_session(&conn);

        for i in 0..5 {
            insert_history(&conn, &record(sid, &format!("m{i}"), "u1", 1000 + i)).unwrap();
        }

        let page = list_history(&conn, &HistoryFilter::default(), 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].watched_at, 1004);

        let next = list_history(&conn, &HistoryFilter::default(), 2, 2).unwrap();
        assert_eq!(next[0].watched_at, 1002);
    }

    #[test]
    fn filter_by_user() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let sid = seed_session(&conn);

        insert_history(&conn, &record(sid, "m1", "u1", 100)).unwrap();
        insert_history(&conn, &record(sid, "m2", "u2", 200)).unwrap();

        let filter = HistoryFilter {
            user_id: Some("u2".into()),
            ..Default::default()
        };
        let rows = list_history(&conn, &filter, 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "u2");
        assert_eq!(count_history(&conn, &filter).unwrap(), 1);
    }

    #[test]
    fn delete_and_missing() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let sid = seed_session(&conn);

        let r = record(sid, "m1", "u1", 100);
        insert_history(&conn, &r).unwrap();
        assert!(delete_history(&conn, r.id).unwrap());
        assert!(!delete_history(&conn, r.id).unwrap());
    }

    #[test]
    fn aggregates() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let sid = seed_session(&conn);

        insert_history(&conn, &record(sid, "m1", "u1", 1000)).unwrap();
        insert_history(&conn, &record(sid, "m2", "u1", 2000)).unwrap();

        let stats = user_stats(&conn, "u1").unwrap();
        assert_eq!(stats.total_plays, 2);
        assert_eq!(stats.total_duration, 9600);
        assert_eq!(stats.distinct_media, 2);
        assert_eq!(stats.last_watched_at, Some(2000));

        let dash = dashboard_stats(&conn, 2500).unwrap();
        assert_eq!(dash.total_plays, 2);
        assert_eq!(dash.plays_last_24h, 2);
        assert_eq!(dash.top_users.len(), 1);
        assert_eq!(dash.top_users[0].label, "alice");
    }
}
