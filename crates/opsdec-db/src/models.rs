//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`, with the expected column order documented where it is
//! not obvious.

use std::str::FromStr;

use opsdec_core::{
    AuthUserId, HistoryId, MediaKind, PlaybackState, ServerId, ServerKind, SessionId, TokenId,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

/// Parse a domain enum stored as TEXT via its `FromStr`.
fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Server {
    pub id: ServerId,
    pub kind: ServerKind,
    pub name: String,
    pub url: String,
    /// Encrypted credential blob (base64). Never exposed through the API.
    pub credential: String,
    pub enabled: bool,
    /// 'user' or 'environment'. Environment rows are read-only via the API.
    pub origin: String,
    pub created_at: String,
}

impl Server {
    /// Column order: id, kind, name, url, credential, enabled, origin, created_at
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            kind: parse_enum(row, 1)?,
            name: row.get(2)?,
            url: row.get(3)?,
            credential: row.get(4)?,
            enabled: row.get(5)?,
            origin: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    pub fn is_environment(&self) -> bool {
        self.origin == "environment"
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub server_id: ServerId,
    pub session_key: String,
    pub user_id: String,
    pub username: String,
    pub media_kind: MediaKind,
    pub media_id: String,
    pub title: String,
    pub grandparent_title: Option<String>,
    pub parent_title: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub year: Option<i64>,
    pub thumb_url: Option<String>,
    pub state: PlaybackState,
    pub progress_percent: f64,
    /// Seconds into the media (stored as `current_position`).
    pub current_time: i64,
    pub duration: i64,
    pub started_at: i64,
    pub updated_at: i64,
    pub stopped_at: Option<i64>,
    pub playback_time: i64,
    pub last_position_update: Option<i64>,
    pub paused_counter: i64,
    pub ip_address: Option<String>,
    pub geo_city: Option<String>,
    pub geo_country: Option<String>,
}

impl Session {
    /// Column order matches [`crate::queries::sessions::COLS`].
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let kind: String = row.get(5)?;
        Ok(Self {
            id: parse_id(row, 0)?,
            server_id: parse_id(row, 1)?,
            session_key: row.get(2)?,
            user_id: row.get(3)?,
            username: row.get(4)?,
            media_kind: MediaKind::parse_lenient(&kind),
            media_id: row.get(6)?,
            title: row.get(7)?,
            grandparent_title: row.get(8)?,
            parent_title: row.get(9)?,
            season: row.get(10)?,
            episode: row.get(11)?,
            year: row.get(12)?,
            thumb_url: row.get(13)?,
            state: parse_enum(row, 14)?,
            progress_percent: row.get(15)?,
            current_time: row.get(16)?,
            duration: row.get(17)?,
            started_at: row.get(18)?,
            updated_at: row.get(19)?,
            stopped_at: row.get(20)?,
            playback_time: row.get(21)?,
            last_position_update: row.get(22)?,
            paused_counter: row.get(23)?,
            ip_address: row.get(24)?,
            geo_city: row.get(25)?,
            geo_country: row.get(26)?,
        })
    }
}

// ---------------------------------------------------------------------------
// HistoryRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub session_id: SessionId,
    pub server_kind: ServerKind,
    pub user_id: String,
    pub username: String,
    pub media_kind: MediaKind,
    pub media_id: String,
    pub title: String,
    pub grandparent_title: Option<String>,
    pub parent_title: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub year: Option<i64>,
    pub thumb_url: Option<String>,
    pub watched_at: i64,
    pub duration: i64,
    pub percent_complete: f64,
    pub stream_duration: i64,
    pub ip_address: Option<String>,
    pub geo_city: Option<String>,
    pub geo_country: Option<String>,
}

impl HistoryRecord {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let kind: String = row.get(5)?;
        Ok(Self {
            id: parse_id(row, 0)?,
            session_id: parse_id(row, 1)?,
            server_kind: parse_enum(row, 2)?,
            user_id: row.get(3)?,
            username: row.get(4)?,
            media_kind: MediaKind::parse_lenient(&kind),
            media_id: row.get(6)?,
            title: row.get(7)?,
            grandparent_title: row.get(8)?,
            parent_title: row.get(9)?,
            season: row.get(10)?,
            episode: row.get(11)?,
            year: row.get(12)?,
            thumb_url: row.get(13)?,
            watched_at: row.get(14)?,
            duration: row.get(15)?,
            percent_complete: row.get(16)?,
            stream_duration: row.get(17)?,
            ip_address: row.get(18)?,
            geo_city: row.get(19)?,
            geo_country: row.get(20)?,
        })
    }
}

// ---------------------------------------------------------------------------
// MediaUser
// ---------------------------------------------------------------------------

/// An upstream user, keyed by (id, server_kind).
#[derive(Debug, Clone)]
pub struct MediaUser {
    pub id: String,
    pub server_kind: ServerKind,
    pub username: String,
    pub thumb_url: Option<String>,
    pub last_seen: i64,
    pub history_enabled: bool,
    pub total_plays: i64,
    pub total_duration: i64,
}

impl MediaUser {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            server_kind: parse_enum(row, 1)?,
            username: row.get(2)?,
            thumb_url: row.get(3)?,
            last_seen: row.get(4)?,
            history_enabled: row.get(5)?,
            total_plays: row.get(6)?,
            total_duration: row.get(7)?,
        })
    }
}

// ---------------------------------------------------------------------------
// AuthUser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: AuthUserId,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub email: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

impl AuthUser {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            is_admin: row.get(3)?,
            is_active: row.get(4)?,
            email: row.get(5)?,
            created_at: row.get(6)?,
            last_login: row.get(7)?,
        })
    }
}

// ---------------------------------------------------------------------------
// RefreshToken
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: TokenId,
    pub user_id: AuthUserId,
    pub expires_at: String,
    pub revoked: bool,
    pub created_at: String,
}

impl RefreshToken {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            user_id: parse_id(row, 1)?,
            expires_at: row.get(2)?,
            revoked: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// ImageCacheEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ImageCacheEntry {
    /// SHA-256 of the normalized source URL, lowercase hex.
    pub url_hash: String,
    pub original_url: String,
    /// Path relative to the cache directory.
    pub file_path: String,
    pub content_type: String,
    pub file_size: i64,
    pub created_at: i64,
    pub last_accessed_at: i64,
}

impl ImageCacheEntry {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            url_hash: row.get(0)?,
            original_url: row.get(1)?,
            file_path: row.get(2)?,
            content_type: row.get(3)?,
            file_size: row.get(4)?,
            created_at: row.get(5)?,
            last_accessed_at: row.get(6)?,
        })
    }
}
