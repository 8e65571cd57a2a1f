//! Normalized playback-session types exchanged between components.
//!
//! Every vendor adapter converts its upstream response into
//! [`UpstreamSession`]; the session engine, store, and push hub only ever
//! see this normalized shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::ids::{ServerId, SessionId};

// ---------------------------------------------------------------------------
// ServerKind
// ---------------------------------------------------------------------------

/// Vendor of an upstream media server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Plex,
    Emby,
    Jellyfin,
    Audiobookshelf,
}

impl ServerKind {
    /// Canonical lowercase name, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Plex => "plex",
            ServerKind::Emby => "emby",
            ServerKind::Jellyfin => "jellyfin",
            ServerKind::Audiobookshelf => "audiobookshelf",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plex" => Ok(ServerKind::Plex),
            "emby" => Ok(ServerKind::Emby),
            "jellyfin" => Ok(ServerKind::Jellyfin),
            "audiobookshelf" => Ok(ServerKind::Audiobookshelf),
            other => Err(Error::Validation(format!("Invalid server kind: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackState
// ---------------------------------------------------------------------------

/// State of a tracked playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }

    /// A session in this state still appears in the live view.
    pub fn is_live(&self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playing" => Ok(PlaybackState::Playing),
            "paused" => Ok(PlaybackState::Paused),
            "stopped" => Ok(PlaybackState::Stopped),
            other => Err(Error::Validation(format!(
                "Invalid playback state: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Kind of media being played. Unrecognized upstream kinds collapse to
/// [`MediaKind::Unknown`] rather than failing normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Episode,
    Track,
    Audiobook,
    Book,
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
            MediaKind::Track => "track",
            MediaKind::Audiobook => "audiobook",
            MediaKind::Book => "book",
            MediaKind::Unknown => "unknown",
        }
    }

    /// Audio content is exempt from the history progress-percent check.
    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Track | MediaKind::Audiobook | MediaKind::Book)
    }

    /// Parse a kind string leniently; anything unrecognized is `Unknown`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "movie" => MediaKind::Movie,
            "episode" => MediaKind::Episode,
            "track" => MediaKind::Track,
            "audiobook" => MediaKind::Audiobook,
            "book" => MediaKind::Book,
            _ => MediaKind::Unknown,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// UpstreamSession
// ---------------------------------------------------------------------------

/// One playback session as reported by an upstream server, normalized.
///
/// Produced by vendor adapters; consumed by the session engine. Optional
/// fields are genuinely optional upstream (e.g. music tracks have no
/// season/episode, Audiobookshelf reports no poster for podcasts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSession {
    /// The upstream's own session identifier, unique per server.
    pub session_key: String,
    /// The upstream's user identifier.
    pub user_id: String,
    /// Username snapshot at observation time.
    pub username: String,
    pub media_kind: MediaKind,
    /// The upstream's media identifier (rating key, item id, ...).
    pub media_id: String,
    pub title: String,
    /// Series title for episodes, artist for tracks, author for books.
    pub grandparent_title: Option<String>,
    /// Season title for episodes, album for tracks.
    pub parent_title: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub year: Option<i64>,
    /// Upstream thumbnail URL, proxied through the image cache for clients.
    pub thumb_url: Option<String>,
    pub state: PlaybackState,
    /// Position in the media, 0..=100.
    pub progress_percent: f64,
    /// Seconds into the media.
    pub current_time: i64,
    /// Total media duration in seconds; 0 when the upstream does not know.
    pub duration: i64,
    pub ip_address: Option<String>,
    pub geo_city: Option<String>,
    pub geo_country: Option<String>,
}

// ---------------------------------------------------------------------------
// ActiveSession
// ---------------------------------------------------------------------------

/// A live session as exposed by `GET /activity` and `session.update`
/// WebSocket frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: SessionId,
    pub server_id: ServerId,
    pub server_name: String,
    pub server_kind: ServerKind,
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
    pub current_time: i64,
    pub duration: i64,
    /// Epoch seconds when the session was first observed.
    pub started_at: i64,
    /// Accumulated effective seconds spent playing.
    pub playback_time: i64,
    pub paused_counter: i64,
    pub ip_address: Option<String>,
    pub geo_city: Option<String>,
    pub geo_country: Option<String>,
}
