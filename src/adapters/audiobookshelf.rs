//! Audiobookshelf session adapter.
//!
//! Reads `GET /api/sessions/open` with bearer auth. Audiobookshelf only
//! reports listening sessions, so everything it returns is audio and the
//! server does not distinguish pause from play in this listing; sessions
//! are reported as playing and disappear when the client stops or idles
//! out.

use serde::Deserialize;

use opsdec_core::{Error, MediaKind, PlaybackState, Result, UpstreamSession};
use opsdec_db::models::Server;

use super::{base_url, Adapter};

pub struct AudiobookshelfAdapter {
    client: reqwest::Client,
}

impl AudiobookshelfAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct OpenSessionsResponse {
    #[serde(default)]
    sessions: Vec<AbsSession>,
}

#[derive(Debug, Deserialize)]
struct AbsSession {
    id: String,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "libraryItemId")]
    library_item_id: Option<String>,
    #[serde(rename = "displayTitle")]
    display_title: Option<String>,
    #[serde(rename = "displayAuthor")]
    display_author: Option<String>,
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    duration: Option<f64>,
    #[serde(rename = "currentTime")]
    current_time: Option<f64>,
    user: Option<AbsUser>,
}

#[derive(Debug, Deserialize)]
struct AbsUser {
    username: Option<String>,
}

#[async_trait::async_trait]
impl Adapter for AudiobookshelfAdapter {
    async fn fetch_sessions(
        &self,
        server: &Server,
        credential: &str,
    ) -> Result<Vec<UpstreamSession>> {
        let url = format!("{}/api/sessions/open", base_url(server));
        let response = self
            .client
            .get(&url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| Error::upstream(&server.name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::upstream(
                &server.name,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: OpenSessionsResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(&server.name, format!("bad session payload: {e}")))?;

        let base = base_url(server);
        Ok(body
            .sessions
            .into_iter()
            .filter_map(|s| normalize(s, &base))
            .collect())
    }

    async fn test_connection(&self, server: &Server, credential: &str) -> Result<bool> {
        let url = format!("{}/ping", base_url(server));
        let response = self
            .client
            .get(&url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| Error::upstream(&server.name, e.to_string()))?;
        Ok(response.status().is_success())
    }
}

fn normalize(s: AbsSession, base: &str) -> Option<UpstreamSession> {
    let user_id = s.user_id?;
    let media_id = s.library_item_id.unwrap_or_default();

    let current_time = s.current_time.unwrap_or(0.0) as i64;
    let duration = s.duration.unwrap_or(0.0) as i64;
    let progress_percent = if duration > 0 {
        (current_time as f64 / duration as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let media_kind = match s.media_type.as_deref() {
        Some("podcast") => MediaKind::Track,
        _ => MediaKind::Audiobook,
    };

    let thumb_url = if media_id.is_empty() {
        None
    } else {
        Some(format!("{base}/api/items/{media_id}/cover"))
    };

    Some(UpstreamSession {
        session_key: s.id,
        user_id,
        username: s
            .user
            .and_then(|u| u.username)
            .unwrap_or_else(|| "unknown".into()),
        media_kind,
        media_id,
        title: s.display_title.unwrap_or_else(|| "Unknown".into()),
        grandparent_title: s.display_author,
        parent_title: None,
        season: None,
        episode: None,
        year: None,
        thumb_url,
        state: PlaybackState::Playing,
        progress_percent,
        current_time,
        duration,
        ip_address: None,
        geo_city: None,
        geo_country: None,
    })
}
