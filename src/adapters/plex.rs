//! Plex session adapter.
//!
//! Reads `GET /status/sessions` with `X-Plex-Token` auth. Plex reports
//! positions and durations in milliseconds and thumbnails as
//! server-relative paths.

use serde::Deserialize;

use opsdec_core::{Error, MediaKind, PlaybackState, Result, UpstreamSession};
use opsdec_db::models::Server;

use super::{base_url, Adapter};

pub struct PlexAdapter {
    client: reqwest::Client,
}

impl PlexAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    #[serde(rename = "MediaContainer")]
    container: MediaContainer,
}

#[derive(Debug, Deserialize, Default)]
struct MediaContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "sessionKey")]
    session_key: Option<String>,
    #[serde(rename = "ratingKey")]
    rating_key: Option<String>,
    #[serde(rename = "type")]
    media_type: Option<String>,
    title: Option<String>,
    #[serde(rename = "grandparentTitle")]
    grandparent_title: Option<String>,
    #[serde(rename = "parentTitle")]
    parent_title: Option<String>,
    #[serde(rename = "parentIndex")]
    parent_index: Option<i64>,
    index: Option<i64>,
    year: Option<i64>,
    thumb: Option<String>,
    #[serde(rename = "viewOffset")]
    view_offset: Option<i64>,
    duration: Option<i64>,
    #[serde(rename = "User")]
    user: Option<PlexUser>,
    #[serde(rename = "Player")]
    player: Option<PlexPlayer>,
}

#[derive(Debug, Deserialize)]
struct PlexUser {
    id: Option<serde_json::Value>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlexPlayer {
    state: Option<String>,
    address: Option<String>,
}

#[async_trait::async_trait]
impl Adapter for PlexAdapter {
    async fn fetch_sessions(
        &self,
        server: &Server,
        credential: &str,
    ) -> Result<Vec<UpstreamSession>> {
        let url = format!("{}/status/sessions", base_url(server));
        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", credential)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::upstream(&server.name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::upstream(
                &server.name,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: SessionsResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(&server.name, format!("bad session payload: {e}")))?;

        let base = base_url(server);
        Ok(body
            .container
            .metadata
            .into_iter()
            .filter_map(|m| normalize(m, &base))
            .collect())
    }

    async fn test_connection(&self, server: &Server, credential: &str) -> Result<bool> {
        let url = format!("{}/identity", base_url(server));
        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", credential)
            .send()
            .await
            .map_err(|e| Error::upstream(&server.name, e.to_string()))?;
        Ok(response.status().is_success())
    }
}

fn normalize(m: Metadata, base: &str) -> Option<UpstreamSession> {
    let session_key = m.session_key?;
    let user = m.user?;

    // Plex user ids arrive as either a number or a string depending on
    // server version.
    let user_id = match user.id {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    let state = match m.player.as_ref().and_then(|p| p.state.as_deref()) {
        Some("playing") | Some("buffering") => PlaybackState::Playing,
        Some("paused") => PlaybackState::Paused,
        Some("stopped") => PlaybackState::Stopped,
        _ => PlaybackState::Playing,
    };

    let current_time = m.view_offset.unwrap_or(0) / 1000;
    let duration = m.duration.unwrap_or(0) / 1000;
    let progress_percent = if duration > 0 {
        (current_time as f64 / duration as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    // Relative thumb paths need the server prefix; the proxy attaches the
    // token on fetch.
    let thumb_url = m.thumb.map(|t| {
        if t.starts_with("http") {
            t
        } else {
            format!("{base}{t}")
        }
    });

    Some(UpstreamSession {
        session_key,
        user_id,
        username: user.title.unwrap_or_else(|| "unknown".into()),
        media_kind: MediaKind::parse_lenient(m.media_type.as_deref().unwrap_or("")),
        media_id: m.rating_key.unwrap_or_default(),
        title: m.title.unwrap_or_else(|| "Unknown".into()),
        grandparent_title: m.grandparent_title,
        parent_title: m.parent_title,
        season: m.parent_index,
        episode: m.index,
        year: m.year,
        thumb_url,
        state,
        progress_percent,
        current_time,
        duration,
        ip_address: m.player.and_then(|p| p.address),
        geo_city: None,
        geo_country: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_millis_and_relative_thumb() {
        let m: Metadata = serde_json::from_value(serde_json::json!({
            "sessionKey": "17",
            "ratingKey": "5123",
            "type": "episode",
            "title": "Pilot",
            "grandparentTitle": "Some Show",
            "parentTitle": "Season 1",
            "parentIndex": 1,
            "index": 1,
            "year": 2019,
            "thumb": "/library/metadata/5123/thumb/1",
            "viewOffset": 90_000,
            "duration": 2_700_000,
            "User": {"id": 42, "title": "alice"},
            "Player": {"state": "paused", "address": "10.0.0.5"}
        }))
        .unwrap();

        let s = normalize(m, "http://plex:32400").unwrap();
        assert_eq!(s.session_key, "17");
        assert_eq!(s.user_id, "42");
        assert_eq!(s.media_kind, MediaKind::Episode);
        assert_eq!(s.state, PlaybackState::Paused);
        assert_eq!(s.current_time, 90);
        assert_eq!(s.duration, 2700);
        assert!((s.progress_percent - 3.333).abs() < 0.01);
        assert_eq!(
            s.thumb_url.as_deref(),
            Some("http://plex:32400/library/metadata/5123/thumb/1")
        );
        assert_eq!(s.ip_address.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn skips_entries_without_session_key() {
        let m: Metadata = serde_json::from_value(serde_json::json!({
            "title": "orphan", "User": {"id": 1, "title": "x"}
        }))
        .unwrap();
        assert!(normalize(m, "http://p").is_none());
    }

    #[test]
    fn string_user_id_accepted() {
        let m: Metadata = serde_json::from_value(serde_json::json!({
            "sessionKey": "1",
            "type": "movie",
            "title": "M",
            "User": {"id": "abc", "title": "bob"},
            "Player": {"state": "playing"}
        }))
        .unwrap();
        assert_eq!(normalize(m, "http://p").unwrap().user_id, "abc");
    }
}
