//! Emby / Jellyfin session adapter.
//!
//! Both servers expose `GET /Sessions` with `X-Emby-Token` auth and
//! identical field names for everything the monitor reads. Sessions
//! without a `NowPlayingItem` are idle consoles and are skipped.
//! Positions arrive as ticks (100ns units).

use serde::Deserialize;

use opsdec_core::{Error, MediaKind, PlaybackState, Result, UpstreamSession};
use opsdec_db::models::Server;

use super::{base_url, Adapter};

const TICKS_PER_SECOND: i64 = 10_000_000;

pub struct EmbyfinAdapter {
    client: reqwest::Client,
}

impl EmbyfinAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct EmbySession {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "UserId")]
    user_id: Option<String>,
    #[serde(rename = "UserName")]
    user_name: Option<String>,
    #[serde(rename = "RemoteEndPoint")]
    remote_end_point: Option<String>,
    #[serde(rename = "NowPlayingItem")]
    now_playing: Option<NowPlayingItem>,
    #[serde(rename = "PlayState")]
    play_state: Option<PlayState>,
}

#[derive(Debug, Deserialize)]
struct NowPlayingItem {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Type")]
    item_type: Option<String>,
    #[serde(rename = "SeriesName")]
    series_name: Option<String>,
    #[serde(rename = "SeasonName")]
    season_name: Option<String>,
    #[serde(rename = "ParentIndexNumber")]
    parent_index: Option<i64>,
    #[serde(rename = "IndexNumber")]
    index: Option<i64>,
    #[serde(rename = "ProductionYear")]
    year: Option<i64>,
    #[serde(rename = "RunTimeTicks")]
    runtime_ticks: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct PlayState {
    #[serde(rename = "PositionTicks")]
    position_ticks: Option<i64>,
    #[serde(rename = "IsPaused", default)]
    is_paused: bool,
}

#[async_trait::async_trait]
impl Adapter for EmbyfinAdapter {
    async fn fetch_sessions(
        &self,
        server: &Server,
        credential: &str,
    ) -> Result<Vec<UpstreamSession>> {
        let url = format!("{}/Sessions", base_url(server));
        let response = self
            .client
            .get(&url)
            .header("X-Emby-Token", credential)
            .send()
            .await
            .map_err(|e| Error::upstream(&server.name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::upstream(
                &server.name,
                format!("HTTP {}", response.status()),
            ));
        }

        let sessions: Vec<EmbySession> = response
            .json()
            .await
            .map_err(|e| Error::upstream(&server.name, format!("bad session payload: {e}")))?;

        let base = base_url(server);
        Ok(sessions
            .into_iter()
            .filter_map(|s| normalize(s, &base))
            .collect())
    }

    async fn test_connection(&self, server: &Server, credential: &str) -> Result<bool> {
        let url = format!("{}/System/Info/Public", base_url(server));
        let response = self
            .client
            .get(&url)
            .header("X-Emby-Token", credential)
            .send()
            .await
            .map_err(|e| Error::upstream(&server.name, e.to_string()))?;
        Ok(response.status().is_success())
    }
}

fn normalize(s: EmbySession, base: &str) -> Option<UpstreamSession> {
    let item = s.now_playing?;
    let user_id = s.user_id?;
    let play_state = s.play_state.unwrap_or_default();

    let state = if play_state.is_paused {
        PlaybackState::Paused
    } else {
        PlaybackState::Playing
    };

    let current_time = play_state.position_ticks.unwrap_or(0) / TICKS_PER_SECOND;
    let duration = item.runtime_ticks.unwrap_or(0) / TICKS_PER_SECOND;
    let progress_percent = if duration > 0 {
        (current_time as f64 / duration as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    // RemoteEndPoint is "ip:port"; IPv6 peers keep the raw value.
    let ip_address = s.remote_end_point.map(|ep| match ep.rsplit_once(':') {
        Some((ip, port)) if port.chars().all(|c| c.is_ascii_digit()) && ip.matches(':').count() == 0 => {
            ip.to_string()
        }
        _ => ep,
    });

    let thumb_url = Some(format!("{base}/Items/{}/Images/Primary", item.id));

    Some(UpstreamSession {
        session_key: s.id,
        user_id,
        username: s.user_name.unwrap_or_else(|| "unknown".into()),
        media_kind: MediaKind::parse_lenient(
            &item.item_type.as_deref().unwrap_or("").to_lowercase(),
        ),
        media_id: item.id,
        title: item.name.unwrap_or_else(|| "Unknown".into()),
        grandparent_title: item.series_name,
        parent_title: item.season_name,
        season: item.parent_index,
        episode: item.index,
        year: item.year,
        thumb_url,
        state,
        progress_percent,
        current_time,
        duration,
        ip_address,
        geo_city: None,
        geo_country: None,
    })
}
