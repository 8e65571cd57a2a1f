//! Image proxy: serves upstream thumbnails through the local cache.
//!
//! Every outbound fetch is gated: the target must be http/https and its
//! host must either be on the configured avatar allow-list or the URL
//! must prefix-match a configured server's base URL (in which case the
//! server's decrypted credential rides along as a bearer header). On
//! upstream failure a stale cached copy is served when one exists.

use axum::extract::{Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use opsdec_core::Error;
use opsdec_db::models::Server;
use opsdec_db::pool::get_conn;
use opsdec_db::queries::{servers, settings};

use crate::context::AppContext;
use crate::server::error::AppError;

static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

/// GET /api/proxy/image?url=…
pub async fn proxy_image(
    State(ctx): State<AppContext>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, AppError> {
    let url = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::Validation("Image URL is required".into()))?;

    let host = host_of(&url).ok_or_else(|| Error::Validation("Invalid image URL".into()))?;

    let (allowed_hosts, max_age, known_servers) = {
        let conn = get_conn(&ctx.db)?;
        (
            settings::get_setting(&conn, "image_proxy_allowed_hosts")?.unwrap_or_default(),
            settings::get_setting_i64(&conn, "image_cache_max_age_secs", 2_592_000)?,
            servers::list_servers(&conn)?,
        )
    };

    let matched_server = known_servers
        .iter()
        .find(|s| url.starts_with(s.url.trim_end_matches('/')));

    if matched_server.is_none() && !host_allowed(&host, &allowed_hosts) {
        return Err(Error::Forbidden("Image host not allowed".into()).into());
    }

    // Fresh cache entry: serve directly.
    let cached = ctx.images.get(&url)?;
    let now = chrono::Utc::now().timestamp();
    if let Some(ref hit) = cached {
        if now - hit.created_at < max_age {
            return Ok(image_response(&hit.bytes, &hit.content_type, "HIT"));
        }
    }

    // Miss or stale: fetch upstream.
    match fetch_upstream(&ctx, &url, matched_server).await {
        Ok((bytes, content_type)) => {
            if let Err(e) = ctx.images.put(&url, &bytes, &content_type) {
                tracing::warn!("Failed to cache image for {url}: {e}");
            }
            Ok(image_response(&bytes, &content_type, "MISS"))
        }
        Err(e) => {
            if let Some(stale) = cached {
                tracing::debug!("Serving stale image for {url}: {e}");
                return Ok(image_response(&stale.bytes, &stale.content_type, "STALE"));
            }
            tracing::warn!("Image fetch failed for {url}: {e}");
            Err(Error::Internal(format!("Image fetch failed: {e}")).into())
        }
    }
}

async fn fetch_upstream(
    ctx: &AppContext,
    url: &str,
    matched_server: Option<&Server>,
) -> opsdec_core::Result<(Vec<u8>, String)> {
    let mut request = ctx.http.get(url);

    // A server-hosted thumbnail needs the upstream's credential.
    if let Some(server) = matched_server {
        let credential = ctx.cipher.decrypt(&server.credential)?;
        request = match server.kind {
            opsdec_core::ServerKind::Plex => request.header("X-Plex-Token", credential),
            opsdec_core::ServerKind::Emby | opsdec_core::ServerKind::Jellyfin => {
                request.header("X-Emby-Token", credential)
            }
            opsdec_core::ServerKind::Audiobookshelf => request.bearer_auth(credential),
        };
    }

    let deadline = std::time::Duration::from_secs(ctx.config.adapter_timeout_secs);
    let response = tokio::time::timeout(deadline, request.send())
        .await
        .map_err(|_| Error::upstream("image-proxy", "fetch timed out"))?
        .map_err(|e| Error::upstream("image-proxy", e.to_string()))?;

    if !response.status().is_success() {
        return Err(Error::upstream(
            "image-proxy",
            format!("HTTP {}", response.status()),
        ));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::upstream("image-proxy", e.to_string()))?;

    Ok((bytes.to_vec(), content_type))
}

fn image_response(bytes: &[u8], content_type: &str, cache_status: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.clone(), content_type.to_string()),
            (X_CACHE.clone(), cache_status.to_string()),
        ],
        bytes.to_vec(),
    )
        .into_response()
}

/// Extract the lowercase host from an http(s) URL, without the port.
fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    // Reject userinfo outright; nobody embeds credentials in poster URLs.
    if authority.contains('@') {
        return None;
    }
    let host = authority.rsplit_once(':').map_or(authority, |(h, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            authority
        }
    });
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// True when `host` equals an allow-list entry or is a subdomain of one.
fn host_allowed(host: &str, allowed_csv: &str) -> bool {
    allowed_csv
        .split(',')
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
}
