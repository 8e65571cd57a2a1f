//! Activity, history, user, and dashboard route handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opsdec_core::{Error, HistoryId, ServerKind};
use opsdec_db::models::{HistoryRecord, MediaUser};
use opsdec_db::pool::get_conn;
use opsdec_db::queries::{history, media_users, sessions};

use crate::context::AppContext;
use crate::server::error::AppError;

/// GET /api/activity — the current live sessions.
pub async fn activity(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let sessions = sessions::load_active_view(&conn)?;
    Ok(Json(json!({ "sessions": sessions })))
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub user_id: Option<String>,
    pub server_kind: Option<String>,
    pub media_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub id: String,
    pub session_id: String,
    pub server_kind: ServerKind,
    pub user_id: String,
    pub username: String,
    pub media_kind: String,
    pub media_id: String,
    pub title: String,
    pub grandparent_title: Option<String>,
    pub parent_title: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub year: Option<i64>,
    pub watched_at: i64,
    pub duration: i64,
    pub percent_complete: f64,
    pub stream_duration: i64,
    pub ip_address: Option<String>,
    pub geo_city: Option<String>,
    pub geo_country: Option<String>,
}

impl From<HistoryRecord> for HistoryItem {
    fn from(h: HistoryRecord) -> Self {
        Self {
            id: h.id.to_string(),
            session_id: h.session_id.to_string(),
            server_kind: h.server_kind,
            user_id: h.user_id,
            username: h.username,
            media_kind: h.media_kind.as_str().to_string(),
            media_id: h.media_id,
            title: h.title,
            grandparent_title: h.grandparent_title,
            parent_title: h.parent_title,
            season: h.season,
            episode: h.episode,
            year: h.year,
            watched_at: h.watched_at,
            duration: h.duration,
            percent_complete: h.percent_complete,
            stream_duration: h.stream_duration,
            ip_address: h.ip_address,
            geo_city: h.geo_city,
            geo_country: h.geo_country,
        }
    }
}

/// GET /api/history — paged records, newest first.
pub async fn list_history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter = history::HistoryFilter {
        user_id: query.user_id,
        server_kind: query.server_kind,
        media_id: query.media_id,
    };

    let conn = get_conn(&ctx.db)?;
    let total = history::count_history(&conn, &filter)?;
    let items: Vec<HistoryItem> = history::list_history(&conn, &filter, limit, offset)?
        .into_iter()
        .map(HistoryItem::from)
        .collect();

    Ok(Json(json!({
        "items": items,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// DELETE /api/history/{id}
pub async fn delete_history(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id: HistoryId = id
        .parse()
        .map_err(|_| Error::Validation("Invalid history id".into()))?;

    let conn = get_conn(&ctx.db)?;
    if !history::delete_history(&conn, id)? {
        return Err(Error::not_found("history record", id).into());
    }
    Ok(Json(json!({"message": "History record deleted"})))
}

// ---------------------------------------------------------------------------
// users
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct MediaUserResponse {
    pub id: String,
    pub server_kind: ServerKind,
    pub username: String,
    pub thumb_url: Option<String>,
    pub last_seen: i64,
    pub history_enabled: bool,
    pub total_plays: i64,
    pub total_duration: i64,
}

impl From<MediaUser> for MediaUserResponse {
    fn from(u: MediaUser) -> Self {
        Self {
            id: u.id,
            server_kind: u.server_kind,
            username: u.username,
            thumb_url: u.thumb_url,
            last_seen: u.last_seen,
            history_enabled: u.history_enabled,
            total_plays: u.total_plays,
            total_duration: u.total_duration,
        }
    }
}

/// GET /api/users — upstream users seen across servers.
pub async fn list_media_users(
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let users: Vec<MediaUserResponse> = media_users::list_users(&conn)?
        .into_iter()
        .map(MediaUserResponse::from)
        .collect();
    Ok(Json(json!({ "users": users })))
}

/// GET /api/users/{id}/stats — history aggregates for one user.
pub async fn media_user_stats(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let stats = history::user_stats(&conn, &id)?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMediaUserRequest {
    pub server_kind: String,
    pub history_enabled: bool,
}

/// PUT /api/users/{id} — toggle history recording for a user.
pub async fn update_media_user(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateMediaUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind: ServerKind = payload.server_kind.parse()?;

    let conn = get_conn(&ctx.db)?;
    if !media_users::set_history_enabled(&conn, kind, &id, payload.history_enabled)? {
        return Err(Error::not_found("user", id).into());
    }

    let user = media_users::get_user(&conn, kind, &id)?
        .ok_or_else(|| Error::not_found("user", id))?;
    Ok(Json(json!({ "user": MediaUserResponse::from(user) })))
}

/// GET /api/stats/dashboard — global rollups.
pub async fn dashboard(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let stats = history::dashboard_stats(&conn, chrono::Utc::now().timestamp())?;
    Ok(Json(stats))
}
