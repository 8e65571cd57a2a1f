//! Settings routes: process-wide key/value configuration.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use opsdec_core::Error;
use opsdec_db::pool::get_conn;
use opsdec_db::queries::settings;

use crate::context::AppContext;
use crate::server::error::AppError;

/// GET /api/settings — all settings as one object.
pub async fn list_settings(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let map: serde_json::Map<String, serde_json::Value> = settings::all_settings(&conn)?
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    Ok(Json(json!({ "settings": map })))
}

/// GET /api/settings/{key}
pub async fn get_setting(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let value = settings::get_setting(&conn, &key)?
        .ok_or_else(|| Error::not_found("setting", &key))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

/// PUT /api/settings — bulk update from a flat string map.
pub async fn put_settings(
    State(ctx): State<AppContext>,
    Json(payload): Json<std::collections::BTreeMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    if payload.is_empty() {
        return Err(Error::Validation("At least one setting is required".into()).into());
    }

    let conn = get_conn(&ctx.db)?;
    for (key, value) in &payload {
        settings::set_setting(&conn, key, value)?;
    }

    let map: serde_json::Map<String, serde_json::Value> = settings::all_settings(&conn)?
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    Ok(Json(json!({ "settings": map })))
}

#[derive(Debug, Deserialize)]
pub struct PutSettingRequest {
    pub value: Option<String>,
}

/// PUT /api/settings/{key}
pub async fn put_setting(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
    Json(payload): Json<PutSettingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let value = payload
        .value
        .ok_or_else(|| Error::Validation("A value is required".into()))?;

    let conn = get_conn(&ctx.db)?;
    settings::set_setting(&conn, &key, &value)?;
    Ok(Json(json!({ "key": key, "value": value })))
}
