//! Upstream server management routes.
//!
//! Credentials are encrypted before they touch the database and are never
//! echoed back through the API. Servers defined through the environment
//! are read-only here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opsdec_core::{Error, ServerId, ServerKind};
use opsdec_db::models::Server;
use opsdec_db::pool::get_conn;
use opsdec_db::queries::servers;

use crate::adapters::adapter_for;
use crate::context::AppContext;
use crate::server::error::AppError;

/// Server as exposed by the API; the credential never leaves the process.
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    pub id: String,
    pub kind: ServerKind,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub origin: String,
    pub created_at: String,
}

impl From<Server> for ServerResponse {
    fn from(s: Server) -> Self {
        Self {
            id: s.id.to_string(),
            kind: s.kind,
            name: s.name,
            url: s.url,
            enabled: s.enabled,
            origin: s.origin,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub credential: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub credential: Option<String>,
    pub enabled: Option<bool>,
}

fn validate_url(url: &str) -> Result<(), Error> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Validation(
            "Invalid server URL: must be http or https".into(),
        ));
    }
    Ok(())
}

fn parse_server_id(id: &str) -> Result<ServerId, Error> {
    id.parse()
        .map_err(|_| Error::Validation("Invalid server id".into()))
}

/// GET /api/servers
pub async fn list_servers(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let servers: Vec<ServerResponse> = servers::list_servers(&conn)?
        .into_iter()
        .map(ServerResponse::from)
        .collect();
    Ok(Json(json!({ "servers": servers })))
}

/// POST /api/servers
pub async fn create_server(
    State(ctx): State<AppContext>,
    Json(payload): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind: ServerKind = payload
        .kind
        .as_deref()
        .ok_or_else(|| Error::Validation("Server kind is required".into()))?
        .parse()?;
    let name = payload
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::Validation("Server name is required".into()))?;
    let url = payload
        .url
        .ok_or_else(|| Error::Validation("Server URL is required".into()))?;
    validate_url(&url)?;
    let credential = payload
        .credential
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Validation("Server credential is required".into()))?;

    let encrypted = ctx.cipher.encrypt(&credential)?;

    let conn = get_conn(&ctx.db)?;
    let server = servers::create_server(
        &conn,
        kind,
        name.trim(),
        url.trim_end_matches('/'),
        &encrypted,
        payload.enabled.unwrap_or(true),
        "user",
    )?;

    tracing::info!(name = %server.name, kind = %server.kind, "Server added");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "server": ServerResponse::from(server) })),
    ))
}

/// PUT /api/servers/{id}
pub async fn update_server(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateServerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_server_id(&id)?;

    let conn = get_conn(&ctx.db)?;
    let existing = servers::get_server(&conn, id)?.ok_or_else(|| Error::not_found("server", id))?;
    if existing.is_environment() {
        return Err(Error::Validation("Environment-defined servers are read-only".into()).into());
    }

    if let Some(ref url) = payload.url {
        validate_url(url)?;
    }

    let encrypted = match payload.credential.filter(|c| !c.is_empty()) {
        Some(c) => Some(ctx.cipher.encrypt(&c)?),
        None => None,
    };

    let server = servers::update_server(
        &conn,
        id,
        payload.name.as_deref(),
        payload.url.as_deref().map(|u| u.trim_end_matches('/')),
        encrypted.as_deref(),
        payload.enabled,
    )?
    .ok_or_else(|| Error::not_found("server", id))?;

    Ok(Json(json!({ "server": ServerResponse::from(server) })))
}

/// DELETE /api/servers/{id}
pub async fn delete_server(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_server_id(&id)?;

    let conn = get_conn(&ctx.db)?;
    let existing = servers::get_server(&conn, id)?.ok_or_else(|| Error::not_found("server", id))?;
    if existing.is_environment() {
        return Err(Error::Validation("Environment-defined servers are read-only".into()).into());
    }

    servers::delete_server(&conn, id)?;
    Ok(Json(json!({"message": "Server deleted"})))
}

/// POST /api/servers/{id}/test — probe one upstream.
pub async fn test_server(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_server_id(&id)?;

    let server = {
        let conn = get_conn(&ctx.db)?;
        servers::get_server(&conn, id)?.ok_or_else(|| Error::not_found("server", id))?
    };

    let ok = probe(&ctx, &server).await;
    Ok(Json(json!({ "ok": ok })))
}

/// GET /api/servers/health — probe every enabled upstream concurrently.
pub async fn servers_health(
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, AppError> {
    let servers = {
        let conn = get_conn(&ctx.db)?;
        servers::list_enabled_servers(&conn)?
    };

    let checks = servers.into_iter().map(|server| {
        let ctx = ctx.clone();
        async move {
            let ok = probe(&ctx, &server).await;
            json!({
                "id": server.id.to_string(),
                "name": server.name,
                "kind": server.kind,
                "ok": ok,
            })
        }
    });

    let results: Vec<_> = futures::stream::iter(checks)
        .buffer_unordered(4)
        .collect()
        .await;

    Ok(Json(json!({ "servers": results })))
}

/// Decrypt the credential and run the adapter's liveness probe. Any
/// failure is logged and reported as unhealthy, never surfaced.
async fn probe(ctx: &AppContext, server: &Server) -> bool {
    let credential = match ctx.cipher.decrypt(&server.credential) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(server = %server.name, "Credential decrypt failed: {e}");
            return false;
        }
    };

    let adapter = adapter_for(server.kind, ctx.http.clone());
    let deadline = std::time::Duration::from_secs(ctx.config.adapter_timeout_secs);
    match tokio::time::timeout(deadline, adapter.test_connection(server, &credential)).await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => {
            tracing::warn!(server = %server.name, "Health probe failed: {e}");
            false
        }
        Err(_) => {
            tracing::warn!(server = %server.name, "Health probe timed out");
            false
        }
    }
}
