//! Upstream server CRUD operations.

use chrono::Utc;
use rusqlite::Connection;
use opsdec_core::{Error, Result, ServerId, ServerKind};

use crate::models::Server;

const COLS: &str = "id, kind, name, url, credential, enabled, origin, created_at";

/// Create a new server row and return it.
pub fn create_server(
    conn: &Connection,
    kind: ServerKind,
    name: &str,
    url: &str,
    credential: &str,
    enabled: bool,
    origin: &str,
) -> Result<Server> {
    let id = ServerId::new();
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO servers (id, kind, name, url, credential, enabled, origin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id.to_string(),
            kind.as_str(),
            name,
            url,
            credential,
            enabled,
            origin,
            created_at
        ],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::Conflict(format!("Server '{name}' ({kind}) already exists"))
        } else {
            Error::database(e.to_string())
        }
    })?;

    Ok(Server {
        id,
        kind,
        name: name.to_string(),
        url: url.to_string(),
        credential: credential.to_string(),
        enabled,
        origin: origin.to_string(),
        created_at,
    })
}

/// Get a server by primary key.
pub fn get_server(conn: &Connection, id: ServerId) -> Result<Option<Server>> {
    let q = format!("SELECT {COLS} FROM servers WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Server::from_row);
    match result {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List all servers.
pub fn list_servers(conn: &Connection) -> Result<Vec<Server>> {
    let q = format!("SELECT {COLS} FROM servers ORDER BY name");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], Server::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// List enabled servers only; these are the ones the engine polls.
pub fn list_enabled_servers(conn: &Connection) -> Result<Vec<Server>> {
    let q = format!("SELECT {COLS} FROM servers WHERE enabled = 1 ORDER BY name");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], Server::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Update mutable server fields. `credential` is only overwritten when a
/// new one is supplied. Returns the updated row, or `None` if absent.
pub fn update_server(
    conn: &Connection,
    id: ServerId,
    name: Option<&str>,
    url: Option<&str>,
    credential: Option<&str>,
    enabled: Option<bool>,
) -> Result<Option<Server>> {
    if let Some(name) = name {
        conn.execute(
            "UPDATE servers SET name = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), name],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                Error::Conflict(format!("Server '{name}' already exists"))
            } else {
                Error::database(e.to_string())
            }
        })?;
    }
    if let Some(url) = url {
        conn.execute(
            "UPDATE servers SET url = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), url],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    if let Some(credential) = credential {
        conn.execute(
            "UPDATE servers SET credential = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), credential],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    if let Some(enabled) = enabled {
        conn.execute(
            "UPDATE servers SET enabled = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), enabled],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    get_server(conn, id)
}

/// Delete a server. Returns true if a row was deleted.
pub fn delete_server(conn: &Connection, id: ServerId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM servers WHERE id = ?1", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Insert or refresh a server defined through the environment.
///
/// Matched by (name, kind). Always marks the row `origin='environment'`
/// so the API keeps treating it as read-only.
pub fn upsert_environment_server(
    conn: &Connection,
    kind: ServerKind,
    name: &str,
    url: &str,
    credential: &str,
) -> Result<Server> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM servers WHERE name = ?1 AND kind = ?2",
            rusqlite::params![name, kind.as_str()],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(Error::database(other.to_string())),
        })?;

    match existing {
        Some(id_str) => {
            conn.execute(
                "UPDATE servers SET url = ?2, credential = ?3, origin = 'environment'
                 WHERE id = ?1",
                rusqlite::params![id_str, url, credential],
            )
            .map_err(|e| Error::database(e.to_string()))?;
            let id: ServerId = id_str
                .parse()
                .map_err(|_| Error::Internal("corrupt server id".into()))?;
            get_server(conn, id)?.ok_or_else(|| Error::not_found("server", id))
        }
        None => create_server(conn, kind, name, url, credential, true, "environment"),
    }
}
