//! Refresh-token operations.
//!
//! Refresh tokens are opaque server-tracked rows; the token the client
//! holds is just the row's UUID. A successful refresh requires the row to
//! be present, unrevoked, and unexpired.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use opsdec_core::{AuthUserId, Error, Result, TokenId};

use crate::models::RefreshToken;

const COLS: &str = "id, user_id, expires_at, revoked, created_at";

/// Create a new refresh token valid for `ttl_days`.
pub fn create_token(conn: &Connection, user_id: AuthUserId, ttl_days: i64) -> Result<RefreshToken> {
    let id = TokenId::new();
    let created_at = Utc::now().to_rfc3339();
    let expires_at = (Utc::now() + Duration::days(ttl_days)).to_rfc3339();

    conn.execute(
        "INSERT INTO refresh_tokens (id, user_id, expires_at, revoked, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        rusqlite::params![id.to_string(), user_id.to_string(), expires_at, created_at],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(RefreshToken {
        id,
        user_id,
        expires_at,
        revoked: false,
        created_at,
    })
}

/// Look up a token by id.
pub fn get_token(conn: &Connection, id: TokenId) -> Result<Option<RefreshToken>> {
    let q = format!("SELECT {COLS} FROM refresh_tokens WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], RefreshToken::from_row);
    match result {
        Ok(t) => Ok(Some(t)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Revoke a single token. Returns true if a live token was revoked.
pub fn revoke_token(conn: &Connection, id: TokenId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE id = ?1 AND revoked = 0",
            [id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Revoke every token belonging to a user (password change, forced
/// logout). Returns how many were revoked.
pub fn revoke_all_for_user(conn: &Connection, user_id: AuthUserId) -> Result<usize> {
    let n = conn
        .execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?1 AND revoked = 0",
            [user_id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Delete tokens whose expiry is in the past. RFC 3339 strings in UTC
/// compare lexicographically, so a string comparison suffices.
pub fn delete_expired(conn: &Connection, now: &str) -> Result<usize> {
    let n = conn
        .execute("DELETE FROM refresh_tokens WHERE expires_at < ?1", [now])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}
