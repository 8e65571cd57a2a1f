//! Operator account CRUD operations.

use chrono::Utc;
use rusqlite::Connection;
use opsdec_core::{AuthUserId, Error, Result};

use crate::models::AuthUser;

const COLS: &str = "id, username, password_hash, is_admin, is_active, email, created_at, last_login";

/// How many operator accounts exist. Zero means setup is still required.
pub fn count_users(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM auth_users", [], |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))
}

/// Create a new operator account and return it.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    is_admin: bool,
    email: Option<&str>,
) -> Result<AuthUser> {
    let id = AuthUserId::new();
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO auth_users (id, username, password_hash, is_admin, is_active, email, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
        rusqlite::params![id.to_string(), username, password_hash, is_admin, email, created_at],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::Conflict(format!("Username '{username}' is already taken"))
        } else {
            Error::database(e.to_string())
        }
    })?;

    Ok(AuthUser {
        id,
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        is_admin,
        is_active: true,
        email: email.map(String::from),
        created_at,
        last_login: None,
    })
}

/// Get a user by primary key.
pub fn get_user_by_id(conn: &Connection, id: AuthUserId) -> Result<Option<AuthUser>> {
    let q = format!("SELECT {COLS} FROM auth_users WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], AuthUser::from_row);
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a user by username.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<AuthUser>> {
    let q = format!("SELECT {COLS} FROM auth_users WHERE username = ?1");
    let result = conn.query_row(&q, [username], AuthUser::from_row);
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List all operator accounts.
pub fn list_users(conn: &Connection) -> Result<Vec<AuthUser>> {
    let q = format!("SELECT {COLS} FROM auth_users ORDER BY created_at");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], AuthUser::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Replace a user's password hash.
pub fn update_password(conn: &Connection, id: AuthUserId, password_hash: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE auth_users SET password_hash = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), password_hash],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Update profile fields; each `Some` overwrites, each `None` is left
/// alone. Returns the updated row, or `None` if absent.
pub fn update_user(
    conn: &Connection,
    id: AuthUserId,
    username: Option<&str>,
    email: Option<&str>,
    is_active: Option<bool>,
    is_admin: Option<bool>,
) -> Result<Option<AuthUser>> {
    if let Some(username) = username {
        conn.execute(
            "UPDATE auth_users SET username = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), username],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                Error::Conflict(format!("Username '{username}' is already taken"))
            } else {
                Error::database(e.to_string())
            }
        })?;
    }
    if let Some(email) = email {
        conn.execute(
            "UPDATE auth_users SET email = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), email],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    if let Some(is_active) = is_active {
        conn.execute(
            "UPDATE auth_users SET is_active = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), is_active],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    if let Some(is_admin) = is_admin {
        conn.execute(
            "UPDATE auth_users SET is_admin = ?2 WHERE id = ?1",
            rusqlite::params![id.to_string(), is_admin],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    get_user_by_id(conn, id)
}

/// Stamp the last successful login time.
pub fn update_last_login(conn: &Connection, id: AuthUserId) -> Result<()> {
    conn.execute(
        "UPDATE auth_users SET last_login = ?2 WHERE id = ?1",
        rusqlite::params![id.to_string(), Utc::now().to_rfc3339()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Delete an operator account. Returns true if a row was deleted.
pub fn delete_user(conn: &Connection, id: AuthUserId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM auth_users WHERE id = ?1", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}
