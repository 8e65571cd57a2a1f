//! Authentication and operator-account route handlers.
//!
//! Covers first-user bootstrap, login, refresh-token rotation, logout,
//! password change (which revokes every refresh token), and admin user
//! management with self-protection rules. Tokens ride in the response
//! body and in HttpOnly cookies.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::json;

use opsdec_core::{AuthUserId, Error, TokenId};
use opsdec_db::models::AuthUser;
use opsdec_db::pool::get_conn;
use opsdec_db::queries::{auth_users, refresh_tokens};

use crate::context::AppContext;
use crate::crypto;
use crate::server::auth::{authenticate, CurrentUser, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::server::error::AppError;

// ---------------------------------------------------------------------------
// payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub is_admin: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
}

/// Operator account as exposed by the API (no password hash).
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub email: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

impl From<AuthUser> for UserResponse {
    fn from(u: AuthUser) -> Self {
        Self {
            id: u.id.to_string(),
            username: u.username,
            is_admin: u.is_admin,
            is_active: u.is_active,
            email: u.email,
            created_at: u.created_at,
            last_login: u.last_login,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn validate_credentials(username: &Option<String>, password: &Option<String>) -> Result<(String, String), Error> {
    let (username, password) = match (username, password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u.trim().to_string(), p.clone()),
        _ => return Err(Error::Validation("Username and password are required".into())),
    };
    if username.len() < 3 {
        return Err(Error::Validation(
            "Username must be at least 3 characters".into(),
        ));
    }
    if password.len() < 8 {
        return Err(Error::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok((username, password))
}

fn build_cookie(name: &'static str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// Mint an access token and a refresh-token row for `user`, returning the
/// response body and the cookie jar with both HttpOnly cookies set.
fn issue_tokens(
    ctx: &AppContext,
    conn: &rusqlite::Connection,
    user: AuthUser,
    jar: CookieJar,
) -> Result<(TokenResponse, CookieJar), Error> {
    let access = ctx.tokens.mint_access(
        user.id,
        &user.username,
        user.is_admin,
        ctx.config.access_ttl_mins,
    )?;
    let refresh = refresh_tokens::create_token(conn, user.id, ctx.config.refresh_ttl_days)?;

    let secure = ctx.config.is_production();
    let jar = jar
        .add(build_cookie(
            ACCESS_COOKIE,
            access.clone(),
            ctx.config.access_ttl_mins * 60,
            secure,
        ))
        .add(build_cookie(
            REFRESH_COOKIE,
            refresh.id.to_string(),
            ctx.config.refresh_ttl_days * 86_400,
            secure,
        ));

    Ok((
        TokenResponse {
            user: user.into(),
            access_token: access,
            refresh_token: refresh.id.to_string(),
        },
        jar,
    ))
}

fn clear_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

// ---------------------------------------------------------------------------
// handlers
// ---------------------------------------------------------------------------

/// GET /api/auth/setup-required
pub async fn setup_required(
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let count = auth_users::count_users(&conn)?;
    Ok(Json(json!({ "setupRequired": count == 0 })))
}

/// POST /api/auth/register
///
/// Public while no account exists; afterwards only admins may add
/// accounts. The first registrant becomes an admin.
pub async fn register(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (username, password) = validate_credentials(&payload.username, &payload.password)?;

    let conn = get_conn(&ctx.db)?;
    let first_user = auth_users::count_users(&conn)? == 0;

    if !first_user {
        let caller = authenticate(&ctx, &headers);
        if !caller.map(|c| c.is_admin).unwrap_or(false) {
            return Err(Error::Unauthorized(
                "Only an admin can register additional users".into(),
            )
            .into());
        }
    }

    let hash = crypto::hash_password(&password)?;
    let user = auth_users::create_user(&conn, &username, &hash, first_user, payload.email.as_deref())?;

    tracing::info!(username = %user.username, admin = user.is_admin, "Operator account created");

    let (body, jar) = issue_tokens(&ctx, &conn, user, jar)?;
    Ok((StatusCode::CREATED, jar, Json(body)))
}

/// POST /api/auth/login
pub async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (username, password) = match (&payload.username, &payload.password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u.clone(), p.clone()),
        _ => {
            return Err(Error::Validation("Username and password are required".into()).into());
        }
    };

    let conn = get_conn(&ctx.db)?;
    let user = auth_users::get_user_by_username(&conn, &username)?
        .ok_or_else(|| Error::Unauthorized("Invalid username or password".into()))?;

    if !user.is_active {
        return Err(Error::Unauthorized("Account is disabled".into()).into());
    }
    if !crypto::verify_password(&password, &user.password_hash) {
        return Err(Error::Unauthorized("Invalid username or password".into()).into());
    }

    auth_users::update_last_login(&conn, user.id)?;
    let (body, jar) = issue_tokens(&ctx, &conn, user, jar)?;
    Ok((StatusCode::OK, jar, Json(body)))
}

/// POST /api/auth/refresh
///
/// Rotates the refresh token: the presented record is revoked and a new
/// one is issued alongside the fresh access token.
pub async fn refresh(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let presented = payload
        .and_then(|Json(p)| p.refresh_token)
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| Error::Validation("Refresh token required".into()))?;

    let invalid = || Error::Unauthorized("Invalid or expired refresh token".into());

    let token_id: TokenId = presented.parse().map_err(|_| invalid())?;

    let conn = get_conn(&ctx.db)?;
    let record = refresh_tokens::get_token(&conn, token_id)?.ok_or_else(invalid)?;

    if record.revoked || record.expires_at < chrono::Utc::now().to_rfc3339() {
        return Err(invalid().into());
    }

    let user = auth_users::get_user_by_id(&conn, record.user_id)?.ok_or_else(invalid)?;
    if !user.is_active {
        return Err(Error::Unauthorized("Account is disabled".into()).into());
    }

    refresh_tokens::revoke_token(&conn, token_id)?;
    let (body, jar) = issue_tokens(&ctx, &conn, user, jar)?;

    Ok((
        StatusCode::OK,
        jar,
        Json(json!({
            "accessToken": body.access_token,
            "refreshToken": body.refresh_token,
        })),
    ))
}

/// POST /api/auth/logout
///
/// Idempotent: succeeds with or without a refresh token.
pub async fn logout(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let presented = payload
        .and_then(|Json(p)| p.refresh_token)
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()));

    if let Some(token) = presented {
        if let Ok(token_id) = token.parse::<TokenId>() {
            let conn = get_conn(&ctx.db)?;
            let _ = refresh_tokens::revoke_token(&conn, token_id)?;
        }
    }

    let jar = jar
        .remove(clear_cookie(ACCESS_COOKIE))
        .remove(clear_cookie(REFRESH_COOKIE));

    Ok((StatusCode::OK, jar, Json(json!({"message": "Logged out"}))))
}

/// GET /api/auth/me
pub async fn me(
    State(ctx): State<AppContext>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let user = auth_users::get_user_by_id(&conn, current.id)?
        .ok_or_else(|| Error::Unauthorized("User no longer exists".into()))?;
    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

/// PUT /api/auth/password
///
/// Changing the password revokes every refresh token of the account,
/// forcing all other sessions to log in again.
pub async fn change_password(
    State(ctx): State<AppContext>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let current_password = payload
        .current_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::Validation("Current password is required".into()))?;
    let new_password = payload
        .new_password
        .ok_or_else(|| Error::Validation("New password is required".into()))?;

    if new_password.len() < 8 {
        return Err(Error::Validation("Password must be at least 8 characters".into()).into());
    }

    let conn = get_conn(&ctx.db)?;
    let user = auth_users::get_user_by_id(&conn, current.id)?
        .ok_or_else(|| Error::Unauthorized("User no longer exists".into()))?;

    if !crypto::verify_password(&current_password, &user.password_hash) {
        return Err(Error::Unauthorized("Current password is incorrect".into()).into());
    }

    let new_hash = crypto::hash_password(&new_password)?;
    auth_users::update_password(&conn, user.id, &new_hash)?;
    let revoked = refresh_tokens::revoke_all_for_user(&conn, user.id)?;
    tracing::info!(username = %user.username, revoked, "Password changed; refresh tokens revoked");

    Ok(Json(json!({"message": "Password changed"})))
}

// ---------------------------------------------------------------------------
// admin user management
// ---------------------------------------------------------------------------

/// GET /api/auth/users
pub async fn list_users(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;
    let users: Vec<UserResponse> = auth_users::list_users(&conn)?
        .into_iter()
        .map(UserResponse::from)
        .collect();
    Ok(Json(json!({ "users": users })))
}

/// POST /api/auth/users
pub async fn create_user(
    State(ctx): State<AppContext>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (username, password) = validate_credentials(&payload.username, &payload.password)?;

    let conn = get_conn(&ctx.db)?;
    let hash = crypto::hash_password(&password)?;
    let user = auth_users::create_user(
        &conn,
        &username,
        &hash,
        payload.is_admin.unwrap_or(false),
        payload.email.as_deref(),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": UserResponse::from(user) })),
    ))
}

/// PUT /api/auth/users/{id}
pub async fn update_user(
    State(ctx): State<AppContext>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id: AuthUserId = user_id
        .parse()
        .map_err(|_| Error::Validation("Invalid user id".into()))?;

    // Admin self-protection: an account cannot strip or disable itself.
    if id == current.id {
        if payload.is_admin == Some(false) {
            return Err(Error::Conflict("Cannot remove your own admin role".into()).into());
        }
        if payload.is_active == Some(false) {
            return Err(Error::Conflict("Cannot deactivate your own account".into()).into());
        }
    }

    if let Some(ref username) = payload.username {
        if username.len() < 3 {
            return Err(
                Error::Validation("Username must be at least 3 characters".into()).into(),
            );
        }
    }

    let conn = get_conn(&ctx.db)?;
    let user = auth_users::update_user(
        &conn,
        id,
        payload.username.as_deref(),
        payload.email.as_deref(),
        payload.is_active,
        payload.is_admin,
    )?
    .ok_or_else(|| Error::not_found("user", id))?;

    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

/// DELETE /api/auth/users/{id}
pub async fn delete_user(
    State(ctx): State<AppContext>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id: AuthUserId = user_id
        .parse()
        .map_err(|_| Error::Validation("Invalid user id".into()))?;

    if id == current.id {
        return Err(Error::Conflict("Cannot delete your own account".into()).into());
    }

    let conn = get_conn(&ctx.db)?;
    if !auth_users::delete_user(&conn, id)? {
        return Err(Error::not_found("user", id).into());
    }

    Ok(Json(json!({"message": "User deleted"})))
}
