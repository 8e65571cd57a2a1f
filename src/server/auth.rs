//! Authentication middleware.
//!
//! Accepts access tokens from an `Authorization: Bearer` header or the
//! `opsdec_access_token` HttpOnly cookie, verifies the signature, and
//! injects the resolved [`CurrentUser`] into request extensions. The
//! admin layer sits on top for admin-only route groups.

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use opsdec_core::AuthUserId;

use crate::context::AppContext;
use crate::crypto::TokenError;

/// Cookie carrying the short-lived access token.
pub const ACCESS_COOKIE: &str = "opsdec_access_token";
/// Cookie carrying the long-lived refresh-token id.
pub const REFRESH_COOKIE: &str = "opsdec_refresh_token";

/// The authenticated caller, resolved from verified token claims.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: AuthUserId,
    pub username: String,
    pub is_admin: bool,
}

/// Pull an access token from the Authorization header or cookie.
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(val) = auth.to_str() {
            if let Some(token) = val.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    if let Some(cookie) = headers.get(axum::http::header::COOKIE) {
        if let Ok(cookies_str) = cookie.to_str() {
            for part in cookies_str.split(';') {
                let part = part.trim();
                if let Some(value) = part.strip_prefix(&format!("{ACCESS_COOKIE}=")) {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

/// Resolve the caller from request headers, if a valid token is present.
pub fn authenticate(ctx: &AppContext, headers: &HeaderMap) -> Option<CurrentUser> {
    let token = extract_access_token(headers)?;
    let claims = ctx.tokens.verify(&token).ok()?;
    Some(CurrentUser {
        id: claims.sub,
        username: claims.username,
        is_admin: claims.is_admin,
    })
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({"error": message, "code": "unauthorized"})),
    )
        .into_response()
}

/// Authentication middleware. Applied to protected routes only.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let Some(token) = extract_access_token(request.headers()) else {
        return Err(unauthorized("Authentication required"));
    };

    let claims = match ctx.tokens.verify(&token) {
        Ok(c) => c,
        Err(TokenError::Expired) => return Err(unauthorized("Invalid or expired token")),
        Err(_) => return Err(unauthorized("Invalid token")),
    };

    request.extensions_mut().insert(CurrentUser {
        id: claims.sub,
        username: claims.username,
        is_admin: claims.is_admin,
    });

    Ok(next.run(request).await)
}

/// Admin gate. Must run after [`auth_middleware`].
pub async fn admin_middleware(
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let is_admin = request
        .extensions()
        .get::<CurrentUser>()
        .map(|u| u.is_admin)
        .unwrap_or(false);

    if !is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            axum::Json(json!({"error": "Admin access required", "code": "forbidden"})),
        )
            .into_response());
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        headers.insert(
            header::COOKIE,
            format!("{ACCESS_COOKIE}=cookie-token").parse().unwrap(),
        );
        assert_eq!(extract_access_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn cookie_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("other=1; {ACCESS_COOKIE}=tok; theme=dark")
                .parse()
                .unwrap(),
        );
        assert_eq!(extract_access_token(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn no_token_is_none() {
        let headers = HeaderMap::new();
        assert!(extract_access_token(&headers).is_none());
    }

    #[test]
    fn refresh_cookie_is_not_an_access_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("{REFRESH_COOKIE}=refresh-id").parse().unwrap(),
        );
        assert!(extract_access_token(&headers).is_none());
    }
}
