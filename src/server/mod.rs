//! HTTP server: router construction and the small handlers that do not
//! warrant their own module.

pub mod auth;
pub mod error;
pub mod request_id;
pub mod routes_activity;
pub mod routes_auth;
pub mod routes_images;
pub mod routes_servers;
pub mod routes_settings;
pub mod routes_ws;

use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::server::auth::{admin_middleware, auth_middleware};
use crate::server::request_id::request_id_middleware;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Auth entry points -- reachable without a token.
    let public_routes = Router::new()
        .route("/auth/setup-required", get(routes_auth::setup_required))
        .route("/auth/register", post(routes_auth::register))
        .route("/auth/login", post(routes_auth::login))
        .route("/auth/refresh", post(routes_auth::refresh))
        .route("/auth/logout", post(routes_auth::logout));

    // Everything requiring a valid access token.
    let protected_routes = Router::new()
        .route("/auth/me", get(routes_auth::me))
        .route("/auth/password", put(routes_auth::change_password))
        // Activity & history
        .route("/activity", get(routes_activity::activity))
        .route("/history", get(routes_activity::list_history))
        .route("/history/{id}", delete(routes_activity::delete_history))
        // Upstream users
        .route("/users", get(routes_activity::list_media_users))
        .route("/users/{id}", put(routes_activity::update_media_user))
        .route("/users/{id}/stats", get(routes_activity::media_user_stats))
        .route("/stats/dashboard", get(routes_activity::dashboard))
        // Servers
        .route(
            "/servers",
            get(routes_servers::list_servers).post(routes_servers::create_server),
        )
        .route("/servers/health", get(routes_servers::servers_health))
        .route(
            "/servers/{id}",
            put(routes_servers::update_server).delete(routes_servers::delete_server),
        )
        .route("/servers/{id}/test", post(routes_servers::test_server))
        // Image proxy
        .route("/proxy/image", get(routes_images::proxy_image))
        // Settings
        .route(
            "/settings",
            get(routes_settings::list_settings).put(routes_settings::put_settings),
        )
        .route(
            "/settings/{key}",
            get(routes_settings::get_setting).put(routes_settings::put_setting),
        )
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    // Admin-only: operator management and engine control. The auth layer
    // is added last so it runs before the admin gate.
    let admin_routes = Router::new()
        .route(
            "/auth/users",
            get(routes_auth::list_users).post(routes_auth::create_user),
        )
        .route(
            "/auth/users/{id}",
            put(routes_auth::update_user).delete(routes_auth::delete_user),
        )
        .route("/monitoring/restart", post(restart_monitoring))
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    let api = public_routes.merge(protected_routes).merge(admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(routes_ws::ws_handler))
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// GET /health — unauthenticated liveness probe.
async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// POST /api/monitoring/restart — nudge the engine into an immediate
/// poll cycle.
async fn restart_monitoring(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.engine_kick.notify_one();
    tracing::info!("Monitoring restart requested");
    Json(json!({"message": "Monitoring restarted"}))
}
