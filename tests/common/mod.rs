//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates an in-memory DB, a temp image
//! cache, and a full [`AppContext`]. The [`with_server`] constructor
//! starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Notify;

use opsdec::adapters::build_http_client;
use opsdec::context::AppContext;
use opsdec::crypto::{CredentialCipher, TokenSigner};
use opsdec::hub::PushHub;
use opsdec::images::ImageCache;
use opsdec::server::build_router;
use opsdec_core::config::Config;
use opsdec_db::pool::{init_memory_pool, DbPool, PooledConnection};

pub const TEST_TOKEN_SECRET: &str = "integration-test-secret";
pub const TEST_ENCRYPTION_KEY: &str = "integration-test-key";

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    _cache_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration and in-memory DB.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a new harness with a custom configuration and in-memory DB.
    pub fn with_config(config: Config) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let cache_dir = tempfile::tempdir().expect("failed to create cache dir");

        let ctx = AppContext {
            db: db.clone(),
            config: Arc::new(config),
            tokens: Arc::new(TokenSigner::new(TEST_TOKEN_SECRET)),
            cipher: Arc::new(CredentialCipher::new(TEST_ENCRYPTION_KEY)),
            images: Arc::new(
                ImageCache::new(cache_dir.path(), db.clone()).expect("failed to create cache"),
            ),
            hub: Arc::new(PushHub::default()),
            http: build_http_client(),
            engine_kick: Arc::new(Notify::new()),
        };

        Self {
            ctx,
            db,
            _cache_dir: cache_dir,
        }
    }

    /// Start an Axum server on a random port and return the harness
    /// together with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Get a database connection from the pool.
    pub fn conn(&self) -> PooledConnection {
        opsdec_db::pool::get_conn(&self.db).expect("failed to get db connection")
    }

    // -----------------------------------------------------------------------
    // Test data helpers
    // -----------------------------------------------------------------------

    /// Create an upstream server row with an encrypted credential.
    /// Returns the model including its id.
    pub fn create_upstream(
        &self,
        kind: opsdec_core::ServerKind,
        name: &str,
        url: &str,
        credential: &str,
    ) -> opsdec_db::models::Server {
        let encrypted = self.ctx.cipher.encrypt(credential).expect("encrypt failed");
        let conn = self.conn();
        opsdec_db::queries::servers::create_server(
            &conn, kind, name, url, &encrypted, true, "user",
        )
        .expect("failed to create upstream server")
    }

    /// Set a settings key directly.
    pub fn set_setting(&self, key: &str, value: &str) {
        let conn = self.conn();
        opsdec_db::queries::settings::set_setting(&conn, key, value)
            .expect("failed to set setting");
    }
}

/// Register the bootstrap admin over HTTP and return
/// (access token, refresh token).
pub async fn register_admin(
    client: &reqwest::Client,
    base: &str,
    username: &str,
    password: &str,
) -> (String, String) {
    let response = client
        .post(format!("{base}/api/auth/register"))
        .json(&serde_json::json!({"username": username, "password": password}))
        .send()
        .await
        .expect("register request failed");
    assert_eq!(response.status(), 201, "bootstrap register should succeed");

    let body: serde_json::Value = response.json().await.expect("bad register body");
    (
        body["accessToken"].as_str().expect("no accessToken").to_string(),
        body["refreshToken"].as_str().expect("no refreshToken").to_string(),
    )
}

/// Shorthand for a bearer-authenticated GET.
pub async fn get_with_token(
    client: &reqwest::Client,
    url: &str,
    token: &str,
) -> reqwest::Response {
    client
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .expect("request failed")
}
