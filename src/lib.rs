//! opsdec: aggregating activity monitor for heterogeneous media servers.
//!
//! This crate ties the opsdec-* crates into a running server:
//!
//! - Axum-based HTTP API with token authentication and an image proxy
//! - Session engine polling every enabled upstream on a fixed cadence
//! - WebSocket fan-out of live session snapshots
//! - Housekeeping job runner and graceful shutdown with a WAL checkpoint

pub mod adapters;
pub mod context;
pub mod crypto;
pub mod engine;
pub mod hub;
pub mod images;
pub mod jobs;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use opsdec_core::config::Config;
use opsdec_db::pool::{checkpoint_truncate, get_conn};
use opsdec_db::queries::servers;

use crate::context::AppContext;
use crate::crypto::{CredentialCipher, TokenSigner};
use crate::engine::SessionEngine;
use crate::hub::PushHub;
use crate::images::ImageCache;

/// Start the opsdec server.
///
/// This is the composition root: it opens and migrates the database,
/// derives the crypto material, reconciles environment-defined servers,
/// wires Store → ImageCache → AuthCore → PushHub → SessionEngine, and
/// serves HTTP until a shutdown signal arrives. On shutdown it stops the
/// background tasks, waits briefly for them, and folds the WAL back into
/// the database file.
pub async fn start(config: Config) -> opsdec_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    std::fs::create_dir_all(&config.data_dir)?;

    let db_path = config.db_path();
    let existed = db_path.exists();
    let db = opsdec_db::pool::init_pool(&db_path.to_string_lossy())?;
    if existed {
        tracing::info!("Database opened (existing) at {}", db_path.display());
    } else {
        tracing::info!("Database created (new) at {}", db_path.display());
    }

    // Secrets: fall back to ephemeral material so the process always
    // starts, at the cost of sessions not surviving a restart.
    let token_secret = config.token_secret.clone().unwrap_or_else(|| {
        tracing::warn!("Deriving ephemeral token secret");
        crypto::generate_secret()
    });
    let encryption_key = config.encryption_key.clone().unwrap_or_else(|| {
        tracing::warn!("Deriving ephemeral encryption key");
        crypto::generate_secret()
    });

    let tokens = Arc::new(TokenSigner::new(&token_secret));
    let cipher = Arc::new(CredentialCipher::new(&encryption_key));

    // Environment-defined servers become read-only rows.
    {
        let conn = get_conn(&db)?;
        for bootstrap in &config.bootstrap_servers {
            let encrypted = cipher.encrypt(&bootstrap.token)?;
            let server = servers::upsert_environment_server(
                &conn,
                bootstrap.kind,
                &bootstrap.name,
                bootstrap.url.trim_end_matches('/'),
                &encrypted,
            )?;
            tracing::info!(name = %server.name, kind = %server.kind, "Environment server registered");
        }
    }

    let images = Arc::new(ImageCache::new(config.image_cache_dir(), db.clone())?);
    let hub = Arc::new(PushHub::default());
    let http = adapters::build_http_client();

    let engine = SessionEngine::new(
        db.clone(),
        hub.clone(),
        cipher.clone(),
        http.clone(),
        Duration::from_secs(config.poll_interval_secs.max(1)),
        Duration::from_secs(config.adapter_timeout_secs.max(1)),
    );
    let engine_kick = engine.kick_handle();

    let ctx = AppContext {
        db: db.clone(),
        config: Arc::new(config.clone()),
        tokens,
        cipher,
        images,
        hub,
        http,
        engine_kick,
    };

    // Cancellation token for graceful shutdown.
    let cancel = CancellationToken::new();

    let engine_handle = tokio::spawn(engine.run(cancel.clone()));
    let jobs_handle = tokio::spawn(jobs::run_job_runner(ctx.clone(), cancel.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| opsdec_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let app = server::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| opsdec_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| opsdec_core::Error::Internal(format!("Server error: {e}")))?;

    // Stop background tasks and give in-flight work a bounded window.
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = tokio::join!(engine_handle, jobs_handle);
    })
    .await;

    let conn = get_conn(&db)?;
    checkpoint_truncate(&conn)?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
