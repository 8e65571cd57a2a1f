//! Shared application context.
//!
//! [`AppContext`] is constructed once in the composition root and handed
//! to every route handler via Axum state. It is cheaply cloneable because
//! it only holds `Arc`s and handles. There are no process-wide
//! singletons: tests build their own context around an in-memory pool.

use std::sync::Arc;

use tokio::sync::Notify;

use opsdec_core::config::Config;
use opsdec_db::pool::DbPool;

use crate::crypto::{CredentialCipher, TokenSigner};
use crate::hub::PushHub;
use crate::images::ImageCache;

#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool; the single source of truth for state.
    pub db: DbPool,
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// Access-token mint/verify.
    pub tokens: Arc<TokenSigner>,
    /// At-rest credential encryption.
    pub cipher: Arc<CredentialCipher>,
    /// Thumbnail cache behind the image proxy.
    pub images: Arc<ImageCache>,
    /// Live-session fan-out.
    pub hub: Arc<PushHub>,
    /// Outbound HTTP client shared by adapters and the image proxy.
    pub http: reqwest::Client,
    /// Nudges the session engine into an immediate cycle.
    pub engine_kick: Arc<Notify>,
}
