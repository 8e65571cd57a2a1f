//! Vendor adapters: fetch one upstream's live session list and normalize
//! it into [`UpstreamSession`] records.
//!
//! The engine only depends on the [`Adapter`] trait; each vendor's
//! response shapes live entirely inside its own module. The clients here
//! are deliberately thin — they cover the one endpoint the monitor needs
//! and map the handful of fields the normalized record carries.

mod audiobookshelf;
mod embyfin;
mod plex;

use std::sync::Arc;
use std::time::Duration;

use opsdec_core::{Result, ServerKind, UpstreamSession};
use opsdec_db::models::Server;

pub use audiobookshelf::AudiobookshelfAdapter;
pub use embyfin::EmbyfinAdapter;
pub use plex::PlexAdapter;

/// Connect timeout for upstream requests. The per-request deadline is
/// enforced by the engine on top of this.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One upstream vendor's session-listing client.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Fetch the current session list. `credential` is the decrypted
    /// upstream token.
    async fn fetch_sessions(
        &self,
        server: &Server,
        credential: &str,
    ) -> Result<Vec<UpstreamSession>>;

    /// Cheap liveness probe.
    async fn test_connection(&self, server: &Server, credential: &str) -> Result<bool>;
}

/// Build the adapter for a server kind. Emby and Jellyfin share a client;
/// their session APIs are wire-compatible for the fields we read.
pub fn adapter_for(kind: ServerKind, client: reqwest::Client) -> Arc<dyn Adapter> {
    match kind {
        ServerKind::Plex => Arc::new(PlexAdapter::new(client)),
        ServerKind::Emby | ServerKind::Jellyfin => Arc::new(EmbyfinAdapter::new(client)),
        ServerKind::Audiobookshelf => Arc::new(AudiobookshelfAdapter::new(client)),
    }
}

/// Shared HTTP client for all adapters.
pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeout: {e}");
            reqwest::Client::new()
        })
}

pub(crate) fn base_url(server: &Server) -> String {
    server.url.trim_end_matches('/').to_string()
}
