//! The session engine: polls every enabled server on a fixed cadence,
//! reconciles the snapshots, and broadcasts the live set.
//!
//! Per-server fetches run concurrently under a bounded fan-out with a
//! per-adapter deadline. A failed or timed-out fetch contributes no
//! information to the cycle — its sessions are left untouched, so
//! upstream flakiness never falsely terminates a session. All database
//! mutations of one cycle share a single transaction.

pub mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use opsdec_core::{Result, UpstreamSession};
use opsdec_db::models::Server;
use opsdec_db::pool::{get_conn, DbPool};
use opsdec_db::queries::sessions;

use crate::adapters::adapter_for;
use crate::crypto::CredentialCipher;
use crate::hub::PushHub;
use reconcile::{reconcile_server_with_policy, HistoryPolicy};

/// Upper bound on simultaneous upstream polls.
const MAX_CONCURRENT_POLLS: usize = 4;

pub struct SessionEngine {
    db: DbPool,
    hub: Arc<PushHub>,
    cipher: Arc<CredentialCipher>,
    http: reqwest::Client,
    poll_interval: Duration,
    adapter_timeout: Duration,
    kick: Arc<Notify>,
}

impl SessionEngine {
    pub fn new(
        db: DbPool,
        hub: Arc<PushHub>,
        cipher: Arc<CredentialCipher>,
        http: reqwest::Client,
        poll_interval: Duration,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            db,
            hub,
            cipher,
            http,
            poll_interval,
            adapter_timeout,
            kick: Arc::new(Notify::new()),
        }
    }

    /// Handle for nudging the engine into an immediate cycle
    /// (`POST /monitoring/restart`).
    pub fn kick_handle(&self) -> Arc<Notify> {
        self.kick.clone()
    }

    /// Drive the poll loop until cancelled. Errors inside a cycle are
    /// logged and never stop the ticker.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            "Session engine started (poll every {:?}, adapter deadline {:?})",
            self.poll_interval,
            self.adapter_timeout
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.kick.notified() => {
                    tracing::info!("Immediate poll cycle requested");
                }
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!("Reconciliation cycle failed: {e}");
            }
        }

        tracing::info!("Session engine stopped");
    }

    /// One full cycle: fetch, reconcile, broadcast.
    pub async fn run_cycle(&self) -> Result<()> {
        let servers = {
            let conn = get_conn(&self.db)?;
            opsdec_db::queries::servers::list_enabled_servers(&conn)?
        };

        let results = self.fetch_all(servers).await;
        let now = chrono::Utc::now().timestamp();

        let conn = get_conn(&self.db)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| opsdec_core::Error::database(e.to_string()))?;

        let policy = HistoryPolicy::load(&tx)?;
        for (server, snapshot) in &results {
            let Some(snapshot) = snapshot else {
                // Failure means "no new information", never a stop.
                continue;
            };
            let outcome = reconcile_server_with_policy(&tx, server, snapshot, now, &policy)?;
            if outcome.started + outcome.stopped + outcome.recorded > 0 {
                tracing::debug!(
                    server = %server.name,
                    started = outcome.started,
                    updated = outcome.updated,
                    stopped = outcome.stopped,
                    recorded = outcome.recorded,
                    "Reconciled snapshot"
                );
            }
        }

        tx.commit()
            .map_err(|e| opsdec_core::Error::database(e.to_string()))?;

        let view = sessions::load_active_view(&conn)?;
        self.hub.broadcast(view);
        Ok(())
    }

    /// Poll every server concurrently (bounded); `None` marks a failed or
    /// timed-out fetch.
    async fn fetch_all(
        &self,
        servers: Vec<Server>,
    ) -> Vec<(Server, Option<Vec<UpstreamSession>>)> {
        let fetches = servers.into_iter().map(|server| {
            let cipher = self.cipher.clone();
            let http = self.http.clone();
            let deadline = self.adapter_timeout;
            async move {
                let credential = match cipher.decrypt(&server.credential) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(server = %server.name, "Credential decrypt failed: {e}");
                        return (server, None);
                    }
                };

                let adapter = adapter_for(server.kind, http);
                match tokio::time::timeout(deadline, adapter.fetch_sessions(&server, &credential))
                    .await
                {
                    Ok(Ok(list)) => (server, Some(list)),
                    Ok(Err(e)) => {
                        tracing::warn!(server = %server.name, "Session fetch failed: {e}");
                        (server, None)
                    }
                    Err(_) => {
                        tracing::warn!(server = %server.name, "Session fetch timed out");
                        (server, None)
                    }
                }
            }
        });

        futures::stream::iter(fetches)
            .buffer_unordered(MAX_CONCURRENT_POLLS)
            .collect()
            .await
    }
}
