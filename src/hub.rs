//! Push hub: fans live-session snapshots out to WebSocket subscribers.
//!
//! A thin wrapper over a `tokio::sync::broadcast` channel. The engine
//! publishes after every reconciliation cycle; each connected client task
//! holds a receiver. Slow clients lag and skip ahead to newer snapshots
//! (broadcast semantics) — the engine never blocks on delivery. The most
//! recent snapshot is retained so a newly-connected client sees state
//! immediately instead of waiting a poll interval.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use opsdec_core::ActiveSession;

/// Snapshot payload shared across subscribers without cloning per client.
pub type Snapshot = Arc<Vec<ActiveSession>>;

/// Frame sent to WebSocket clients.
#[derive(Debug, Serialize)]
pub struct SessionUpdateFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: &'a [ActiveSession],
}

impl<'a> SessionUpdateFrame<'a> {
    pub fn new(data: &'a [ActiveSession]) -> Self {
        Self {
            kind: "session.update",
            data,
        }
    }
}

pub struct PushHub {
    tx: broadcast::Sender<Snapshot>,
    latest: RwLock<Option<Snapshot>>,
}

impl PushHub {
    /// `capacity` bounds how many unconsumed snapshots a slow client may
    /// fall behind before it starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: RwLock::new(None),
        }
    }

    /// Subscribe to future snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.read().clone()
    }

    /// Publish a snapshot to all current subscribers. Send errors (no
    /// subscribers) are ignored.
    pub fn broadcast(&self, sessions: Vec<ActiveSession>) {
        let snapshot: Snapshot = Arc::new(sessions);
        *self.latest.write() = Some(snapshot.clone());
        let _ = self.tx.send(snapshot);
    }

    /// Number of currently-connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(16)
    }
}
