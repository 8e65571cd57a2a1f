//! Live-session WebSocket endpoint.
//!
//! Clients connect to `/ws?token=<access token>`. The upgrade always
//! completes so a close code can be delivered: 4001 when no token was
//! supplied, 4003 when verification fails. Authenticated sockets get the
//! latest snapshot immediately, then a `session.update` frame after every
//! reconciliation cycle. Lagged receivers skip to newer snapshots; the
//! engine is never blocked by a slow client.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::context::AppContext;
use crate::hub::{SessionUpdateFrame, Snapshot};

/// Close code: no token supplied.
const CLOSE_NO_TOKEN: u16 = 4001;
/// Close code: token failed verification.
const CLOSE_BAD_TOKEN: u16 = 4003;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws
pub async fn ws_handler(
    State(ctx): State<AppContext>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, query.token))
}

async fn handle_socket(mut socket: WebSocket, ctx: AppContext, token: Option<String>) {
    let Some(token) = token else {
        close(socket, CLOSE_NO_TOKEN, "Authentication required").await;
        return;
    };

    let claims = match ctx.tokens.verify(&token) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("WebSocket auth rejected: {e}");
            close(socket, CLOSE_BAD_TOKEN, "Invalid token").await;
            return;
        }
    };

    tracing::debug!(username = %claims.username, "WebSocket client connected");

    let mut rx = ctx.hub.subscribe();

    // New clients see current state without waiting for the next cycle.
    if let Some(latest) = ctx.hub.latest() {
        if send_snapshot(&mut socket, &latest).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(snapshot) => {
                    if send_snapshot(&mut socket, &snapshot).await.is_err() {
                        break;
                    }
                }
                // Fell behind: newer snapshots supersede missed ones.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound frames (pings, client chatter) are ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(username = %claims.username, "WebSocket client disconnected");
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &Snapshot) -> Result<(), axum::Error> {
    let frame = SessionUpdateFrame::new(snapshot);
    let text = match serde_json::to_string(&frame) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to serialize session snapshot: {e}");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}

async fn close(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
