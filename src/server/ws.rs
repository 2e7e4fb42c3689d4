//! WebSocket endpoint streaming log lines.
//!
//! Each upgraded socket is split in two: a writer task drains the
//! connection's outbound queue, and the upgrade future itself reads inbound
//! frames only to notice the peer going away.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::hub::{self, CloseReason, Connection, Registry};
use crate::server::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(%remote, error = %rejection, "WebSocket upgrade failed");
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(move |error| {
        tracing::warn!(%remote, %error, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| handle_socket(socket, remote, state))
}

/// Handles an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, remote: SocketAddr, state: Arc<AppState>) {
    let settings = state.connection;
    let (sender, receiver) = socket.split();
    let (conn, outbound) = Connection::new(remote, settings.queue_capacity, settings.overflow);

    if let Err(e) = state.registry.add(Arc::clone(&conn)) {
        tracing::error!(conn_id = %conn.id(), error = %e, "Failed to register client");
        return;
    }
    tracing::info!(conn_id = %conn.id(), %remote, "Client connected");

    let writer = tokio::spawn(write_loop(
        sender,
        outbound,
        Arc::clone(&conn),
        Arc::clone(&state.registry),
        settings.send_timeout,
    ));

    if let Some(reason) = read_loop(receiver, &conn).await {
        hub::close(&state.registry, conn.id(), reason);
    }

    if let Err(e) = writer.await {
        tracing::error!(conn_id = %conn.id(), error = %e, "Writer task failed");
    }
    tracing::debug!(conn_id = %conn.id(), "WebSocket connection released");
}

/// Reads until the peer leaves or the connection is closed from elsewhere.
///
/// Inbound payloads are ignored. Returns the reason when the peer side ended
/// the connection.
async fn read_loop<St, E>(mut receiver: St, conn: &Connection) -> Option<CloseReason>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        tokio::select! {
            _ = conn.closed() => return None,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | None => return Some(CloseReason::PeerClosed),
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::debug!(conn_id = %conn.id(), %error, "WebSocket read error");
                    return Some(CloseReason::ReadError);
                }
            },
        }
    }
}

/// Writes queued lines to the socket, one text frame per line.
async fn write_loop<S>(
    mut sender: S,
    mut outbound: mpsc::Receiver<Arc<str>>,
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = conn.closed() => break,
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let send = sender.send(Message::Text(payload.to_string()));
        match tokio::time::timeout(send_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(conn_id = %conn.id(), %error, "Error sending log to client");
                hub::close(&registry, conn.id(), CloseReason::SendFailed);
                break;
            }
            Err(_) => {
                tracing::warn!(
                    conn_id = %conn.id(),
                    timeout_ms = send_timeout.as_millis(),
                    "Timed out sending log to client"
                );
                hub::close(&registry, conn.id(), CloseReason::SendTimeout);
                break;
            }
        }
    }

    // Release the transport; the peer may already be gone
    let release = async {
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
    };
    let _ = tokio::time::timeout(send_timeout, release).await;
}
