//! WebSocket Front End
//!
//! Accepts socket upgrades on the configured server route and bridges
//! each socket to the actor: inbound text frames become
//! [`ServerEvent::SocketFrame`]s, outbound frames arrive on a
//! per-socket channel. The write half also runs the keep-alive: a Ping
//! every `ping_interval` carrying the `{serverId}` heartbeat payload,
//! with the peer's Pong due within `ping_timeout`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use roster_core::{encode_heartbeat, Heartbeat};

use crate::config::ServerConfig;
use crate::metrics::PresenceMetrics;
use crate::server::{ServerEvent, ServerHandle};

/// Accepts presence sockets until the listener fails.
pub async fn run(
    listener: TcpListener,
    config: ServerConfig,
    handle: ServerHandle,
    metrics: PresenceMetrics,
    server_id: String,
) {
    let next_socket = Arc::new(AtomicU64::new(1));
    while let Ok((stream, addr)) = listener.accept().await {
        let socket = next_socket.fetch_add(1, Ordering::Relaxed);
        let config = config.clone();
        let handle = handle.clone();
        let metrics = metrics.clone();
        let server_id = server_id.clone();
        tokio::spawn(async move {
            info!(socket, %addr, "socket connecting");
            handle_socket(stream, socket, config, handle, metrics, server_id).await;
            info!(socket, %addr, "socket finished");
        });
    }
}

async fn handle_socket(
    stream: TcpStream,
    socket: u64,
    config: ServerConfig,
    handle: ServerHandle,
    metrics: PresenceMetrics,
    server_id: String,
) {
    let server_route = config.server_route.clone();
    let callback = |request: &Request, response: Response| {
        if request.uri().path() == server_route {
            Ok(response)
        } else {
            debug!(path = %request.uri().path(), "rejecting upgrade on unknown route");
            let mut response = ErrorResponse::new(Some("not found".into()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Err(response)
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(err) => {
            error!(socket, error = %err, "socket handshake failed");
            return;
        }
    };
    metrics.connections_total.inc();
    metrics.connections_active.inc();

    let heartbeat = match encode_heartbeat(&Heartbeat { server_id }) {
        Ok(payload) => payload,
        Err(err) => {
            error!(socket, error = %err, "heartbeat payload encode failed");
            metrics.connections_active.dec();
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    handle.send(ServerEvent::SocketOpened {
        socket,
        tx: outbound_tx,
    });

    let (mut write, mut read) = ws_stream.split();
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let pong_deadline = tokio::time::sleep(config.ping_timeout);
    tokio::pin!(pong_deadline);
    let mut awaiting_pong = false;

    let reason: String = loop {
        tokio::select! {
            _ = ping.tick() => {
                if write.send(Message::Ping(heartbeat.clone())).await.is_err() {
                    break "transport close".into();
                }
                awaiting_pong = true;
                pong_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + config.ping_timeout);
            }
            _ = &mut pong_deadline, if awaiting_pong => {
                debug!(socket, "ping timeout");
                break "ping timeout".into();
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle.send(ServerEvent::SocketFrame { socket, text });
                }
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "transport close".into());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break err.to_string(),
                None => break "transport close".into(),
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(frame) => {
                    if write.send(Message::Text(frame)).await.is_err() {
                        break "transport close".into();
                    }
                }
                // Actor gone; the process is shutting down.
                None => break "server stopped".into(),
            },
        }
    };

    metrics.connections_active.dec();
    handle.send(ServerEvent::SocketClosed { socket, reason });
}
