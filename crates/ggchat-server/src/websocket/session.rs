//! WebSocket session lifecycle: one task per connection, from admission
//! through removal.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use ggchat_auth::Rejection;
use ggchat_core::Identity;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{Payload, close_code};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_REJECTED_CREDENTIALS_TOTAL, WS_REJECTED_FULL_TOTAL,
};
use crate::router::{ConnectionState, MessageRouter};

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Shared connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Shared message router.
    pub router: Arc<MessageRouter>,
    /// Server limits and timings.
    pub config: Arc<ServerConfig>,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

fn close_message(code: u16) -> Message {
    let reason = match code {
        close_code::GOING_AWAY => "server shutting down",
        close_code::POLICY => "connection dropped",
        close_code::TRY_AGAIN_LATER => "server full",
        close_code::CREDENTIAL_INVALID => "credential invalid",
        _ => "",
    };
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Close an upgraded socket whose credential did not verify.
///
/// The close code is 4001 and the reason names the rejection, so a client
/// can tell an expired login from a dropped network.
pub async fn reject(mut socket: WebSocket, rejection: Rejection) {
    counter!(WS_REJECTED_CREDENTIALS_TOTAL).increment(1);
    info!(reason = %rejection, "credential rejected");
    let frame = Message::Close(Some(CloseFrame {
        code: close_code::CREDENTIAL_INVALID,
        reason: rejection.to_string().into(),
    }));
    let _ = socket.send(frame).await;
}

/// Run one verified connection until it closes.
///
/// 1. Admits the identity to the registry (or closes with 1013 when full)
/// 2. Greets the newcomer with a `connected as <name>` notice
/// 3. Spawns a writer draining the outbound queue, with periodic pings
/// 4. Routes inbound text frames in arrival order
/// 5. Removes the connection when the socket, heartbeat, or server ends it
#[instrument(skip_all, fields(subject = %identity.subject_id, conn_id = tracing::field::Empty))]
pub async fn run_session(ws: WebSocket, identity: Identity, ctx: SessionContext) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let config = ctx.config.clone();

    let (tx, mut rx) = mpsc::channel::<Payload>(config.send_queue_capacity.max(1));
    let Some(conn) = ctx.registry.admit(identity, tx) else {
        counter!(WS_REJECTED_FULL_TOTAL).increment(1);
        let _ = ws_tx.send(close_message(close_code::TRY_AGAIN_LATER)).await;
        return;
    };
    let _ = tracing::Span::current().record("conn_id", conn.id.as_str());

    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut state = ConnectionState::new();
    state.authenticate(conn.clone());
    let _ = ctx.router.welcome(&conn);

    // Outbound writer
    let writer_conn = conn.clone();
    let send_timeout = config.send_timeout();
    let ping_every = config.heartbeat_interval();
    let writer = tokio::spawn(async move {
        let mut ping = time::interval(ping_every);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                biased;
                () = writer_conn.closed() => break,
                msg = rx.recv() => {
                    let Some(payload) = msg else { break };
                    match time::timeout(send_timeout, ws_tx.send(Message::Text((&*payload).into()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(error = %e, "socket write failed");
                            writer_conn.close(close_code::NORMAL);
                            break;
                        }
                        Err(_) => {
                            warn!(timeout_ms = send_timeout.as_millis(), "socket write timed out");
                            writer_conn.close(close_code::POLICY);
                            break;
                        }
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        writer_conn.close(close_code::NORMAL);
                        break;
                    }
                }
            }
        }

        let _ = time::timeout(send_timeout, ws_tx.send(close_message(writer_conn.close_code()))).await;
    });

    // Inbound reader
    let heartbeat = run_heartbeat(
        conn.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        ctx.shutdown.clone(),
    );
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            () = conn.closed() => break,
            () = ctx.shutdown.cancelled() => {
                conn.close(close_code::GOING_AWAY);
                break;
            }
            result = &mut heartbeat => {
                match result {
                    HeartbeatResult::TimedOut => {
                        warn!(silent_secs = conn.last_pong_elapsed().as_secs(), "heartbeat timed out");
                        conn.close(close_code::POLICY);
                    }
                    HeartbeatResult::Cancelled if ctx.shutdown.is_cancelled() => {
                        conn.close(close_code::GOING_AWAY);
                    }
                    HeartbeatResult::Cancelled => {}
                }
                break;
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break;
                    }
                    None => break,
                };
                conn.mark_alive();
                match msg {
                    Message::Text(text) => {
                        let _ = ctx.router.dispatch(&state, text.as_str());
                    }
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            let _ = ctx.router.dispatch(&state, text);
                        }
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        debug!("client sent close frame");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup
    state.close();
    let _ = ctx.registry.remove(&conn.id);
    let abort = writer.abort_handle();
    if time::timeout(send_timeout, writer).await.is_err() {
        abort.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        code = conn.close_code(),
        dropped = conn.drop_count(),
        active = ctx.registry.count(),
        "connection closed"
    );
}
