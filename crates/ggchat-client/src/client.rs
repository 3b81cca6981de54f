//! Reconnecting relay client.
//!
//! [`RelayClient::spawn`] starts a driver task that owns the socket. The
//! returned handle sends commands to the driver; everything the driver
//! observes comes back as [`ClientEvent`]s on a channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ggchat_core::backoff::ReconnectPolicy;
use ggchat_core::{Command, OutboundFrame, PollId, Vote};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use crate::errors::ClientError;
use crate::reconnect::{DisconnectReason, ReconnectController, ReconnectDecision, ReconnectTimer};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client settings.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Relay WebSocket URL without the token, e.g. `ws://host:8800/ws`.
    pub url: String,
    /// Backoff policy.
    pub policy: ReconnectPolicy,
    /// How long to wait for the server's first frame after the upgrade.
    pub admission_timeout: Duration,
    /// Depth of the event and command channels.
    pub channel_capacity: usize,
}

impl ClientConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            admission_timeout: Duration::from_secs(10),
            channel_capacity: 256,
        }
    }

    fn connect_url(&self, credential: &str) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}token={credential}", self.url)
    }
}

/// Something the driver observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Admitted by the server.
    Connected,
    /// A frame from the server.
    Frame(OutboundFrame),
    /// The connection ended.
    Disconnected(DisconnectReason),
    /// Waiting `delay` before attempt `attempt`.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// The server refused the credential; log in again. Terminal.
    CredentialRejected(String),
    /// Reconnect attempts exhausted. Terminal.
    Exhausted,
}

#[derive(Debug)]
enum ClientCommand {
    Send(String),
    Disconnect,
}

/// Handle to a running client driver.
#[derive(Debug)]
pub struct RelayClient {
    cmd_tx: mpsc::Sender<ClientCommand>,
    driver: JoinHandle<()>,
}

impl RelayClient {
    /// Start connecting with `credential`.
    pub fn spawn(config: ClientConfig, credential: String) -> (Self, mpsc::Receiver<ClientEvent>) {
        let capacity = config.channel_capacity.max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let driver = tokio::spawn(drive(config, credential, cmd_rx, event_tx));
        (Self { cmd_tx, driver }, event_rx)
    }

    /// Send a chat line.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(ClientCommand::Send(text.into())).await
    }

    /// Create a poll.
    pub async fn create_poll(&self, question: impl Into<String>) -> Result<(), ClientError> {
        self.send_command(&Command::PollCreate {
            question: question.into(),
        })
        .await
    }

    /// Vote on a poll.
    pub async fn vote(&self, poll_id: PollId, vote: Vote) -> Result<(), ClientError> {
        self.send_command(&Command::PollVote { poll_id, vote }).await
    }

    /// Ask who is online.
    pub async fn presence(&self) -> Result<(), ClientError> {
        self.send_command(&Command::Presence).await
    }

    /// Disconnect and cancel any pending reconnect.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(ClientCommand::Disconnect).await
    }

    /// Wait for the driver to stop.
    pub async fn join(self) {
        let _ = self.driver.await;
    }

    /// Whether the driver has stopped.
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    async fn send_command(&self, command: &Command) -> Result<(), ClientError> {
        let json = serde_json::to_string(command)?;
        self.command(ClientCommand::Send(json)).await
    }

    async fn command(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// How one connection attempt ended.
enum Attempt {
    /// Never admitted.
    Failed(DisconnectReason),
    /// Admitted, then ended.
    Ended(DisconnectReason),
}

#[instrument(skip_all, fields(url = %config.url))]
async fn drive(
    config: ClientConfig,
    credential: String,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<ClientEvent>,
) {
    let mut controller = ReconnectController::new(config.policy);

    loop {
        let attempt = connect_once(&config, &credential, &mut controller, &mut cmd_rx, &events).await;
        let admitted = matches!(attempt, Attempt::Ended(_));
        let reason = match attempt {
            Attempt::Failed(reason) => reason,
            Attempt::Ended(reason) => {
                let _ = events.send(ClientEvent::Disconnected(reason.clone())).await;
                reason
            }
        };

        match controller.on_disconnect(reason.clone()) {
            ReconnectDecision::Suppressed => {
                match reason {
                    DisconnectReason::CredentialInvalid(why) => {
                        let _ = events.send(ClientEvent::CredentialRejected(why)).await;
                    }
                    DisconnectReason::UserInitiated if !admitted => {
                        let _ = events.send(ClientEvent::Disconnected(reason)).await;
                    }
                    _ => {}
                }
                return;
            }
            ReconnectDecision::GiveUp { attempts } => {
                info!(attempts, "giving up");
                let _ = events.send(ClientEvent::Exhausted).await;
                return;
            }
            ReconnectDecision::Retry { attempt, delay } => {
                let _ = events
                    .send(ClientEvent::Reconnecting { attempt, delay })
                    .await;
                if !wait_for_retry(delay, &mut cmd_rx).await {
                    let _ = controller.on_disconnect(DisconnectReason::UserInitiated);
                    let _ = events
                        .send(ClientEvent::Disconnected(DisconnectReason::UserInitiated))
                        .await;
                    return;
                }
            }
        }
    }
}

/// Sleep out a backoff delay. Returns `false` if the user disconnected.
async fn wait_for_retry(delay: Duration, cmd_rx: &mut mpsc::Receiver<ClientCommand>) -> bool {
    let timer = ReconnectTimer::start(delay);
    loop {
        tokio::select! {
            fired = timer.fired() => return fired,
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send(_)) => warn!("not connected, dropping outbound frame"),
                Some(ClientCommand::Disconnect) | None => {
                    timer.cancel();
                    return false;
                }
            },
        }
    }
}

async fn connect_once(
    config: &ClientConfig,
    credential: &str,
    controller: &mut ReconnectController,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    events: &mpsc::Sender<ClientEvent>,
) -> Attempt {
    // Upgrade plus first frame share one deadline; commands stay live meanwhile
    let handshake = time::timeout(config.admission_timeout, open(config, credential));
    tokio::pin!(handshake);
    let (ws, first) = loop {
        tokio::select! {
            opened = &mut handshake => match opened {
                Ok(Ok(opened)) => break opened,
                Ok(Err(reason)) => return Attempt::Failed(reason),
                Err(_) => {
                    return Attempt::Failed(DisconnectReason::Network("no response from server".into()));
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send(_)) => warn!("still connecting, dropping outbound frame"),
                Some(ClientCommand::Disconnect) | None => {
                    debug!("disconnect requested during handshake");
                    return Attempt::Failed(DisconnectReason::UserInitiated);
                }
            },
        }
    };

    controller.on_connected();
    let _ = events.send(ClientEvent::Connected).await;
    if let Some(frame) = first {
        let _ = events.send(ClientEvent::Frame(frame)).await;
    }

    Attempt::Ended(run_connection(ws, cmd_rx, events).await)
}

/// Upgrade and read the first frame, which decides admission: a notice,
/// or a close.
async fn open(
    config: &ClientConfig,
    credential: &str,
) -> Result<(WsStream, Option<OutboundFrame>), DisconnectReason> {
    let (mut ws, _) = connect_async(config.connect_url(credential))
        .await
        .map_err(|e| {
            debug!(error = %e, "connect failed");
            DisconnectReason::Network(e.to_string())
        })?;
    let first = next_message(&mut ws).await?;
    Ok((ws, first))
}

/// Next data frame, or the reason the socket ended.
async fn next_message(ws: &mut WsStream) -> Result<Option<OutboundFrame>, DisconnectReason> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(decode(text.as_str())),
            Some(Ok(Message::Close(frame))) => return Err(close_reason(frame)),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(DisconnectReason::Network(e.to_string())),
            None => return Err(DisconnectReason::Network("connection closed".into())),
        }
    }
}

fn decode(text: &str) -> Option<OutboundFrame> {
    match serde_json::from_str(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(error = %e, "ignoring unrecognized frame");
            None
        }
    }
}

fn close_reason(frame: Option<CloseFrame>) -> DisconnectReason {
    match frame {
        Some(frame) => DisconnectReason::from_close(u16::from(frame.code), frame.reason.as_str()),
        None => DisconnectReason::ServerClosed {
            code: 1005,
            reason: String::new(),
        },
    }
}

async fn run_connection(
    ws: WsStream,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    events: &mpsc::Sender<ClientEvent>,
) -> DisconnectReason {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = decode(text.as_str()) {
                        let _ = events.send(ClientEvent::Frame(frame)).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => return close_reason(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => return DisconnectReason::Network(e.to_string()),
                None => return DisconnectReason::Network("connection closed".into()),
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        return DisconnectReason::Network(e.to_string());
                    }
                }
                Some(ClientCommand::Disconnect) | None => {
                    let bye = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static(""),
                    };
                    let _ = sink.send(Message::Close(Some(bye))).await;
                    return DisconnectReason::UserInitiated;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_url_appends_token() {
        let cfg = ClientConfig::new("ws://localhost:8800/ws");
        assert_eq!(cfg.connect_url("abc"), "ws://localhost:8800/ws?token=abc");
        let cfg = ClientConfig::new("ws://localhost:8800/ws?v=1");
        assert_eq!(cfg.connect_url("abc"), "ws://localhost:8800/ws?v=1&token=abc");
    }

    #[test]
    fn close_frames_map_to_reasons() {
        let frame = CloseFrame {
            code: CloseCode::from(4001),
            reason: "credential expired".into(),
        };
        assert_eq!(
            close_reason(Some(frame)),
            DisconnectReason::CredentialInvalid("credential expired".into())
        );
        assert_eq!(
            close_reason(None),
            DisconnectReason::ServerClosed {
                code: 1005,
                reason: String::new()
            }
        );
    }

    #[test]
    fn unknown_frames_are_skipped() {
        assert_eq!(decode(r#"{"type":"mystery"}"#), None);
        assert_eq!(
            decode(r#"{"type":"system_notice","text":"hi"}"#),
            Some(OutboundFrame::notice("hi"))
        );
    }

    #[tokio::test]
    async fn unreachable_server_exhausts_attempts() {
        let config = ClientConfig {
            policy: ReconnectPolicy {
                base_delay_secs: 0,
                max_delay_secs: 0,
                max_attempts: 2,
            },
            ..ClientConfig::new("ws://127.0.0.1:1/ws")
        };
        let (client, mut events) = RelayClient::spawn(config, "token".into());

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ClientEvent::Reconnecting {
                    attempt: 1,
                    delay: Duration::ZERO
                },
                ClientEvent::Reconnecting {
                    attempt: 2,
                    delay: Duration::ZERO
                },
                ClientEvent::Exhausted,
            ]
        );
        assert!(client.send_text("late").await.is_err());
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_retry() {
        let config = ClientConfig {
            policy: ReconnectPolicy {
                base_delay_secs: 30,
                max_delay_secs: 60,
                max_attempts: 10,
            },
            ..ClientConfig::new("ws://127.0.0.1:1/ws")
        };
        let (client, mut events) = RelayClient::spawn(config, "token".into());
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(60)
            })
        );

        client.disconnect().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Disconnected(DisconnectReason::UserInitiated))
        );
        tokio::time::timeout(Duration::from_secs(5), client.join())
            .await
            .unwrap();
    }

    /// Listener that accepts TCP connections and never answers the upgrade.
    async fn silent_listener() -> (String, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (url, task)
    }

    #[tokio::test]
    async fn disconnect_during_stalled_handshake_stops_driver() {
        let (url, server) = silent_listener().await;
        let config = ClientConfig {
            admission_timeout: Duration::from_secs(30),
            ..ClientConfig::new(url)
        };
        let (client, mut events) = RelayClient::spawn(config, "token".into());
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.send_text("too early").await.unwrap();
        client.disconnect().await.unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert_eq!(
            seen,
            Some(ClientEvent::Disconnected(DisconnectReason::UserInitiated))
        );
        tokio::time::timeout(Duration::from_secs(5), client.join())
            .await
            .unwrap();
        assert_eq!(events.recv().await, None);
        server.abort();
    }

    #[tokio::test]
    async fn stalled_handshake_counts_as_failed_attempt() {
        let (url, server) = silent_listener().await;
        let config = ClientConfig {
            admission_timeout: Duration::from_millis(200),
            policy: ReconnectPolicy {
                base_delay_secs: 0,
                max_delay_secs: 0,
                max_attempts: 1,
            },
            ..ClientConfig::new(url)
        };
        let (_client, mut events) = RelayClient::spawn(config, "token".into());

        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                seen.push(event);
            }
        })
        .await
        .unwrap();
        assert_eq!(
            seen,
            vec![
                ClientEvent::Reconnecting {
                    attempt: 1,
                    delay: Duration::ZERO
                },
                ClientEvent::Exhausted,
            ]
        );
        server.abort();
    }
}
