//! External channel bridge.
//!
//! Outbound, every routed chat line is handed to a [`Mirror`]. The
//! production mirror ([`QueuedMirror`]) only enqueues; a [`MirrorWorker`]
//! drains the queue into an [`ExternalSink`] so a slow or failing external
//! service never delays local delivery.
//!
//! Inbound, messages from the external channel are filtered by
//! [`InboundFilter`] and injected through the router.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ggchat_core::RelayError;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{MIRROR_FAILURES_TOTAL, MIRROR_QUEUED_TOTAL};

// ─────────────────────────────────────────────────────────────────────────────
// Outbound mirror
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for one-way mirroring of rendered chat lines.
///
/// Implementations must not block; they are called on the routing path.
pub trait Mirror: Send + Sync {
    /// Hand a rendered line to the external channel.
    fn mirror(&self, line: String);
}

/// Mirror that discards everything. Used when no bridge is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

impl Mirror for NoopMirror {
    fn mirror(&self, _line: String) {}
}

/// Mirror backed by a bounded queue.
#[derive(Debug)]
pub struct QueuedMirror {
    tx: mpsc::Sender<String>,
    dropped: AtomicU64,
}

impl QueuedMirror {
    /// Create the mirror and the receiving end for a [`MirrorWorker`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Lines dropped because the queue was full or the worker had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Mirror for QueuedMirror {
    fn mirror(&self, line: String) {
        if self.tx.try_send(line).is_ok() {
            counter!(MIRROR_QUEUED_TOTAL).increment(1);
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(MIRROR_FAILURES_TOTAL).increment(1);
            warn!("mirror queue unavailable, dropping line");
        }
    }
}

/// Something that can deliver a line to the external channel.
#[async_trait]
pub trait ExternalSink: Send + Sync {
    /// Deliver one line.
    async fn deliver(&self, content: &str) -> Result<(), RelayError>;
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    content: &'a str,
}

/// Sink that POSTs `{"content": line}` to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Sink posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Sink using a preconfigured client.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExternalSink for WebhookSink {
    async fn deliver(&self, content: &str) -> Result<(), RelayError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&WebhookBody { content })
            .send()
            .await
            .map_err(|e| RelayError::BridgeDeliveryFailure(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RelayError::BridgeDeliveryFailure(format!(
                "webhook returned {status}"
            )))
        }
    }
}

/// Drains a [`QueuedMirror`] into an [`ExternalSink`].
pub struct MirrorWorker {
    rx: mpsc::Receiver<String>,
    sink: Arc<dyn ExternalSink>,
}

impl MirrorWorker {
    /// Worker delivering lines from `rx` to `sink`.
    pub fn new(rx: mpsc::Receiver<String>, sink: Arc<dyn ExternalSink>) -> Self {
        Self { rx, sink }
    }

    /// Deliver lines until the queue closes or `cancel` fires.
    ///
    /// Delivery failures are logged and the loop moves on.
    #[tracing::instrument(skip_all, name = "mirror_worker")]
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let line = tokio::select! {
                line = self.rx.recv() => line,
                () = cancel.cancelled() => {
                    info!("mirror worker cancelled");
                    return;
                }
            };
            let Some(line) = line else {
                info!("mirror queue closed, worker exiting");
                return;
            };
            match self.sink.deliver(&line).await {
                Ok(()) => debug!(len = line.len(), "mirrored line"),
                Err(e) => {
                    counter!(MIRROR_FAILURES_TOTAL).increment(1);
                    warn!(error = %e, "mirror delivery failed");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound injection
// ─────────────────────────────────────────────────────────────────────────────

/// A message authored on the external channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// External author ID.
    pub author_id: String,
    /// Author display name.
    pub author_name: String,
    /// Message text.
    pub content: String,
    /// Channel the message was posted in, if known.
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Decides which external messages are injected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundFilter {
    /// The bridge's own author ID; its messages are echoes of our mirror.
    pub bot_author_id: Option<String>,
    /// Only messages from this channel are accepted, when set.
    pub channel_id: Option<String>,
}

impl InboundFilter {
    /// Whether `msg` should be broadcast to connected clients.
    pub fn accepts(&self, msg: &InboundMessage) -> bool {
        if msg.content.trim().is_empty() {
            return false;
        }
        if self.bot_author_id.as_deref() == Some(msg.author_id.as_str()) {
            return false;
        }
        match (&self.channel_id, &msg.channel_id) {
            (Some(expected), Some(actual)) => expected == actual,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Header carrying the shared secret on `POST /bridge/messages`.
pub const BRIDGE_SECRET_HEADER: &str = "x-bridge-secret";

/// Inbound bridge endpoint guard: shared secret plus message filter.
#[derive(Clone)]
pub struct InboundGate {
    secret: String,
    filter: InboundFilter,
}

impl InboundGate {
    /// Gate requiring `secret` and applying `filter`.
    pub fn new(secret: impl Into<String>, filter: InboundFilter) -> Self {
        Self {
            secret: secret.into(),
            filter,
        }
    }

    /// Whether the presented header value matches the shared secret.
    pub fn authorizes(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        let (a, b) = (presented.as_bytes(), self.secret.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    /// Message filter applied after authorization.
    pub fn filter(&self) -> &InboundFilter {
        &self.filter
    }
}

impl std::fmt::Debug for InboundGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundGate")
            .field("secret", &"[REDACTED]")
            .field("filter", &self.filter)
            .finish()
    }
}
