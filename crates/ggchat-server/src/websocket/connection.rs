//! Admitted connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ggchat_core::{ConnectionId, Identity};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Serialized outbound frame, shared across all recipients of one broadcast.
pub type Payload = Arc<str>;

/// WebSocket close codes used by the relay.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Server shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped for falling behind or missing heartbeats.
    pub const POLICY: u16 = 1008;
    /// Connection limit reached.
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// Credential malformed, badly signed, or expired.
    pub const CREDENTIAL_INVALID: u16 = 4001;
}

/// Stored close code before the first [`ClientConnection::close`].
const UNSET: u16 = 0;

/// One admitted duplex channel.
///
/// The identity is fixed for the connection's lifetime. Outbound frames go
/// through a bounded queue drained by the session's writer task, so a send
/// never blocks the caller.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    identity: Identity,
    tx: mpsc::Sender<Payload>,
    /// When the connection was admitted.
    pub admitted_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Count of frames dropped because the queue was full or closed.
    pub dropped_messages: AtomicU64,
    close_code: AtomicU16,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Create a connection around an outbound queue sender.
    pub fn new(identity: Identity, tx: mpsc::Sender<Payload>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            identity,
            tx,
            admitted_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            close_code: AtomicU16::new(UNSET),
            closed: CancellationToken::new(),
        }
    }

    /// Verified identity this connection was admitted with.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Enqueue a frame without waiting.
    ///
    /// Returns `false` if the queue is full or the writer is gone.
    pub fn send(&self, payload: Payload) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.tx.try_send(payload).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record client activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.admitted_at.elapsed()
    }

    /// Signal the session to close the socket with `code`.
    ///
    /// The first code set wins; later calls only re-signal.
    pub fn close(&self, code: u16) {
        let _ = self
            .close_code
            .compare_exchange(UNSET, code, Ordering::AcqRel, Ordering::Acquire);
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Code the socket should be closed with.
    pub fn close_code(&self) -> u16 {
        match self.close_code.load(Ordering::Acquire) {
            UNSET => close_code::NORMAL,
            code => code,
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("subject", &self.identity.subject_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Shared handle to an admitted connection.
pub type ConnectionHandle = Arc<ClientConnection>;
