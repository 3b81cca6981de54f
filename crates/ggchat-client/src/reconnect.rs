//! Reconnection controller and cancellable timer.
//!
//! The controller is a synchronous state machine over [`ReconnectPolicy`]:
//! it decides whether and when to try again. The timer is the only async
//! piece and can be cancelled at any moment, which is how a user-initiated
//! disconnect or a credential rejection stops a pending attempt.

use std::time::Duration;

use ggchat_core::backoff::ReconnectPolicy;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Close code the relay uses for invalid or expired credentials.
pub const CREDENTIAL_INVALID_CODE: u16 = 4001;

/// Why a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local user asked to disconnect.
    UserInitiated,
    /// The server refused the credential.
    CredentialInvalid(String),
    /// The server closed the socket with some other code.
    ServerClosed {
        /// WebSocket close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// Transport failure or refused connection.
    Network(String),
}

impl DisconnectReason {
    /// Classify a server close frame.
    pub fn from_close(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if code == CREDENTIAL_INVALID_CODE {
            Self::CredentialInvalid(reason)
        } else {
            Self::ServerClosed { code, reason }
        }
    }

    /// Whether this reason forbids any further reconnect attempt.
    pub fn suppresses_reconnect(&self) -> bool {
        matches!(self, Self::UserInitiated | Self::CredentialInvalid(_))
    }
}

/// Connection state seen by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Not yet connected.
    Idle,
    /// Admitted by the server.
    Connected,
    /// Waiting to retry.
    Reconnecting {
        /// Attempt about to be made.
        attempt: u32,
    },
    /// Stopped for a reason that forbids retrying.
    Disconnected(DisconnectReason),
    /// Attempt ceiling reached.
    Exhausted,
}

/// What to do after a disconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry {
        /// 1-based attempt counter.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// Ceiling reached; terminal.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// User-initiated or credential-invalid; terminal.
    Suppressed,
}

/// Backoff state machine for one client.
#[derive(Debug)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    attempt: u32,
    state: LinkState,
}

impl ReconnectController {
    /// Controller following `policy`.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            state: LinkState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Attempts made since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a successful connection; resets the attempt counter.
    pub fn on_connected(&mut self) {
        if self.attempt > 0 {
            info!(after_attempts = self.attempt, "reconnected");
        }
        self.attempt = 0;
        self.state = LinkState::Connected;
    }

    /// Record a disconnect or failed attempt and decide what happens next.
    pub fn on_disconnect(&mut self, reason: DisconnectReason) -> ReconnectDecision {
        if matches!(self.state, LinkState::Exhausted | LinkState::Disconnected(_)) {
            return ReconnectDecision::Suppressed;
        }
        if reason.suppresses_reconnect() {
            debug!(?reason, "reconnect suppressed");
            self.state = LinkState::Disconnected(reason);
            return ReconnectDecision::Suppressed;
        }

        self.attempt += 1;
        if !self.policy.allows(self.attempt) {
            let attempts = self.attempt - 1;
            warn!(attempts, "reconnect attempts exhausted");
            self.state = LinkState::Exhausted;
            return ReconnectDecision::GiveUp { attempts };
        }

        let delay = self.policy.delay_for(self.attempt);
        debug!(attempt = self.attempt, delay_secs = delay.as_secs(), ?reason, "scheduling reconnect");
        self.state = LinkState::Reconnecting {
            attempt: self.attempt,
        };
        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }
}

/// One scheduled reconnect attempt.
#[derive(Debug)]
pub struct ReconnectTimer {
    deadline: Instant,
    cancel: CancellationToken,
}

impl ReconnectTimer {
    /// Start a timer firing after `delay`.
    pub fn start(delay: Duration) -> Self {
        Self {
            deadline: Instant::now() + delay,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel the pending attempt. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that cancels this timer from elsewhere.
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the attempt is still scheduled.
    pub fn is_pending(&self) -> bool {
        !self.cancel.is_cancelled() && Instant::now() < self.deadline
    }

    /// Time left until the attempt.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Wait for the deadline. Returns `false` if cancelled first.
    pub async fn fired(&self) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = time::sleep_until(self.deadline) => !self.cancel.is_cancelled(),
        }
    }
}
