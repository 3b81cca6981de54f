//! Relay error taxonomy.
//!
//! Only [`RelayError::CredentialRejected`] and the transport/reconnect
//! states are ever surfaced to a user. Unknown poll references are dropped
//! silently and bridge failures are logged, so those variants exist for
//! logging and tests rather than propagation.

use thiserror::Error;

use crate::ids::{ConnectionId, PollId};

/// Errors produced by the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Credential malformed, badly signed, or expired.
    #[error("credential rejected: {reason}")]
    CredentialRejected {
        /// Human-readable rejection reason.
        reason: String,
    },

    /// Network-level send or receive failure on one connection.
    #[error("transport failure on {connection}: {message}")]
    TransportFailure {
        /// The affected connection.
        connection: ConnectionId,
        /// What went wrong.
        message: String,
    },

    /// Vote on a poll that does not exist.
    #[error("unknown poll: {0}")]
    UnknownPollReference(PollId),

    /// External mirror could not deliver a message.
    #[error("bridge delivery failed: {0}")]
    BridgeDeliveryFailure(String),

    /// Frame serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether this error must be shown to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::CredentialRejected { .. })
    }
}

/// Result type for relay core operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_rejected_display() {
        let err = RelayError::CredentialRejected {
            reason: "expired".into(),
        };
        assert_eq!(err.to_string(), "credential rejected: expired");
        assert!(err.is_user_visible());
    }

    #[test]
    fn transport_failure_display() {
        let err = RelayError::TransportFailure {
            connection: ConnectionId::from("conn_1"),
            message: "queue closed".into(),
        };
        assert_eq!(err.to_string(), "transport failure on conn_1: queue closed");
        assert!(!err.is_user_visible());
    }

    #[test]
    fn unknown_poll_display() {
        let err = RelayError::UnknownPollReference(PollId::from("poll_x"));
        assert_eq!(err.to_string(), "unknown poll: poll_x");
    }

    #[test]
    fn bridge_failure_is_not_user_visible() {
        let err = RelayError::BridgeDeliveryFailure("503".into());
        assert!(!err.is_user_visible());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: RelayError = json_err.into();
        assert!(matches!(err, RelayError::Json(_)));
    }
}
