//! Auth error types.

use ggchat_core::RelayError;

/// Why a presented credential was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Not a parseable token.
    #[error("credential malformed")]
    Malformed,
    /// Signature does not match the process secret.
    #[error("credential signature invalid")]
    BadSignature,
    /// `expires_at` is not strictly in the future.
    #[error("credential expired")]
    Expired,
}

impl From<Rejection> for RelayError {
    fn from(r: Rejection) -> Self {
        RelayError::CredentialRejected {
            reason: r.to_string(),
        }
    }
}

/// Errors that can occur during credential issuance and login.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request to the identity provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token signing failed.
    #[error("signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// Code exchange with the identity provider failed.
    #[error("OAuth error ({status}): {message}")]
    OAuth {
        /// HTTP status code (0 if no response).
        status: u16,
        /// Error description.
        message: String,
    },

    /// User is not a member of the required guild.
    #[error("not a guild member: {0}")]
    NotAMember(String),

    /// Correlation ID was never issued or has expired.
    #[error("unknown login correlation: {0}")]
    UnknownCorrelation(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_display() {
        assert_eq!(Rejection::Expired.to_string(), "credential expired");
        assert_eq!(Rejection::Malformed.to_string(), "credential malformed");
        assert_eq!(
            Rejection::BadSignature.to_string(),
            "credential signature invalid"
        );
    }

    #[test]
    fn rejection_into_relay_error() {
        let err: RelayError = Rejection::Expired.into();
        assert!(err.is_user_visible());
        assert_eq!(err.to_string(), "credential rejected: credential expired");
    }

    #[test]
    fn oauth_error_display() {
        let err = AuthError::OAuth {
            status: 401,
            message: "invalid_grant".to_string(),
        };
        assert_eq!(err.to_string(), "OAuth error (401): invalid_grant");
    }

    #[test]
    fn not_a_member_display() {
        let err = AuthError::NotAMember("42".into());
        assert_eq!(err.to_string(), "not a guild member: 42");
    }
}
