//! Client error types.

use ggchat_auth::Rejection;
use thiserror::Error;

/// Errors surfaced by the client library.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credential cache file could not be read or written.
    #[error("credential cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential cache or frame JSON was invalid.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local check of a credential failed.
    #[error("credential rejected: {0}")]
    Credential(#[from] Rejection),

    /// The connection driver has stopped; no more frames can be sent.
    #[error("client is closed")]
    Closed,
}
