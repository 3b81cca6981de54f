//! Server error types.

use ggchat_auth::AuthError;

/// Errors surfaced while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential or login failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:1: in use");
    }

    #[test]
    fn auth_error_is_transparent() {
        let err: ServerError = AuthError::NotAMember("5".into()).into();
        assert_eq!(err.to_string(), "not a guild member: 5");
    }
}
