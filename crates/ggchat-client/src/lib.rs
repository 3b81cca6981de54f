//! # ggchat-client
//!
//! Client side of the GG Chat relay.
//!
//! - [`RelayClient`]: a driver task that owns the socket, forwards commands,
//!   and reconnects with exponential backoff
//! - [`ReconnectController`]: the backoff state machine. User disconnects and
//!   credential rejections (close code 4001) never trigger a retry
//! - [`CredentialCache`]: the last issued credential on disk, dropped once
//!   it expires or the server refuses it

#![deny(unsafe_code)]

pub mod client;
pub mod credential_cache;
pub mod errors;
pub mod reconnect;

pub use client::{ClientConfig, ClientEvent, RelayClient};
pub use credential_cache::{CachedCredential, CredentialCache};
pub use errors::ClientError;
pub use reconnect::{
    CREDENTIAL_INVALID_CODE, DisconnectReason, LinkState, ReconnectController, ReconnectDecision,
    ReconnectTimer,
};
