//! # ggchat-core
//!
//! Shared vocabulary for the GG Chat relay and its clients.
//!
//! - **Branded IDs**: `ConnectionId`, `PollId` as newtypes for type safety
//! - **Identity**: the verified subject fields carried by a connection
//! - **Frames**: inbound [`Command`] parsing with plain-text fallback and the
//!   tagged [`OutboundFrame`] union sent to clients
//! - **Errors**: the relay error taxonomy via `thiserror`
//! - **Backoff**: reconnect delay math shared by the client controller
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod frame;
pub mod identity;
pub mod ids;
pub mod logging;

pub use errors::{RelayError, Result};
pub use frame::{Command, Inbound, OutboundFrame, Vote, parse_inbound};
pub use identity::{Identity, Role};
pub use ids::{ConnectionId, PollId};
