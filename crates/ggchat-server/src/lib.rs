//! # ggchat-server
//!
//! Connection registry, message router, and WebSocket relay.
//!
//! - `WebSocket` endpoint: credential check before admission, one session
//!   task per connection, bounded outbound queue, heartbeat
//! - Fan-out: the registry serializes once and delivers outside its lock;
//!   a failed send removes only that connection
//! - Polls held in memory, votes keyed by subject
//! - External bridge: queued one-way mirror plus an inbound injection endpoint
//! - HTTP: health, online list, login handshake
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod polls;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use bridge::{
    ExternalSink, InboundFilter, InboundGate, InboundMessage, Mirror, MirrorWorker, NoopMirror,
    QueuedMirror, WebhookSink,
};
pub use config::ServerConfig;
pub use errors::ServerError;
pub use polls::{Poll, PollStore};
pub use router::{ConnectionPhase, ConnectionState, MessageRouter, RouteOutcome};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::close_code;
pub use websocket::registry::{BroadcastReport, ConnectionRegistry};
