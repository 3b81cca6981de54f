//! WebSocket connection state, registry, heartbeat, and session loop.

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod session;
