//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed by this crate; the binary or an embedding
//! process decides where metrics go.

/// WebSocket connections admitted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ggchat_ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ggchat_ws_disconnections_total";
/// Currently admitted connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ggchat_ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ggchat_ws_connection_duration_seconds";
/// Upgrades refused because the credential did not verify (counter).
pub const WS_REJECTED_CREDENTIALS_TOTAL: &str = "ggchat_ws_rejected_credentials_total";
/// Upgrades refused because the registry was full (counter).
pub const WS_REJECTED_FULL_TOTAL: &str = "ggchat_ws_rejected_full_total";
/// Sends that failed and removed a connection (counter).
pub const SEND_FAILURES_TOTAL: &str = "ggchat_send_failures_total";
/// Inbound frames routed (counter, label: kind).
pub const FRAMES_ROUTED_TOTAL: &str = "ggchat_frames_routed_total";
/// Lines handed to the external mirror (counter).
pub const MIRROR_QUEUED_TOTAL: &str = "ggchat_mirror_queued_total";
/// Lines the external mirror dropped or failed to deliver (counter).
pub const MIRROR_FAILURES_TOTAL: &str = "ggchat_mirror_failures_total";
/// Messages injected from the external channel (counter).
pub const BRIDGE_INBOUND_TOTAL: &str = "ggchat_bridge_inbound_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_REJECTED_CREDENTIALS_TOTAL,
            WS_REJECTED_FULL_TOTAL,
            SEND_FAILURES_TOTAL,
            FRAMES_ROUTED_TOTAL,
            MIRROR_QUEUED_TOTAL,
            MIRROR_FAILURES_TOTAL,
            BRIDGE_INBOUND_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("ggchat_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
