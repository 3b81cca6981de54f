//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Coarse liveness reported to load balancers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has begun; sessions are being closed with 1001.
    Draining,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Liveness.
    pub status: HealthStatus,
    /// Whole seconds since the listener started.
    pub uptime_secs: u64,
    /// Admitted connections.
    pub connections: usize,
    /// Polls in memory.
    pub polls: usize,
}

impl HealthResponse {
    /// Snapshot of the relay's counters.
    pub fn snapshot(started: Instant, draining: bool, connections: usize, polls: usize) -> Self {
        let status = if draining {
            HealthStatus::Draining
        } else {
            HealthStatus::Ok
        };
        Self {
            status,
            uptime_secs: started.elapsed().as_secs(),
            connections,
            polls,
        }
    }
}
