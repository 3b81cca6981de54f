//! Liveness monitoring for admitted connections.

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ConnectionHandle;

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No client activity for `timeout`.
    TimedOut,
    /// Stopped by the session or by connection close.
    Cancelled,
}

/// Number of consecutive silent intervals tolerated before timing out.
fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Watch a connection for activity.
///
/// Every `interval` the alive flag is read and reset. Any inbound frame
/// (including pongs) sets it again. After `timeout / interval` consecutive
/// silent intervals the loop returns [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    connection: ConnectionHandle,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    // First tick fires immediately
    let _ = ticker.tick().await;
    let limit = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= limit {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            () = connection.closed() => return HeartbeatResult::Cancelled,
        }
    }
}
