//! Process-wide stop signal.
//!
//! One `CancellationToken` fans out to the listener, every session (which
//! answers by closing its socket with 1001), and the mirror worker. The
//! binary then drains the task handles it spawned.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits by default.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner of the stop signal.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to hand to a task that must stop with the relay.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the signal. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("relay shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether the signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the signal and wait up to `timeout` for `handles`.
    ///
    /// Returns `false` when some task was still running at the deadline.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        let pending = handles.len();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "tasks ended abnormally during shutdown");
                }
                info!(tasks = pending, "background tasks drained");
                true
            }
            Err(_) => {
                warn!(tasks = pending, ?timeout, "drain deadline passed with tasks still running");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_token_observes_the_signal() {
        let coordinator = ShutdownCoordinator::new();
        let early = coordinator.token();
        assert!(!coordinator.is_shutting_down());

        coordinator.shutdown();
        coordinator.shutdown();
        assert!(early.is_cancelled());
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_listeners_of_the_token() {
        let coordinator = ShutdownCoordinator::new();
        let handles = (0..3)
            .map(|_| {
                let token = coordinator.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();
        assert!(coordinator.drain(handles, DRAIN_TIMEOUT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stragglers() {
        let coordinator = ShutdownCoordinator::new();
        let stuck = tokio::spawn(tokio::time::sleep(Duration::from_secs(600)));
        assert!(!coordinator.drain(vec![stuck], Duration::from_millis(50)).await);
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_with_nothing_to_wait_for() {
        assert!(ShutdownCoordinator::new().drain(Vec::new(), DRAIN_TIMEOUT).await);
    }
}
