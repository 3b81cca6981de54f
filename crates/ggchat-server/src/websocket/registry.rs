//! Connection registry and fan-out.
//!
//! The registry is the single shared set of live connections. Every
//! mutation runs under one `parking_lot` mutex; broadcasts copy the set
//! under the lock and deliver outside it, so a slow recipient never holds
//! the lock and concurrent removal never invalidates the iteration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ggchat_core::{ConnectionId, Identity, OutboundFrame};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, ConnectionHandle, Payload, close_code};
use crate::metrics::SEND_FAILURES_TOTAL;

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections whose send failed and that were removed.
    pub failed: Vec<ConnectionId>,
}

/// Set of currently admitted connections.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    capacity: usize,
}

impl ConnectionRegistry {
    /// Registry admitting at most `capacity` connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Register a new live connection.
    ///
    /// Returns `None` when the registry is at capacity; nothing is
    /// registered in that case.
    pub fn admit(&self, identity: Identity, tx: mpsc::Sender<Payload>) -> Option<ConnectionHandle> {
        let mut conns = self.connections.lock();
        if conns.len() >= self.capacity {
            warn!(subject = %identity.subject_id, capacity = self.capacity, "registry full, refusing admission");
            return None;
        }
        let conn = Arc::new(ClientConnection::new(identity, tx));
        let _ = conns.insert(conn.id.clone(), conn.clone());
        let active = conns.len();
        drop(conns);

        info!(conn_id = %conn.id, subject = %conn.identity().subject_id, active, "connection admitted");
        Some(conn)
    }

    /// Remove a connection and signal its session to close.
    ///
    /// Idempotent: returns `false` if the connection was already gone.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.remove_with(id, close_code::NORMAL)
    }

    /// Remove a connection, closing it with `code`.
    pub fn remove_with(&self, id: &ConnectionId, code: u16) -> bool {
        let removed = self.connections.lock().remove(id);
        match removed {
            Some(conn) => {
                conn.close(code);
                debug!(conn_id = %id, code, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Serialize `frame` once and deliver it to every connection except `exclude`.
    pub fn broadcast(&self, frame: &OutboundFrame, exclude: Option<&ConnectionId>) -> BroadcastReport {
        match frame.to_json() {
            Ok(json) => self.broadcast_payload(json.into(), exclude, frame.kind()),
            Err(e) => {
                warn!(kind = frame.kind(), error = %e, "failed to serialize frame");
                BroadcastReport::default()
            }
        }
    }

    /// Deliver an already-serialized payload to every connection except `exclude`.
    ///
    /// A failed send removes that connection and delivery continues with
    /// the rest.
    pub fn broadcast_payload(
        &self,
        payload: Payload,
        exclude: Option<&ConnectionId>,
        kind: &'static str,
    ) -> BroadcastReport {
        let snapshot = self.snapshot();
        let mut report = BroadcastReport::default();

        for conn in snapshot.iter().filter(|c| Some(&c.id) != exclude) {
            if conn.send(payload.clone()) {
                report.delivered += 1;
            } else {
                report.failed.push(conn.id.clone());
            }
        }

        for id in &report.failed {
            warn!(conn_id = %id, kind, "send failed, removing connection");
            counter!(SEND_FAILURES_TOTAL).increment(1);
            let _ = self.remove_with(id, close_code::POLICY);
        }

        debug!(kind, delivered = report.delivered, failed = report.failed.len(), "broadcast");
        report
    }

    /// Deliver `frame` to one connection. A failed send removes it.
    pub fn send_to(&self, conn: &ClientConnection, frame: &OutboundFrame) -> bool {
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = frame.kind(), error = %e, "failed to serialize frame");
                return false;
            }
        };
        if conn.send(json.into()) {
            return true;
        }
        warn!(conn_id = %conn.id, kind = frame.kind(), "direct send failed, removing connection");
        counter!(SEND_FAILURES_TOTAL).increment(1);
        let _ = self.remove_with(&conn.id, close_code::POLICY);
        false
    }

    /// Identities of admitted connections, one per subject, sorted by display name.
    pub fn enumerate(&self) -> Vec<Identity> {
        let by_subject: BTreeMap<String, Identity> = self
            .snapshot()
            .iter()
            .map(|c| (c.identity().subject_id.clone(), c.identity().clone()))
            .collect();
        let mut identities: Vec<Identity> = by_subject.into_values().collect();
        identities.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });
        identities
    }

    /// Sorted, de-duplicated display names of admitted connections.
    pub fn online_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .enumerate()
            .into_iter()
            .map(|i| i.display_name)
            .collect();
        names.dedup();
        names
    }

    /// Number of admitted connections.
    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether `id` is currently admitted.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Close every connection with `code` and empty the registry.
    pub fn close_all(&self, code: u16) -> usize {
        let drained: Vec<ConnectionHandle> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.close(code);
        }
        drained.len()
    }

    fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().values().cloned().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(
        registry: &ConnectionRegistry,
        subject: &str,
        name: &str,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = registry.admit(Identity::member(subject, name), tx).unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Payload>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p.to_string());
        }
        out
    }

    #[test]
    fn admit_and_count() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = admit(&registry, "a", "Ann", 4);
        let (_b, _rb) = admit(&registry, "b", "Bob", 4);
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(&a.id));
    }

    #[test]
    fn admit_refused_at_capacity() {
        let registry = ConnectionRegistry::new(1);
        let (_a, _ra) = admit(&registry, "a", "Ann", 4);
        let (tx, _rx) = mpsc::channel(4);
        assert!(registry.admit(Identity::member("b", "Bob"), tx).is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn remove_is_idempotent_and_closes() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = admit(&registry, "a", "Ann", 4);
        assert!(registry.remove(&a.id));
        assert!(a.is_closed());
        assert!(!registry.remove(&a.id));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn removed_connection_never_receives_broadcast() {
        let registry = ConnectionRegistry::default();
        let (a, mut ra) = admit(&registry, "a", "Ann", 4);
        let (_b, mut rb) = admit(&registry, "b", "Bob", 4);
        let _ = registry.remove(&a.id);

        let report = registry.broadcast(&OutboundFrame::notice("hi"), None);
        assert_eq!(report.delivered, 1);
        assert!(drain(&mut ra).is_empty());
        assert_eq!(drain(&mut rb).len(), 1);
    }

    #[test]
    fn broadcast_respects_exclude() {
        let registry = ConnectionRegistry::default();
        let (a, mut ra) = admit(&registry, "a", "Ann", 4);
        let (_b, mut rb) = admit(&registry, "b", "Bob", 4);
        let (_c, mut rc) = admit(&registry, "c", "Cat", 4);

        let report = registry.broadcast(&OutboundFrame::chat("Ann", "yo"), Some(&a.id));
        assert_eq!(report.delivered, 2);
        assert!(drain(&mut ra).is_empty());
        assert_eq!(drain(&mut rb).len(), 1);
        assert_eq!(drain(&mut rc).len(), 1);
    }

    #[test]
    fn failed_send_removes_only_that_connection() {
        let registry = ConnectionRegistry::default();
        let (_a, mut ra) = admit(&registry, "a", "Ann", 4);
        let (b, rb) = admit(&registry, "b", "Bob", 4);
        let (_c, mut rc) = admit(&registry, "c", "Cat", 4);
        drop(rb);

        let report = registry.broadcast(&OutboundFrame::chat("Ann", "hello"), None);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![b.id.clone()]);
        assert!(b.is_closed());
        assert_eq!(b.close_code(), close_code::POLICY);
        assert_eq!(drain(&mut ra).len(), 1);
        assert_eq!(drain(&mut rc).len(), 1);
        assert!(registry.enumerate().iter().all(|i| i.subject_id != "b"));
    }

    #[test]
    fn full_queue_is_a_failed_send() {
        let registry = ConnectionRegistry::default();
        let (slow, _rs) = admit(&registry, "s", "Slow", 1);
        let (_fast, mut rf) = admit(&registry, "f", "Fast", 8);

        let _ = registry.broadcast(&OutboundFrame::notice("1"), None);
        let report = registry.broadcast(&OutboundFrame::notice("2"), None);
        assert_eq!(report.failed, vec![slow.id.clone()]);
        assert!(!registry.contains(&slow.id));
        assert_eq!(drain(&mut rf).len(), 2);
    }

    #[test]
    fn every_recipient_gets_identical_bytes() {
        let registry = ConnectionRegistry::default();
        let (_a, mut ra) = admit(&registry, "a", "Ann", 4);
        let (_b, mut rb) = admit(&registry, "b", "Bob", 4);
        let _ = registry.broadcast(&OutboundFrame::chat("Ann", "same"), None);
        assert_eq!(drain(&mut ra), drain(&mut rb));
    }

    #[test]
    fn send_to_failure_removes() {
        let registry = ConnectionRegistry::default();
        let (a, ra) = admit(&registry, "a", "Ann", 4);
        drop(ra);
        assert!(!registry.send_to(&a, &OutboundFrame::notice("x")));
        assert!(!registry.contains(&a.id));
    }

    #[test]
    fn enumerate_dedupes_subjects_and_sorts() {
        let registry = ConnectionRegistry::default();
        let (_z1, _r1) = admit(&registry, "z", "Zed", 4);
        let (_z2, _r2) = admit(&registry, "z", "Zed", 4);
        let (_a, _r3) = admit(&registry, "a", "Ann", 4);

        let ids = registry.enumerate();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].display_name, "Ann");
        assert_eq!(ids[1].display_name, "Zed");
        assert_eq!(registry.online_names(), vec!["Ann", "Zed"]);
    }

    #[test]
    fn close_all_empties_registry() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = admit(&registry, "a", "Ann", 4);
        let (b, _rb) = admit(&registry, "b", "Bob", 4);
        assert_eq!(registry.close_all(close_code::GOING_AWAY), 2);
        assert_eq!(registry.count(), 0);
        assert_eq!(a.close_code(), close_code::GOING_AWAY);
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn concurrent_admit_remove_broadcast() {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(64);
                let conn = registry
                    .admit(Identity::member(format!("s{i}"), format!("n{i}")), tx)
                    .unwrap();
                let _ = registry.broadcast(&OutboundFrame::notice("tick"), None);
                tokio::task::yield_now().await;
                assert!(registry.remove(&conn.id));
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(registry.count(), 0);
    }
}
