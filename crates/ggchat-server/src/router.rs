//! Message router.
//!
//! Classifies every inbound frame from an admitted connection and decides
//! who receives what. The router never holds a lock across a send: poll
//! mutations complete inside the [`PollStore`] before any broadcast.

use std::sync::Arc;

use ggchat_core::frame::render_chat_line;
use ggchat_core::{Command, Inbound, OutboundFrame, PollId, Vote, parse_inbound};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::bridge::{InboundMessage, Mirror, NoopMirror};
use crate::metrics::{BRIDGE_INBOUND_TOTAL, FRAMES_ROUTED_TOTAL};
use crate::polls::PollStore;
use crate::websocket::connection::ConnectionHandle;
use crate::websocket::registry::ConnectionRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Connection state
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of one duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Channel open, credential not yet accepted.
    Unauthenticated,
    /// Admitted to the registry; frames are routed.
    Authenticated,
    /// Removed from the registry; nothing more is routed.
    Closed,
}

/// Per-session state machine. Only authenticated sessions route frames.
#[derive(Debug)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    connection: Option<ConnectionHandle>,
}

impl ConnectionState {
    /// Fresh, unauthenticated state.
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Unauthenticated,
            connection: None,
        }
    }

    /// Move to `Authenticated` with the admitted connection.
    pub fn authenticate(&mut self, connection: ConnectionHandle) {
        if self.phase == ConnectionPhase::Unauthenticated {
            self.phase = ConnectionPhase::Authenticated;
            self.connection = Some(connection);
        }
    }

    /// Move to `Closed`. Terminal.
    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// The admitted connection, while authenticated.
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        match self.phase {
            ConnectionPhase::Authenticated => self.connection.as_ref(),
            _ => None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

/// What the router did with one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Chat delivered to the sender plus `recipients` others.
    Chat {
        /// Other connections the line was queued for.
        recipients: usize,
    },
    /// A poll was created and announced.
    PollCreated {
        /// New poll ID.
        poll_id: PollId,
    },
    /// A vote was recorded and the tally broadcast.
    PollUpdated {
        /// Poll voted on.
        poll_id: PollId,
    },
    /// Vote on an unknown poll; dropped without a broadcast.
    PollVoteIgnored {
        /// The unknown poll ID.
        poll_id: PollId,
    },
    /// Presence reply sent to the sender.
    Presence,
    /// Session not authenticated, or the sender was already removed.
    NotRouted,
}

/// Routes inbound frames to the registry, poll store, and mirror.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    polls: Arc<PollStore>,
    mirror: Arc<dyn Mirror>,
}

impl MessageRouter {
    /// Router without an external mirror.
    pub fn new(registry: Arc<ConnectionRegistry>, polls: Arc<PollStore>) -> Self {
        Self::with_mirror(registry, polls, Arc::new(NoopMirror))
    }

    /// Router mirroring chat lines to `mirror`.
    pub fn with_mirror(
        registry: Arc<ConnectionRegistry>,
        polls: Arc<PollStore>,
        mirror: Arc<dyn Mirror>,
    ) -> Self {
        Self {
            registry,
            polls,
            mirror,
        }
    }

    /// Greet a newly admitted connection with its display name.
    pub fn welcome(&self, conn: &ConnectionHandle) -> bool {
        let text = format!("connected as {}", conn.identity().display_name);
        self.registry.send_to(conn, &OutboundFrame::notice(text))
    }

    /// Route one inbound frame from `state`'s connection.
    pub fn dispatch(&self, state: &ConnectionState, payload: &str) -> RouteOutcome {
        let Some(conn) = state.connection() else {
            return RouteOutcome::NotRouted;
        };
        if !self.registry.contains(&conn.id) {
            return RouteOutcome::NotRouted;
        }

        let outcome = match parse_inbound(payload) {
            Inbound::Command(Command::PollCreate { question }) => self.poll_create(conn, question),
            Inbound::Command(Command::PollVote { poll_id, vote }) => self.poll_vote(conn, poll_id, vote),
            Inbound::Command(Command::Presence) => self.presence(conn),
            Inbound::Chat(text) => self.chat(conn, text),
        };
        counter!(FRAMES_ROUTED_TOTAL, "kind" => outcome_kind(&outcome)).increment(1);
        outcome
    }

    /// Broadcast a message authored on the external channel to everyone.
    ///
    /// Never mirrored back out.
    pub fn inject_external(&self, message: &InboundMessage) -> usize {
        let frame = OutboundFrame::chat(message.author_name.clone(), message.content.clone());
        let report = self.registry.broadcast(&frame, None);
        counter!(BRIDGE_INBOUND_TOTAL).increment(1);
        info!(author = %message.author_name, recipients = report.delivered, "injected external message");
        report.delivered
    }

    fn chat(&self, conn: &ConnectionHandle, text: String) -> RouteOutcome {
        let sender = &conn.identity().display_name;
        let line = render_chat_line(sender, &text);
        let frame = OutboundFrame::chat(sender.clone(), text);

        // Sender first, so its own line shows even if a broadcast send fails
        if !self.registry.send_to(conn, &frame) {
            debug!(conn_id = %conn.id, "sender echo failed, sender removed");
        }
        let report = self.registry.broadcast(&frame, Some(&conn.id));
        self.mirror.mirror(line);
        debug!(conn_id = %conn.id, recipients = report.delivered, "chat routed");
        RouteOutcome::Chat {
            recipients: report.delivered,
        }
    }

    fn poll_create(&self, conn: &ConnectionHandle, question: String) -> RouteOutcome {
        let creator = conn.identity().clone();
        let poll = self.polls.create(question, creator);
        let frame = OutboundFrame::PollCreated {
            poll_id: poll.id.clone(),
            question: poll.question.clone(),
            creator: poll.creator.display_name.clone(),
        };
        let report = self.registry.broadcast(&frame, None);
        self.mirror.mirror(format!(
            "📊 Poll by {}: {}",
            poll.creator.display_name, poll.question
        ));
        info!(poll_id = %poll.id, conn_id = %conn.id, recipients = report.delivered, "poll created");
        RouteOutcome::PollCreated { poll_id: poll.id }
    }

    fn poll_vote(&self, conn: &ConnectionHandle, poll_id: PollId, vote: Vote) -> RouteOutcome {
        let subject = &conn.identity().subject_id;
        // Enqueue under the store lock so snapshots leave in vote order;
        // broadcast only try_sends onto per-connection queues
        let published = self.polls.vote_with(&poll_id, subject, vote, |votes| {
            let frame = OutboundFrame::PollUpdated {
                poll_id: poll_id.clone(),
                votes: votes.clone(),
            };
            self.registry.broadcast(&frame, None)
        });
        let Some(report) = published else {
            debug!(poll_id = %poll_id, subject = %subject, "vote on unknown poll ignored");
            return RouteOutcome::PollVoteIgnored { poll_id };
        };
        debug!(poll_id = %poll_id, recipients = report.delivered, "poll updated");
        RouteOutcome::PollUpdated { poll_id }
    }

    fn presence(&self, conn: &ConnectionHandle) -> RouteOutcome {
        let frame = OutboundFrame::Presence {
            online: self.registry.online_names(),
        };
        if self.registry.send_to(conn, &frame) {
            RouteOutcome::Presence
        } else {
            warn!(conn_id = %conn.id, "presence reply failed");
            RouteOutcome::NotRouted
        }
    }
}

fn outcome_kind(outcome: &RouteOutcome) -> &'static str {
    match outcome {
        RouteOutcome::Chat { .. } => "chat",
        RouteOutcome::PollCreated { .. } => "poll_create",
        RouteOutcome::PollUpdated { .. } => "poll_vote",
        RouteOutcome::PollVoteIgnored { .. } => "poll_vote_ignored",
        RouteOutcome::Presence => "presence",
        RouteOutcome::NotRouted => "not_routed",
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ggchat_core::Identity;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::Payload;

    #[derive(Default)]
    struct RecordingMirror {
        lines: Mutex<Vec<String>>,
    }

    impl Mirror for RecordingMirror {
        fn mirror(&self, line: String) {
            self.lines.lock().push(line);
        }
    }

    struct Harness {
        router: MessageRouter,
        registry: Arc<ConnectionRegistry>,
        polls: Arc<PollStore>,
        mirror: Arc<RecordingMirror>,
    }

    struct Client {
        state: ConnectionState,
        conn: ConnectionHandle,
        rx: mpsc::Receiver<Payload>,
    }

    impl Client {
        fn frames(&mut self) -> Vec<OutboundFrame> {
            let mut out = Vec::new();
            while let Ok(p) = self.rx.try_recv() {
                out.push(serde_json::from_str(&p).unwrap());
            }
            out
        }
    }

    fn harness() -> Harness {
        let registry = Arc::new(ConnectionRegistry::default());
        let polls = Arc::new(PollStore::new());
        let mirror = Arc::new(RecordingMirror::default());
        let router = MessageRouter::with_mirror(registry.clone(), polls.clone(), mirror.clone());
        Harness {
            router,
            registry,
            polls,
            mirror,
        }
    }

    fn join(h: &Harness, subject: &str, name: &str) -> Client {
        join_with_queue(h, subject, name, 32)
    }

    fn join_with_queue(h: &Harness, subject: &str, name: &str, depth: usize) -> Client {
        let (tx, rx) = mpsc::channel(depth);
        let conn = h.registry.admit(Identity::member(subject, name), tx).unwrap();
        let mut state = ConnectionState::new();
        state.authenticate(conn.clone());
        Client { state, conn, rx }
    }

    #[test]
    fn state_transitions() {
        let h = harness();
        let (tx, _rx) = mpsc::channel(1);
        let conn = h.registry.admit(Identity::member("a", "Ann"), tx).unwrap();

        let mut state = ConnectionState::new();
        assert_eq!(state.phase(), ConnectionPhase::Unauthenticated);
        assert!(state.connection().is_none());
        state.authenticate(conn);
        assert_eq!(state.phase(), ConnectionPhase::Authenticated);
        assert!(state.connection().is_some());
        state.close();
        assert_eq!(state.phase(), ConnectionPhase::Closed);
        assert!(state.connection().is_none());
    }

    #[test]
    fn unauthenticated_frames_are_not_routed() {
        let h = harness();
        let mut other = join(&h, "b", "Bob");
        let outcome = h.router.dispatch(&ConnectionState::new(), "hello");
        assert_eq!(outcome, RouteOutcome::NotRouted);
        assert!(other.frames().is_empty());
    }

    #[test]
    fn chat_reaches_everyone_once_and_mirrors() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        let mut c = join(&h, "c", "Cat");

        let outcome = h.router.dispatch(&a.state, "hello");
        assert_eq!(outcome, RouteOutcome::Chat { recipients: 2 });

        let expected = OutboundFrame::chat("Ann", "hello");
        assert_eq!(a.frames(), vec![expected.clone()]);
        assert_eq!(b.frames(), vec![expected.clone()]);
        assert_eq!(c.frames(), vec![expected]);
        assert_eq!(*h.mirror.lines.lock(), vec!["[Ann] hello"]);
    }

    #[test]
    fn malformed_json_is_chat_text() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let _ = h.router.dispatch(&a.state, r#"{"type":"poll_vote"}"#);
        assert_eq!(
            a.frames(),
            vec![OutboundFrame::chat("Ann", r#"{"type":"poll_vote"}"#)]
        );
        assert!(h.polls.is_empty());
    }

    #[test]
    fn poll_create_then_votes() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        let mut c = join(&h, "c", "Cat");

        let outcome = h.router.dispatch(&a.state, r#"{"type":"poll_create","question":"Pizza?"}"#);
        let poll_id = assert_matches!(outcome, RouteOutcome::PollCreated { poll_id } => poll_id);

        for client in [&mut a, &mut b, &mut c] {
            let frames = client.frames();
            assert_eq!(frames.len(), 1);
            assert_matches!(
                &frames[0],
                OutboundFrame::PollCreated { question, creator, .. }
                    if question == "Pizza?" && creator == "Ann"
            );
        }

        let vote = format!(r#"{{"type":"poll_vote","poll_id":"{poll_id}","vote":"up"}}"#);
        let _ = h.router.dispatch(&b.state, &vote);
        let vote = format!(r#"{{"type":"poll_vote","poll_id":"{poll_id}","vote":"down"}}"#);
        let _ = h.router.dispatch(&c.state, &vote);

        for client in [&mut a, &mut b, &mut c] {
            let frames = client.frames();
            assert_eq!(frames.len(), 2);
            let OutboundFrame::PollUpdated { votes, .. } = &frames[1] else {
                panic!("expected poll_updated, got {:?}", frames[1]);
            };
            assert_eq!(votes.len(), 2);
            assert_eq!(votes["b"], Vote::Up);
            assert_eq!(votes["c"], Vote::Down);
        }

        assert_eq!(*h.mirror.lines.lock(), vec!["📊 Poll by Ann: Pizza?"]);
    }

    #[test]
    fn last_poll_update_matches_store_under_concurrent_votes() {
        const VOTERS: usize = 8;
        const ROUNDS: usize = 20;

        for _ in 0..50 {
            let h = harness();
            let mut watcher = join_with_queue(&h, "w", "Watcher", 1024);
            let voters: Vec<Client> = (0..VOTERS)
                .map(|i| join_with_queue(&h, &format!("v{i}"), &format!("Voter{i}"), 1024))
                .collect();
            let outcome = h.router.dispatch(&watcher.state, r#"{"type":"poll_create","question":"Tie?"}"#);
            let poll_id = assert_matches!(outcome, RouteOutcome::PollCreated { poll_id } => poll_id);

            std::thread::scope(|scope| {
                for voter in &voters {
                    let router = &h.router;
                    let poll_id = &poll_id;
                    let _ = scope.spawn(move || {
                        for round in 0..ROUNDS {
                            let vote = if round % 2 == 0 { "up" } else { "down" };
                            let frame = format!(
                                r#"{{"type":"poll_vote","poll_id":"{poll_id}","vote":"{vote}"}}"#
                            );
                            let _ = router.dispatch(&voter.state, &frame);
                        }
                    });
                }
            });

            let last = watcher
                .frames()
                .into_iter()
                .filter_map(|frame| match frame {
                    OutboundFrame::PollUpdated { votes, .. } => Some(votes),
                    _ => None,
                })
                .last()
                .unwrap();
            assert_eq!(last, h.polls.get(&poll_id).unwrap().votes);
            assert_eq!(last.len(), VOTERS);
        }
    }

    #[test]
    fn vote_on_unknown_poll_is_silent() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");

        let outcome = h
            .router
            .dispatch(&a.state, r#"{"type":"poll_vote","poll_id":"poll_nope","vote":"up"}"#);
        assert_matches!(outcome, RouteOutcome::PollVoteIgnored { .. });
        assert!(a.frames().is_empty());
        assert!(b.frames().is_empty());
        assert!(h.polls.is_empty());
    }

    #[test]
    fn presence_replies_to_sender_only() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        let _dup = join(&h, "b", "Bob");

        assert_eq!(h.router.dispatch(&a.state, r#"{"type":"presence"}"#), RouteOutcome::Presence);
        assert_eq!(
            a.frames(),
            vec![OutboundFrame::Presence {
                online: vec!["Ann".into(), "Bob".into()]
            }]
        );
        assert!(b.frames().is_empty());
    }

    #[test]
    fn removed_sender_is_not_routed() {
        let h = harness();
        let a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        let _ = h.registry.remove(&a.conn.id);
        assert_eq!(h.router.dispatch(&a.state, "late"), RouteOutcome::NotRouted);
        assert!(b.frames().is_empty());
    }

    #[test]
    fn failed_recipient_does_not_stop_chat() {
        let h = harness();
        let a = join(&h, "a", "Ann");
        let b = join(&h, "b", "Bob");
        let mut c = join(&h, "c", "Cat");
        drop(b.rx);

        let outcome = h.router.dispatch(&a.state, "still here");
        assert_eq!(outcome, RouteOutcome::Chat { recipients: 1 });
        assert_eq!(c.frames().len(), 1);
        assert!(!h.registry.contains(&b.conn.id));
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let h = harness();
        let a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        for i in 0..10 {
            let _ = h.router.dispatch(&a.state, &format!("m{i}"));
        }
        let texts: Vec<String> = b
            .frames()
            .into_iter()
            .filter_map(|f| match f {
                OutboundFrame::Chat { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn welcome_goes_to_newcomer_only() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        assert!(h.router.welcome(&b.conn));
        assert!(a.frames().is_empty());
        assert_eq!(b.frames(), vec![OutboundFrame::notice("connected as Bob")]);
    }

    #[test]
    fn external_message_reaches_all_and_is_not_mirrored() {
        let h = harness();
        let mut a = join(&h, "a", "Ann");
        let mut b = join(&h, "b", "Bob");
        let msg = InboundMessage {
            author_id: "99".into(),
            author_name: "Dee".into(),
            content: "from outside".into(),
            channel_id: None,
        };
        assert_eq!(h.router.inject_external(&msg), 2);
        let expected = OutboundFrame::chat("Dee", "from outside");
        assert_eq!(a.frames(), vec![expected.clone()]);
        assert_eq!(b.frames(), vec![expected]);
        assert!(h.mirror.lines.lock().is_empty());
    }
}
