//! In-memory poll store.
//!
//! Polls live for the process lifetime unless a cap is configured, in
//! which case the oldest poll is evicted when a new one would exceed it.
//! Each subject holds at most one vote per poll; a repeat vote replaces
//! the previous one.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use ggchat_core::{Identity, PollId, Vote};
use parking_lot::Mutex;
use tracing::debug;

/// A poll and its current votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    /// Unique poll ID.
    pub id: PollId,
    /// Question text.
    pub question: String,
    /// Who created the poll.
    pub creator: Identity,
    /// Votes keyed by subject ID.
    pub votes: BTreeMap<String, Vote>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    polls: HashMap<PollId, Poll>,
    order: VecDeque<PollId>,
}

/// Shared store of polls.
pub struct PollStore {
    inner: Mutex<Inner>,
    max_polls: Option<usize>,
}

impl PollStore {
    /// Store without a cap.
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Store evicting the oldest poll beyond `max_polls`.
    pub fn with_limit(max_polls: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_polls,
        }
    }

    /// Create a poll with a fresh ID and no votes.
    pub fn create(&self, question: impl Into<String>, creator: Identity) -> Poll {
        let mut inner = self.inner.lock();
        let mut id = PollId::mint();
        while inner.polls.contains_key(&id) {
            id = PollId::mint();
        }
        let poll = Poll {
            id: id.clone(),
            question: question.into(),
            creator,
            votes: BTreeMap::new(),
            created_at: Utc::now(),
        };
        let _ = inner.polls.insert(id.clone(), poll.clone());
        inner.order.push_back(id);

        if let Some(max) = self.max_polls {
            while inner.order.len() > max {
                if let Some(evicted) = inner.order.pop_front() {
                    let _ = inner.polls.remove(&evicted);
                    debug!(poll_id = %evicted, "evicted oldest poll");
                }
            }
        }
        poll
    }

    /// Record `subject`'s vote, replacing any earlier one.
    ///
    /// Returns the full vote map after the change, or `None` if the poll
    /// does not exist.
    pub fn vote(&self, poll_id: &PollId, subject: &str, vote: Vote) -> Option<BTreeMap<String, Vote>> {
        self.vote_with(poll_id, subject, vote, BTreeMap::clone)
    }

    /// Record a vote and hand the updated map to `publish` before the store
    /// lock is released.
    ///
    /// Updates to the same store are published in the order they were
    /// applied, so the last tally a client sees is the stored one. `publish`
    /// must not block or touch this store.
    pub fn vote_with<R>(
        &self,
        poll_id: &PollId,
        subject: &str,
        vote: Vote,
        publish: impl FnOnce(&BTreeMap<String, Vote>) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        let poll = inner.polls.get_mut(poll_id)?;
        let _ = poll.votes.insert(subject.to_owned(), vote);
        Some(publish(&poll.votes))
    }

    /// Snapshot of one poll.
    pub fn get(&self, poll_id: &PollId) -> Option<Poll> {
        self.inner.lock().polls.get(poll_id).cloned()
    }

    /// Number of stored polls.
    pub fn len(&self) -> usize {
        self.inner.lock().polls.len()
    }

    /// Whether no polls are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PollStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn ann() -> Identity {
        Identity::member("a", "Ann")
    }

    #[test]
    fn create_starts_empty() {
        let store = PollStore::new();
        let poll = store.create("Pizza?", ann());
        assert!(poll.id.starts_with("poll_"));
        assert!(poll.votes.is_empty());
        assert_eq!(poll.creator.display_name, "Ann");
        assert_eq!(store.get(&poll.id), Some(poll));
    }

    #[test]
    fn ids_are_unique() {
        let store = PollStore::new();
        let ids: HashSet<PollId> = (0..200).map(|_| store.create("q", ann()).id).collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn repeat_vote_replaces() {
        let store = PollStore::new();
        let poll = store.create("q", ann());
        let _ = store.vote(&poll.id, "b", Vote::Up).unwrap();
        let votes = store.vote(&poll.id, "b", Vote::Down).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes["b"], Vote::Down);
    }

    #[test]
    fn votes_from_several_subjects() {
        let store = PollStore::new();
        let poll = store.create("q", ann());
        let _ = store.vote(&poll.id, "b", Vote::Up);
        let votes = store.vote(&poll.id, "c", Vote::Down).unwrap();
        assert_eq!(votes["b"], Vote::Up);
        assert_eq!(votes["c"], Vote::Down);
    }

    #[test]
    fn vote_on_unknown_poll_is_none() {
        let store = PollStore::new();
        assert!(store.vote(&PollId::from("poll_missing"), "b", Vote::Up).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn limit_evicts_oldest() {
        let store = PollStore::with_limit(Some(2));
        let first = store.create("1", ann());
        let second = store.create("2", ann());
        let third = store.create("3", ann());
        assert_eq!(store.len(), 2);
        assert!(store.get(&first.id).is_none());
        assert!(store.get(&second.id).is_some());
        assert!(store.get(&third.id).is_some());
        assert!(store.vote(&first.id, "b", Vote::Up).is_none());
    }

    #[test]
    fn vote_with_publishes_only_known_polls() {
        let store = PollStore::new();
        let poll = store.create("q", ann());
        let mut calls = 0;
        assert_eq!(
            store.vote_with(&poll.id, "b", Vote::Down, |votes| {
                calls += 1;
                votes.len()
            }),
            Some(1)
        );
        let missing = PollId::from_string("poll_gone".into());
        assert_eq!(store.vote_with(&missing, "b", Vote::Up, |_| calls += 1), None);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn concurrent_votes_all_land() {
        let store = Arc::new(PollStore::new());
        let poll = store.create("q", ann());
        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            let id = poll.id.clone();
            tasks.push(tokio::spawn(async move {
                let _ = store.vote(&id, &format!("s{i}"), Vote::Up);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.get(&poll.id).unwrap().votes.len(), 50);
    }
}
