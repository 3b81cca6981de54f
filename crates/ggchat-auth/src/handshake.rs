//! Pending login table.
//!
//! The desktop client cannot receive the browser redirect itself, so login
//! is a three-step rendezvous keyed by a random correlation ID:
//!
//! 1. `begin` mints the ID, which doubles as the OAuth `state` parameter
//! 2. `complete` attaches the signed credential once the callback lands
//! 3. `poll` hands the credential to the client exactly once
//!
//! Entries older than the TTL are purged on every access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::AuthError;

/// Default lifetime of a pending login.
pub const DEFAULT_LOGIN_TTL: Duration = Duration::from_secs(10 * 60);

/// Response to `begin-auth`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginStart {
    /// Where the user's browser should go.
    pub authorization_url: String,
    /// Key for subsequent polling.
    pub correlation_id: String,
}

/// Result of polling a login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginStatus {
    /// Callback has not arrived yet.
    Pending,
    /// Signed credential, removed from the table by this call.
    Ready(String),
    /// Never issued, already collected, or expired.
    Unknown,
}

#[derive(Debug)]
struct PendingEntry {
    created: Instant,
    credential: Option<String>,
}

/// Thread-safe table of in-flight logins.
#[derive(Debug)]
pub struct PendingLogins {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl Default for PendingLogins {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_TTL)
    }
}

impl PendingLogins {
    /// Empty table with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new login and return its correlation ID.
    pub fn begin(&self) -> String {
        let random_bytes: [u8; 24] = rand::random();
        let correlation_id = URL_SAFE_NO_PAD.encode(random_bytes);
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        let _ = entries.insert(
            correlation_id.clone(),
            PendingEntry {
                created: Instant::now(),
                credential: None,
            },
        );
        correlation_id
    }

    /// Whether `correlation_id` is awaiting completion.
    pub fn is_pending(&self, correlation_id: &str) -> bool {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries
            .get(correlation_id)
            .is_some_and(|e| e.credential.is_none())
    }

    /// Attach a signed credential to a pending login.
    pub fn complete(&self, correlation_id: &str, credential: String) -> Result<(), AuthError> {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        match entries.get_mut(correlation_id) {
            Some(entry) => {
                entry.credential = Some(credential);
                Ok(())
            }
            None => Err(AuthError::UnknownCorrelation(correlation_id.to_string())),
        }
    }

    /// Collect the credential for a login, if it is ready.
    pub fn poll(&self, correlation_id: &str) -> LoginStatus {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        match entries.get(correlation_id) {
            None => LoginStatus::Unknown,
            Some(e) if e.credential.is_none() => LoginStatus::Pending,
            Some(_) => match entries.remove(correlation_id).and_then(|e| e.credential) {
                Some(token) => LoginStatus::Ready(token),
                None => LoginStatus::Unknown,
            },
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(&self, entries: &mut HashMap<String, PendingEntry>) {
        let ttl = self.ttl;
        entries.retain(|_, e| e.created.elapsed() < ttl);
    }
}
