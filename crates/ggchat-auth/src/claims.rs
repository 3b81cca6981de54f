//! Credential claim set.

use ggchat_core::{Identity, Role};
use serde::{Deserialize, Serialize};

/// Signed credential contents.
///
/// Immutable once issued; never renewed in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// External user ID.
    #[serde(rename = "sub")]
    pub subject_id: String,
    /// Display name at issue time.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Member or officer.
    #[serde(default)]
    pub role: Role,
    /// Issue time, seconds since the epoch.
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expiry, seconds since the epoch.
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl Credential {
    /// The subject fields a connection is admitted with.
    pub fn identity(&self) -> Identity {
        Identity::new(&self.subject_id, &self.display_name, self.role)
    }

    /// Whether the credential is still valid at `now` (strictly before expiry).
    pub fn is_live_at(&self, now: i64) -> bool {
        self.expires_at > now
    }

    /// Seconds of validity left at `now`, zero once expired.
    pub fn remaining_secs(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

/// Current time in seconds since the epoch.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
