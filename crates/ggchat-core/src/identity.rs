//! Verified identity carried by every admitted connection.

use serde::{Deserialize, Serialize};

/// Role flag derived from external group membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular guild member.
    #[default]
    Member,
    /// Guild officer.
    Officer,
}

impl Role {
    /// Map an "is officer" flag onto a role.
    pub fn from_officer_flag(is_officer: bool) -> Self {
        if is_officer { Self::Officer } else { Self::Member }
    }

    /// Whether this role is [`Role::Officer`].
    pub fn is_officer(self) -> bool {
        matches!(self, Self::Officer)
    }
}

/// Subject fields of a verified credential.
///
/// Fixed at admission time: a connection never changes identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// External user ID.
    pub subject_id: String,
    /// Name shown next to chat messages.
    pub display_name: String,
    /// Member or officer.
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    /// Create a new identity.
    pub fn new(subject_id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
            role,
        }
    }

    /// Shorthand for a member identity.
    pub fn member(subject_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(subject_id, display_name, Role::Member)
    }
}
