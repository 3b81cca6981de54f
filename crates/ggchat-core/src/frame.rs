//! Frame wire shapes.
//!
//! Inbound frames are either a structured [`Command`] or plain chat text.
//! Anything that does not parse as a known command is chat text; that
//! fallback is the normal path, not an error.
//!
//! Outbound frames are a tagged union serialized as JSON with a `type` field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::PollId;

/// A vote on a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// Thumbs up.
    Up,
    /// Thumbs down.
    Down,
}

/// Structured inbound command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create a new poll.
    PollCreate {
        /// The question shown to everyone.
        question: String,
    },
    /// Vote on an existing poll.
    PollVote {
        /// Target poll.
        poll_id: PollId,
        /// Up or down.
        vote: Vote,
    },
    /// Ask who is online; answered to the sender only.
    Presence,
}

/// Classified inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A recognized structured command.
    Command(Command),
    /// Anything else, routed as literal chat text.
    Chat(String),
}

/// Try to read a frame as a structured command.
///
/// Returns `None` for any payload that is not a JSON object of a known
/// command shape, including valid JSON of the wrong shape.
pub fn parse_command(payload: &str) -> Option<Command> {
    let trimmed = payload.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Classify an inbound frame, falling back to chat text.
pub fn parse_inbound(payload: &str) -> Inbound {
    match parse_command(payload) {
        Some(command) => Inbound::Command(command),
        None => Inbound::Chat(payload.to_owned()),
    }
}

/// Frame delivered to clients.
///
/// Serialized once per broadcast; every recipient gets identical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A chat line.
    Chat {
        /// Sender display name.
        sender: String,
        /// Message body.
        text: String,
    },
    /// A poll was created.
    PollCreated {
        /// New poll ID.
        poll_id: PollId,
        /// Poll question.
        question: String,
        /// Creator display name.
        creator: String,
    },
    /// A poll's votes changed.
    PollUpdated {
        /// Poll ID.
        poll_id: PollId,
        /// Current votes keyed by subject ID.
        votes: BTreeMap<String, Vote>,
    },
    /// Server-originated notice.
    SystemNotice {
        /// Notice body.
        text: String,
    },
    /// Reply to a presence ping.
    Presence {
        /// Distinct display names of connected users.
        online: Vec<String>,
    },
}

impl OutboundFrame {
    /// Build a chat frame.
    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Chat {
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Build a system notice.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::SystemNotice { text: text.into() }
    }

    /// Short type tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::PollCreated { .. } => "poll_created",
            Self::PollUpdated { .. } => "poll_updated",
            Self::SystemNotice { .. } => "system_notice",
            Self::Presence { .. } => "presence",
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Render a chat line the way the external channel shows it: `[name] text`.
pub fn render_chat_line(sender: &str, text: &str) -> String {
    format!("[{sender}] {text}")
}
