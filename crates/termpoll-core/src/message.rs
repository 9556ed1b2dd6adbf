//! Topic and message types for the per-session log.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SessionId, SessionState};

/// Cursor value a polling client echoes back as `since`.
pub type Cursor = DateTime<Utc>;

/// Unique identifier for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TopicId(Uuid);

impl TopicId {
    /// Create a new random topic ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TopicId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TopicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of channel a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// Terminal output
    Stdout,
    /// Prompt, stop-mark and lifecycle events
    State,
}

impl TopicKind {
    /// All topic kinds, in the order a session creates them.
    pub const ALL: [TopicKind; 2] = [TopicKind::Stdout, TopicKind::State];

    /// Topic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::State => "state",
        }
    }
}

/// A named channel belonging to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Topic {
    /// Topic identifier
    pub id: TopicId,
    /// Owning session
    pub session_id: SessionId,
    /// Channel kind
    pub kind: TopicKind,
    /// Channel name
    pub name: String,
}

impl Topic {
    /// Create a topic of `kind` for `session_id`.
    pub fn new(session_id: SessionId, kind: TopicKind) -> Self {
        Self {
            id: TopicId::new(),
            session_id,
            kind,
            name: kind.as_str().to_string(),
        }
    }
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Terminal output with sentinels removed
    Output {
        /// Output text
        text: String,
    },
    /// The shell became interactive
    PromptReady,
    /// A command finished
    StopMark {
        /// Output bytes in the segment this mark closes
        output_bytes: usize,
    },
    /// Session state transition
    StateChange {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
        /// Shell exit code, on the transition into `reaped`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<u32>,
    },
}

impl Payload {
    /// Output payload from text.
    pub fn output(text: impl Into<String>) -> Self {
        Self::Output { text: text.into() }
    }

    /// Topic this payload is published on.
    pub fn topic_kind(&self) -> TopicKind {
        match self {
            Self::Output { .. } => TopicKind::Stdout,
            Self::PromptReady | Self::StopMark { .. } | Self::StateChange { .. } => {
                TopicKind::State
            }
        }
    }
}

/// One immutable entry of a session's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    /// Message identifier
    pub id: MessageId,
    /// Topic the message was appended to
    pub topic_id: TopicId,
    /// Owning session
    pub session_id: SessionId,
    /// Position in the session log, starting at 1
    pub seq: u64,
    /// Message payload
    pub payload: Payload,
    /// Creation time; doubles as the polling cursor
    pub created_at: Cursor,
}

/// Result of an incremental read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Updates {
    /// Topics of the session
    pub topics: Vec<Topic>,
    /// Messages strictly after the requested cursor, ascending
    pub messages: Vec<Message>,
    /// Cursor to send as `since` next time; unchanged when nothing is new
    pub cursor: Option<Cursor>,
}

impl Updates {
    /// Build updates, deriving the next cursor from the last message.
    pub fn new(topics: Vec<Topic>, messages: Vec<Message>, since: Option<Cursor>) -> Self {
        let cursor = messages.last().map(|m| m.created_at).or(since);
        Self {
            topics,
            messages,
            cursor,
        }
    }

    /// Whether no new messages were returned.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
