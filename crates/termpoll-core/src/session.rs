//! Session types: identifiers, lifecycle state, shell configuration.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Dimensions, Error};

/// Unique identifier for a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid session id '{s}': {e}")))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a shell session.
///
/// `Starting → Ready ⇄ Busy → Terminating → Reaped`. Any live state may jump
/// to `Terminating`; `Reaped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Shell spawned, prompt marker not seen yet
    Starting,
    /// Shell is waiting at its prompt
    Ready,
    /// A command is running
    Busy,
    /// Shutdown requested or the shell exited
    Terminating,
    /// Process collected; only the log remains
    Reaped,
}

impl SessionState {
    /// Whether input may be written in this state.
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready | Self::Busy)
    }

    /// Whether the session is past the point of accepting input.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::Terminating | Self::Reaped)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Starting | Ready | Busy, Terminating)
                | (Terminating, Reaped)
        )
    }

    /// Lower-case name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Terminating => "terminating",
            Self::Reaped => "reaped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to start a session's shell.
///
/// The environment is exactly `env`; nothing is inherited from the host
/// process unless it was copied in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ShellConfig {
    /// Shell executable path
    pub shell: String,
    /// Shell arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Complete environment of the shell
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Terminal geometry
    #[serde(default)]
    pub dimensions: Dimensions,
    /// Working directory for the shell
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ShellConfig {
    /// Create a config for `shell` with no arguments and an empty environment.
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            dimensions: Dimensions::FIXED,
            cwd: None,
        }
    }

    /// Add a shell argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Check the config before spawning.
    pub fn validate(&self) -> crate::Result<()> {
        if self.shell.trim().is_empty() {
            return Err(Error::InvalidInput("shell path cannot be empty".to_string()));
        }
        if !self.dimensions.is_supported() {
            return Err(Error::InvalidDimensions {
                rows: self.dimensions.rows,
                cols: self.dimensions.cols,
            });
        }
        Ok(())
    }
}

/// Summary of a session as exposed to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionDescriptor {
    /// Session identifier
    pub id: SessionId,
    /// Current state
    pub state: SessionState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last input or output
    pub last_activity_at: DateTime<Utc>,
    /// Shell process id, if it was known at spawn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}
