//! Parameter and response types for each MCP tool.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use termpoll_core::{Cursor, SessionDescriptor, SessionId};

// =============================================================================
// Session Management
// =============================================================================

/// Parameters for `session_create`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CreateParams {
    /// Shell executable; defaults to the configured shell
    #[serde(default)]
    pub shell: Option<String>,

    /// Shell arguments; default to the configured arguments
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Extra environment variables on top of the configured environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Parameters for `session_close`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloseParams {
    /// Session to close
    pub session_id: SessionId,
}

/// Response for `session_close`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloseResponse {
    /// Session after shutdown
    pub session: SessionDescriptor,

    /// Last shutdown step taken: `hangup`, `terminate` or `kill`
    pub escalation: String,

    /// Shell exit code, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,
}

/// Parameters for `session_list`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListParams {}

/// Response for `session_list`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListResponse {
    /// Known sessions, oldest first
    pub sessions: Vec<SessionDescriptor>,

    /// Total count
    pub count: usize,
}

// =============================================================================
// Input
// =============================================================================

/// Parameters for `session_write`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteParams {
    /// Target session
    pub session_id: SessionId,

    /// Text to send; include "\n" to run a command
    pub data: String,
}

/// Response for `session_write`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteResponse {
    /// Bytes written to the terminal
    pub bytes_written: usize,
}

/// Parameters for `session_interrupt`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InterruptParams {
    /// Target session
    pub session_id: SessionId,
}

/// Response for `session_interrupt`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InterruptResponse {
    /// False when the foreground job had already exited
    pub delivered: bool,
}

/// Parameters for `session_resize`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResizeParams {
    /// Target session
    pub session_id: SessionId,

    /// Rows; only 24 is supported
    pub rows: u16,

    /// Columns; only 80 is supported
    pub cols: u16,
}

/// Response for `session_resize`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResizeResponse {
    /// Applied rows
    pub rows: u16,

    /// Applied columns
    pub cols: u16,
}

// =============================================================================
// Polling
// =============================================================================

/// Parameters for `session_updates`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdatesParams {
    /// Session to read
    pub session_id: SessionId,

    /// Cursor from the previous response; omit to read from the start
    #[serde(default)]
    pub since: Option<Cursor>,

    /// Wait up to this many milliseconds for a new message
    #[serde(default)]
    pub wait_ms: Option<u64>,
}
