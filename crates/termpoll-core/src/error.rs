//! Error types for termpoll.

use thiserror::Error;

use crate::SessionId;

/// Main error type for termpoll operations.
#[derive(Debug, Error)]
pub enum Error {
    /// PTY allocation or shell start failed; no session was registered
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Operation attempted on a session that is terminating or reaped
    #[error("Session terminated: {0}")]
    SessionTerminated(SessionId),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// Unsupported terminal geometry
    #[error("Invalid dimensions: {rows}x{cols}")]
    InvalidDimensions {
        /// Number of rows
        rows: u16,
        /// Number of columns
        cols: u16,
    },

    /// PTY-related errors after the session exists
    #[error("PTY error: {0}")]
    Pty(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
