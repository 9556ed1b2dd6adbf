//! # termpoll-core
//!
//! Core types for termpoll.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other termpoll crates. It provides:
//!
//! - Session types (SessionId, SessionState, ShellConfig, SessionDescriptor)
//! - Topic and message types for the per-session log
//! - Sentinel markers and the shell hook that prints them
//! - Terminal geometry
//! - Configuration and error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod markers;
pub mod message;
pub mod session;

// Re-export commonly used types
pub use config::{ServerConfig, ServerSettings, ShutdownSettings, TerminalSettings};
pub use error::{Error, Result};
pub use geometry::Dimensions;
pub use markers::Markers;
pub use message::{Cursor, Message, MessageId, Payload, Topic, TopicId, TopicKind, Updates};
pub use session::{SessionDescriptor, SessionId, SessionState, ShellConfig};
