//! # termpoll-session
//!
//! Session lifecycle and the topic log for termpoll.
//!
//! This crate provides:
//! - The per-session unit: PTY, read loop, state machine, shutdown
//! - The append-only topic log with cursor-based incremental reads
//! - The session registry that ties sessions to the shared log
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on termpoll-core
//! and termpoll-pty to manage shell session lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod log;
pub mod manager;
pub mod session;

// Re-export commonly used types
pub use log::TopicLog;
pub use manager::SessionRegistry;
pub use session::Session;
