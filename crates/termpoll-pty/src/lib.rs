//! # termpoll-pty
//!
//! PTY process control for termpoll.
//!
//! This crate provides:
//! - Shell spawning on a pseudo-terminal with a cleared environment
//! - Foreground process-group interrupts
//! - Prompt and stop-mark framing of the output stream
//! - A bounded, idempotent shutdown sequence
//!
//! Only Unix-like hosts are supported; process groups and `poll(2)` are used
//! directly.
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on termpoll-core
//! and knows nothing about sessions or the topic log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod framer;
pub mod pty;
pub mod shutdown;
pub mod signal;

// Re-export commonly used types
pub use framer::{FrameEvent, Framer};
pub use pty::{PtyProcess, PtyReader};
pub use shutdown::{
    Escalation, ProcessControl, ProcessStatus, ShutdownReport, ShutdownSequencer, ShutdownTimings,
};
pub use signal::{signal_process_group, Signal, SignalOutcome};
