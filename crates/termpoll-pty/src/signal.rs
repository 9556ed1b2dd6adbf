//! Process-group signal delivery.
//!
//! A group that vanished before the signal landed is reported as
//! [`SignalOutcome::AlreadyGone`], never as an error.

use std::io;

use tracing::debug;

/// Signals the controller and sequencer send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, as from a Ctrl-C keypress
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    fn as_raw(&self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }

    /// Conventional signal name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The group existed and the signal was queued
    Delivered,
    /// No process in the group was left to receive it
    AlreadyGone,
}

/// Send `signal` to every process in group `pgid`.
///
/// Refuses group ids that would address the caller's own group.
pub fn signal_process_group(pgid: i32, signal: Signal) -> io::Result<SignalOutcome> {
    if pgid <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal process group {pgid}"),
        ));
    }
    // SAFETY: getpgrp has no preconditions.
    if pgid == unsafe { libc::getpgrp() } {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to signal our own process group",
        ));
    }

    // SAFETY: killpg only reads its integer arguments.
    let rc = unsafe { libc::killpg(pgid, signal.as_raw()) };
    if rc == 0 {
        debug!("Sent {} to process group {}", signal.name(), pgid);
        return Ok(SignalOutcome::Delivered);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(
            "Process group {} already gone before {}",
            pgid,
            signal.name()
        );
        Ok(SignalOutcome::AlreadyGone)
    } else {
        Err(err)
    }
}
