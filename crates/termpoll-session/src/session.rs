//! A single shell session: PTY, read loop, state machine and shutdown.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use termpoll_core::{
    Dimensions, Error, Markers, Payload, Result, SessionDescriptor, SessionId, SessionState,
    ShellConfig,
};
use termpoll_pty::{
    FrameEvent, Framer, PtyProcess, PtyReader, ShutdownReport, ShutdownSequencer, ShutdownTimings,
    SignalOutcome,
};

use crate::log::TopicLog;

/// A shell running on its own PTY, publishing to the shared [`TopicLog`].
///
/// One background thread per session is the only reader of the terminal.
/// Input, interrupts and resizes never wait on that thread, and interrupts
/// never wait on pending input.
pub struct Session {
    /// Session identifier
    id: SessionId,

    /// Config the shell was started with
    config: ShellConfig,

    /// Terminal and child process
    pty: PtyProcess,

    /// Teardown, run at most once
    sequencer: ShutdownSequencer,

    /// Shared message log
    log: Arc<TopicLog>,

    state: Mutex<SessionState>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    reaped_at: Mutex<Option<DateTime<Utc>>>,

    /// Serializes external close with shutdown on end of stream
    shutdown_lock: Mutex<()>,

    /// Read loop thread
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pid", &self.pty.pid())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start `config.shell` on a new PTY and begin reading its output.
    ///
    /// The session starts in [`SessionState::Starting`] and moves to
    /// `Ready` when the shell prints the prompt-ready marker. A shell whose
    /// environment does not print `markers` stays in `Starting`.
    pub fn spawn(
        config: ShellConfig,
        markers: Markers,
        timings: ShutdownTimings,
        log: Arc<TopicLog>,
    ) -> Result<Arc<Self>> {
        let (pty, reader) = PtyProcess::spawn(&config)?;

        let id = SessionId::new();
        log.register(id);
        let now = Utc::now();

        let session = Arc::new(Self {
            id,
            config,
            pty,
            sequencer: ShutdownSequencer::new(timings),
            log,
            state: Mutex::new(SessionState::Starting),
            created_at: now,
            last_activity: Mutex::new(now),
            reaped_at: Mutex::new(None),
            shutdown_lock: Mutex::new(()),
            reader: Mutex::new(None),
        });

        let framer = Framer::new(markers);
        let worker = Arc::clone(&session);
        let handle = thread::Builder::new()
            .name(format!("termpoll-read-{}", id))
            .spawn(move || worker.read_loop(reader, framer));

        match handle {
            Ok(handle) => {
                *session.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(e) => {
                error!("Failed to start read loop for session {}: {}", id, e);
                session.close();
                session.log.remove(&id);
                return Err(Error::Spawn(format!("Failed to start read loop: {e}")));
            }
        }

        info!(
            "Session created: id={}, shell='{}', pid={:?}",
            id,
            session.config.shell,
            session.pty.pid()
        );
        Ok(session)
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Config the shell was started with.
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shell process id.
    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last input or output.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When the process was collected, if it has been.
    pub fn reaped_at(&self) -> Option<DateTime<Utc>> {
        *self.reaped_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outcome of the shutdown sequence, once it has run.
    pub fn shutdown_report(&self) -> Option<ShutdownReport> {
        self.sequencer.report()
    }

    /// API view of the session.
    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id,
            state: self.state(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at(),
            pid: self.pty.pid(),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Move `current` to `to` and publish the change. Illegal moves are ignored.
    fn apply_transition(
        &self,
        current: &mut SessionState,
        to: SessionState,
        exit_code: Option<u32>,
    ) -> bool {
        if !current.can_transition_to(to) {
            debug!(
                "Ignoring transition {} -> {} for session {}",
                current, to, self.id
            );
            return false;
        }

        let from = *current;
        *current = to;
        info!("Session state changed: id={}, {} → {}", self.id, from, to);

        let payload = Payload::StateChange {
            from,
            to,
            exit_code,
        };
        if let Err(e) = self.log.append(&self.id, payload) {
            warn!("Failed to publish state change for session {}: {}", self.id, e);
        }
        true
    }

    fn transition(&self, to: SessionState, exit_code: Option<u32>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.apply_transition(&mut state, to, exit_code)
    }

    /// Write input to the shell.
    ///
    /// A line terminator written while `Ready` moves the session to `Busy`.
    /// If the write then fails while the session is still live, it moves
    /// back to `Ready`.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let marked_busy = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.accepts_input() {
                return Err(Error::SessionTerminated(self.id));
            }
            // Marked busy before the bytes go out so a fast stop mark can
            // never arrive ahead of it.
            *state == SessionState::Ready
                && data.iter().any(|b| matches!(b, b'\r' | b'\n'))
                && self.apply_transition(&mut state, SessionState::Busy, None)
        };

        match self.pty.write(data) {
            Ok(written) => {
                debug!("Wrote {} bytes to session {}", written, self.id);
                self.touch();
                Ok(written)
            }
            Err(e) => {
                let err = self.terminated_or(e);
                if marked_busy && !matches!(err, Error::SessionTerminated(_)) {
                    warn!("Write to session {} failed: {}", self.id, err);
                    self.abandon_command();
                }
                Err(err)
            }
        }
    }

    /// Undo the `Ready -> Busy` move of a command that never reached the shell.
    fn abandon_command(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Busy {
            self.apply_transition(&mut state, SessionState::Ready, None);
        }
    }

    /// Send SIGINT to whatever runs in the foreground of the terminal.
    pub fn send_interrupt(&self) -> Result<SignalOutcome> {
        if !self.state().accepts_input() {
            return Err(Error::SessionTerminated(self.id));
        }
        let outcome = self.pty.send_interrupt().map_err(|e| self.terminated_or(e))?;
        info!("Interrupt for session {}: {:?}", self.id, outcome);
        self.touch();
        Ok(outcome)
    }

    /// Apply terminal geometry. Only 24x80 is accepted.
    pub fn resize(&self, dimensions: Dimensions) -> Result<()> {
        if !self.state().accepts_input() {
            return Err(Error::SessionTerminated(self.id));
        }
        self.pty.resize(dimensions).map_err(|e| self.terminated_or(e))
    }

    /// PTY errors after shutdown started mean the session is gone.
    fn terminated_or(&self, err: Error) -> Error {
        match err {
            Error::Pty(_) | Error::Io(_) if self.pty.is_closed() || self.state().is_terminating() => {
                Error::SessionTerminated(self.id)
            }
            other => other,
        }
    }

    /// Shut the session down and collect the shell.
    ///
    /// Safe to call any number of times and from any thread; every call
    /// returns the report of the one shutdown that actually ran.
    pub fn close(&self) -> ShutdownReport {
        let _guard = self
            .shutdown_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shutdown()
    }

    fn shutdown(&self) -> ShutdownReport {
        if let Some(report) = self.sequencer.report() {
            return report;
        }

        info!("Shutting down session {}", self.id);
        self.transition(SessionState::Terminating, None);
        let report = self.sequencer.run(&self.pty);
        self.join_reader();

        *self.reaped_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.transition(SessionState::Reaped, report.exit_code);
        info!(
            "Session reaped: id={}, escalation={:?}, exit_code={:?}",
            self.id, report.escalation, report.exit_code
        );
        report
    }

    /// Wait for the read loop, unless we are the read loop.
    fn join_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Read loop for session {} panicked", self.id);
        }
    }

    fn read_loop(self: Arc<Self>, mut reader: PtyReader, mut framer: Framer) {
        debug!("Read loop started for session {}", self.id);
        loop {
            match reader.next_chunk() {
                Ok(Some(chunk)) => {
                    debug!("Read {} bytes from session {}", chunk.len(), self.id);
                    self.touch();
                    for event in framer.feed(&chunk) {
                        self.publish(event);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Read error on session {}: {}", self.id, e);
                    break;
                }
            }
        }
        drop(reader);

        for event in framer.flush() {
            self.publish(event);
        }

        if self.pty.is_closed() {
            debug!("Read loop for session {} released the terminal", self.id);
            return;
        }

        info!("Shell of session {} hung up", self.id);
        match self.shutdown_lock.try_lock() {
            Ok(_guard) => {
                self.shutdown();
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let _guard = poisoned.into_inner();
                self.shutdown();
            }
            // An external close is already running the sequence.
            Err(TryLockError::WouldBlock) => {}
        }
    }

    fn publish(&self, event: FrameEvent) {
        let follow_up = match event {
            FrameEvent::PromptReady => Some((SessionState::Starting, SessionState::Ready)),
            FrameEvent::StopMark { .. } => Some((SessionState::Busy, SessionState::Ready)),
            FrameEvent::Output(_) => None,
        };

        if let Err(e) = self.log.append(&self.id, event.into()) {
            warn!("Failed to publish output for session {}: {}", self.id, e);
        }

        if let Some((from, to)) = follow_up {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == from {
                self.apply_transition(&mut state, to, None);
            }
        }
    }
}
