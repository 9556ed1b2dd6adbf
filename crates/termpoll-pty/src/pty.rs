//! PTY (Pseudo-Terminal) process control with portable-pty.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, error, info, warn};

use termpoll_core::{Dimensions, Error, Result, ShellConfig};

use crate::shutdown::{ProcessControl, ProcessStatus};
use crate::signal::{signal_process_group, Signal, SignalOutcome};

/// Size of a single read from the master.
const READ_CHUNK: usize = 16 * 1024;

/// How often blocked I/O re-checks whether the master was closed.
const IO_POLL: Duration = Duration::from_millis(50);

/// Upper bound on draining queued output once the master is released.
const DRAIN_LIMIT: Duration = Duration::from_millis(250);

/// Handle to a shell running on a PTY.
///
/// The master is non-blocking and split three ways. The writer lock
/// serializes input and may be held for as long as the shell is not
/// consuming it. The master lock only covers short ioctls (geometry and
/// job-control queries), so interrupts never wait behind a backed-up write.
/// The reader owns its own descriptor.
pub struct PtyProcess {
    pid: Option<u32>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<File>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    dimensions: Mutex<Dimensions>,
    /// Set first on close; pending writes give up.
    closing: Arc<AtomicBool>,
    /// Set once every master handle but the reader's is dropped.
    released: Arc<AtomicBool>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("closing", &self.closing.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Spawn the configured shell on a fresh PTY.
    ///
    /// The shell sees exactly `config.env`; the slave end is closed in this
    /// process before returning. The returned [`PtyReader`] is the only
    /// reader of the master.
    ///
    /// # Example
    /// ```no_run
    /// use termpoll_core::ShellConfig;
    /// use termpoll_pty::PtyProcess;
    ///
    /// # fn example() -> termpoll_core::Result<()> {
    /// let config = ShellConfig::new("/bin/sh").env("PATH", "/usr/bin:/bin");
    /// let (pty, mut reader) = PtyProcess::spawn(&config)?;
    /// pty.write(b"echo hello\n")?;
    /// let chunk = reader.next_chunk()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(config: &ShellConfig) -> Result<(Self, PtyReader)> {
        config.validate()?;
        info!(
            "Spawning PTY: shell='{}' args={:?}, dimensions={}x{}, cwd={:?}",
            config.shell, config.args, config.dimensions.rows, config.dimensions.cols, config.cwd
        );

        let pty_size = PtySize {
            rows: config.dimensions.rows,
            cols: config.dimensions.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = native_pty_system().openpty(pty_size).map_err(|e| {
            error!("Failed to open PTY: {}", e);
            Error::Spawn(format!("Failed to open PTY: {e}"))
        })?;

        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.env_clear();
        for arg in &config.args {
            cmd.arg(arg);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.cwd {
            cmd.cwd(dir);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn shell '{}': {}", config.shell, e);
            Error::Spawn(format!("Failed to spawn shell: {e}"))
        })?;
        drop(pair.slave);

        let (writer_fd, reader_fd) = match Self::open_io(&*pair.master) {
            Ok(io) => io,
            Err(e) => {
                // Never leave an orphaned shell behind a failed create.
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let pid = child.process_id();
        let released = Arc::new(AtomicBool::new(false));
        info!("PTY spawned successfully: shell='{}', pid={:?}", config.shell, pid);

        let process = Self {
            pid,
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(File::from(writer_fd))),
            child: Mutex::new(child),
            dimensions: Mutex::new(config.dimensions),
            closing: Arc::new(AtomicBool::new(false)),
            released: Arc::clone(&released),
        };
        let reader = PtyReader {
            file: File::from(reader_fd),
            released,
            poll_interval: IO_POLL,
            drain_deadline: None,
        };

        Ok((process, reader))
    }

    /// Switch the master to non-blocking mode and take private,
    /// close-on-exec duplicates for the writer and the reader.
    fn open_io(master: &(dyn MasterPty + Send)) -> Result<(OwnedFd, OwnedFd)> {
        let master_fd: RawFd = master
            .as_raw_fd()
            .ok_or_else(|| Error::Spawn("PTY master has no file descriptor".to_string()))?;

        set_nonblocking(master_fd)
            .map_err(|e| Error::Spawn(format!("Failed to make PTY master non-blocking: {e}")))?;

        let dup = |role: &str| {
            dup_cloexec(master_fd)
                .map_err(|e| Error::Spawn(format!("Failed to duplicate PTY master for {role}: {e}")))
        };
        Ok((dup("writer")?, dup("reader")?))
    }

    /// Shell process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current terminal geometry.
    pub fn dimensions(&self) -> Dimensions {
        *self.dimensions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the master has been closed.
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn master(&self) -> MutexGuard<'_, Option<Box<dyn MasterPty + Send>>> {
        self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write all of `data` to the master.
    ///
    /// Blocks while the terminal's input queue is full. Closing the master
    /// makes a pending write fail within one poll interval; bytes already
    /// accepted by the terminal stay written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        debug!("Writing {} bytes to PTY (pid={:?})", data.len(), self.pid);
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| Error::Pty(format!("Lock error: {e}")))?;
        let file = writer
            .as_mut()
            .ok_or_else(|| Error::Pty("PTY master is closed".to_string()))?;

        let mut written = 0;
        while written < data.len() {
            if self.is_closed() {
                return Err(Error::Pty(format!(
                    "PTY master closed after {} of {} bytes",
                    written,
                    data.len()
                )));
            }
            match file.write(&data[written..]) {
                Ok(0) => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(file.as_raw_fd(), libc::POLLOUT, IO_POLL).map_err(Error::Io)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(written)
    }

    /// Apply terminal geometry. Only the fixed geometry is accepted.
    pub fn resize(&self, dimensions: Dimensions) -> Result<()> {
        if !dimensions.is_supported() {
            return Err(Error::InvalidDimensions {
                rows: dimensions.rows,
                cols: dimensions.cols,
            });
        }
        info!(
            "Resizing PTY (pid={:?}) to {}x{}",
            self.pid, dimensions.rows, dimensions.cols
        );

        let master = self.master();
        let master = master
            .as_ref()
            .ok_or_else(|| Error::Pty("PTY master is closed".to_string()))?;

        master
            .resize(PtySize {
                rows: dimensions.rows,
                cols: dimensions.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(format!("Resize failed: {e}")))?;

        *self.dimensions.lock().unwrap_or_else(PoisonError::into_inner) = dimensions;
        Ok(())
    }

    /// Foreground process group of the terminal, queried now.
    pub fn foreground_process_group(&self) -> Option<i32> {
        self.master()
            .as_ref()
            .and_then(|master| master.process_group_leader())
    }

    /// Deliver SIGINT to the foreground process group, like Ctrl-C.
    ///
    /// Does not wait for pending input. A group that exited between the
    /// query and the signal, or a master that is already closed, yields
    /// [`SignalOutcome::AlreadyGone`].
    pub fn send_interrupt(&self) -> Result<SignalOutcome> {
        let Some(pgid) = self.foreground_process_group() else {
            debug!("No foreground process group for pid={:?}", self.pid);
            return Ok(SignalOutcome::AlreadyGone);
        };

        debug!("Interrupting foreground process group {}", pgid);
        signal_process_group(pgid, Signal::Interrupt).map_err(Error::Io)
    }

    /// Close the master. Returns false if it was already closed.
    ///
    /// A pending write is abandoned first. The reader then drains what the
    /// terminal already queued and releases its descriptor, at which point
    /// the terminal hangs up.
    pub fn close_master(&self) -> bool {
        self.closing.store(true, Ordering::SeqCst);
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let master = self.master().take();
        self.released.store(true, Ordering::SeqCst);

        let was_open = writer.is_some() || master.is_some();
        if was_open {
            debug!("Closing PTY master (pid={:?})", self.pid);
        }
        drop(writer);
        drop(master);
        was_open
    }

    /// Non-blocking exit check.
    pub fn try_wait(&self) -> ProcessStatus {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(Some(status)) => ProcessStatus::Exited(Some(status.exit_code())),
            Ok(None) => ProcessStatus::Running,
            Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
                debug!("Child pid={:?} already collected", self.pid);
                ProcessStatus::Exited(None)
            }
            Err(e) => {
                warn!("try_wait failed for pid={:?}: {}", self.pid, e);
                ProcessStatus::Running
            }
        }
    }

    /// Block until the shell exits and collect it.
    pub fn wait(&self) -> Option<u32> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                debug!("wait for pid={:?} returned {}", self.pid, e);
                None
            }
        }
    }

    /// Signal the shell's own process group (the shell leads its session).
    pub fn signal_shell_group(&self, signal: Signal) -> SignalOutcome {
        let Some(pid) = self.pid else {
            return SignalOutcome::AlreadyGone;
        };
        match signal_process_group(pid as i32, signal) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to send {} to pid={}: {}", signal.name(), pid, e);
                SignalOutcome::AlreadyGone
            }
        }
    }
}

impl ProcessControl for PtyProcess {
    fn close_terminal(&self) {
        self.close_master();
    }

    fn poll_exit(&self) -> ProcessStatus {
        self.try_wait()
    }

    fn signal(&self, signal: Signal) -> SignalOutcome {
        self.signal_shell_group(signal)
    }

    fn reap(&self) -> Option<u32> {
        self.wait()
    }
}

/// Sole reader of a PTY master.
///
/// Reads block in `poll(2)` with a short timeout so the reader can observe
/// that the master was released and let go of its descriptor.
#[derive(Debug)]
pub struct PtyReader {
    file: File,
    released: Arc<AtomicBool>,
    poll_interval: Duration,
    drain_deadline: Option<Instant>,
}

impl PtyReader {
    /// Next chunk of output, or `None` at end of stream.
    ///
    /// End of stream is the shell side closing (EIO on Linux), a zero-length
    /// read, or the master having been released by
    /// [`PtyProcess::close_master`] and the queued output drained.
    pub fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let timeout = if self.released.load(Ordering::SeqCst) {
                let deadline = *self
                    .drain_deadline
                    .get_or_insert_with(|| Instant::now() + DRAIN_LIMIT);
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                Duration::ZERO
            } else {
                self.poll_interval
            };
            let draining = self.drain_deadline.is_some();

            if !wait_ready(self.file.as_raw_fd(), libc::POLLIN, timeout)? {
                if draining {
                    return Ok(None);
                }
                continue;
            }

            let mut buffer = vec![0u8; READ_CHUNK];
            match self.file.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buffer.truncate(n);
                    return Ok(Some(buffer));
                }
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && draining => return Ok(None),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wait up to `timeout` for `events` on `fd`. Hangup and error conditions
/// count as ready so the following read or write reports them.
fn wait_ready(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: one valid pollfd for the duration of the call.
    let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ready > 0)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn dup_cloexec(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: F_DUPFD_CLOEXEC on a descriptor we own returns a new one or -1.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `dup` is a fresh descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}
