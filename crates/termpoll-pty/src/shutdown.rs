//! Deterministic, idempotent teardown of a session's process.
//!
//! The sequence is: close the terminal (hangup), poll for exit, SIGTERM the
//! shell's group, poll again, SIGKILL, then one blocking reap. Each step is
//! bounded. A process that is already gone at any point counts as success.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use termpoll_core::ShutdownSettings;
use tracing::{debug, info, warn};

use crate::signal::{Signal, SignalOutcome};

/// Exit status observed by a non-blocking check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running
    Running,
    /// Exited (or was never ours to wait on); exit code if known
    Exited(Option<u32>),
}

/// Operations the sequencer drives. Implemented by [`crate::PtyProcess`].
pub trait ProcessControl {
    /// Close the terminal master. Must be safe to call more than once.
    fn close_terminal(&self);

    /// Non-blocking exit check.
    fn poll_exit(&self) -> ProcessStatus;

    /// Signal the process group of the shell.
    fn signal(&self, signal: Signal) -> SignalOutcome;

    /// Blocking wait that collects the process.
    fn reap(&self) -> Option<u32>;
}

/// How far the sequence had to escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Escalation {
    /// Closing the terminal was enough
    Hangup,
    /// SIGTERM was sent
    Terminate,
    /// SIGKILL was sent
    Kill,
}

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Last step taken
    pub escalation: Escalation,
    /// Shell exit code, if the platform reported one
    pub exit_code: Option<u32>,
}

/// Timing bounds for each waiting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimings {
    /// Window to poll for exit after hangup
    pub hangup_wait: Duration,
    /// Interval between status checks
    pub poll_interval: Duration,
    /// Window to poll for exit after SIGTERM
    pub terminate_wait: Duration,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        Self::from(&ShutdownSettings::default())
    }
}

impl From<&ShutdownSettings> for ShutdownTimings {
    fn from(settings: &ShutdownSettings) -> Self {
        Self {
            hangup_wait: Duration::from_millis(settings.hangup_wait_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            terminate_wait: Duration::from_millis(settings.terminate_wait_ms),
        }
    }
}

/// Runs the shutdown sequence at most once.
#[derive(Debug)]
pub struct ShutdownSequencer {
    timings: ShutdownTimings,
    report: Mutex<Option<ShutdownReport>>,
}

impl ShutdownSequencer {
    /// Create a sequencer with the given timings.
    pub fn new(timings: ShutdownTimings) -> Self {
        Self {
            timings,
            report: Mutex::new(None),
        }
    }

    /// Report of the completed sequence, if it has run.
    pub fn report(&self) -> Option<ShutdownReport> {
        *self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the sequence against `process`.
    ///
    /// Concurrent callers wait for the first one; later calls return its
    /// report without touching the process.
    pub fn run<P: ProcessControl + ?Sized>(&self, process: &P) -> ShutdownReport {
        let mut slot = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(report) = *slot {
            debug!("Shutdown already complete: {:?}", report);
            return report;
        }

        let report = self.sequence(process);
        info!(
            "Shutdown complete: escalation={:?}, exit_code={:?}",
            report.escalation, report.exit_code
        );
        *slot = Some(report);
        report
    }

    fn sequence<P: ProcessControl + ?Sized>(&self, process: &P) -> ShutdownReport {
        debug!("Shutdown step 1: closing terminal");
        process.close_terminal();

        let mut escalation = Escalation::Hangup;
        let mut status = self.wait_for_exit(process, self.timings.hangup_wait);

        if status == ProcessStatus::Running {
            escalation = Escalation::Terminate;
            if process.signal(Signal::Terminate) == SignalOutcome::AlreadyGone {
                debug!("Process gone before SIGTERM");
            }
            status = self.wait_for_exit(process, self.timings.terminate_wait);

            if status == ProcessStatus::Running {
                escalation = Escalation::Kill;
                warn!("Process survived SIGTERM, sending SIGKILL");
                if process.signal(Signal::Kill) == SignalOutcome::AlreadyGone {
                    debug!("Process gone before SIGKILL");
                }
            }
        }

        let polled_code = match status {
            ProcessStatus::Exited(code) => code,
            ProcessStatus::Running => None,
        };
        let exit_code = process.reap().or(polled_code);

        ShutdownReport {
            escalation,
            exit_code,
        }
    }

    /// Poll until the process exits or `window` elapses. Checks at least once.
    fn wait_for_exit<P: ProcessControl + ?Sized>(
        &self,
        process: &P,
        window: Duration,
    ) -> ProcessStatus {
        let deadline = Instant::now() + window;
        loop {
            let status = process.poll_exit();
            if status != ProcessStatus::Running {
                return status;
            }
            let now = Instant::now();
            if now >= deadline {
                return ProcessStatus::Running;
            }
            std::thread::sleep(self.timings.poll_interval.min(deadline - now));
        }
    }
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new(ShutdownTimings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted process: exits after a number of polls, or when a given
    /// signal arrives.
    #[derive(Default)]
    struct FakeProcess {
        exit_after_polls: Option<usize>,
        exits_on: Option<Signal>,
        ignores_all_signals: bool,
        vanishes_before_signal: bool,
        polls: AtomicUsize,
        closes: AtomicUsize,
        reaps: AtomicUsize,
        exited: AtomicBool,
        signals: Mutex<Vec<Signal>>,
    }

    impl FakeProcess {
        fn sent(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }
    }

    impl ProcessControl for FakeProcess {
        fn close_terminal(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn poll_exit(&self) -> ProcessStatus {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.exited.load(Ordering::SeqCst) {
                return ProcessStatus::Exited(Some(0));
            }
            match self.exit_after_polls {
                Some(limit) if n >= limit => {
                    self.exited.store(true, Ordering::SeqCst);
                    ProcessStatus::Exited(Some(0))
                }
                _ => ProcessStatus::Running,
            }
        }

        fn signal(&self, signal: Signal) -> SignalOutcome {
            self.signals.lock().unwrap().push(signal);
            if self.vanishes_before_signal {
                self.exited.store(true, Ordering::SeqCst);
            }
            if self.exited.load(Ordering::SeqCst) {
                return SignalOutcome::AlreadyGone;
            }
            if !self.ignores_all_signals
                && (self.exits_on == Some(signal) || signal == Signal::Kill)
            {
                self.exited.store(true, Ordering::SeqCst);
            }
            SignalOutcome::Delivered
        }

        fn reap(&self) -> Option<u32> {
            self.reaps.fetch_add(1, Ordering::SeqCst);
            if self.sent().contains(&Signal::Kill) {
                Some(137)
            } else {
                Some(0)
            }
        }
    }

    fn fast() -> ShutdownSequencer {
        ShutdownSequencer::new(ShutdownTimings {
            hangup_wait: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            terminate_wait: Duration::from_millis(30),
        })
    }

    #[test]
    fn test_exit_after_hangup_skips_signals() {
        // Exits on its own between closing the terminal and the first poll.
        let process = FakeProcess {
            exit_after_polls: Some(1),
            ..Default::default()
        };
        let report = fast().run(&process);

        assert_eq!(report.escalation, Escalation::Hangup);
        assert_eq!(report.exit_code, Some(0));
        assert!(process.sent().is_empty());
        assert_eq!(process.closes.load(Ordering::SeqCst), 1);
        assert_eq!(process.reaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slow_exit_within_hangup_window() {
        let process = FakeProcess {
            exit_after_polls: Some(3),
            ..Default::default()
        };
        let report = fast().run(&process);
        assert_eq!(report.escalation, Escalation::Hangup);
        assert!(!process.sent().contains(&Signal::Kill));
    }

    #[test]
    fn test_terminate_is_enough() {
        let process = FakeProcess {
            exits_on: Some(Signal::Terminate),
            ..Default::default()
        };
        let report = fast().run(&process);

        assert_eq!(report.escalation, Escalation::Terminate);
        assert_eq!(process.sent(), vec![Signal::Terminate]);
    }

    #[test]
    fn test_escalates_to_kill() {
        let process = FakeProcess::default();
        let report = fast().run(&process);

        assert_eq!(report.escalation, Escalation::Kill);
        assert_eq!(report.exit_code, Some(137));
        assert_eq!(process.sent(), vec![Signal::Terminate, Signal::Kill]);
    }

    #[test]
    fn test_already_gone_is_not_an_error() {
        // Exits in the gap between the last poll and SIGTERM.
        let process = FakeProcess {
            vanishes_before_signal: true,
            ..Default::default()
        };
        let report = fast().run(&process);

        assert_eq!(report.escalation, Escalation::Terminate);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(process.sent(), vec![Signal::Terminate]);
    }

    #[test]
    fn test_ignored_signals_still_reap() {
        let process = FakeProcess {
            ignores_all_signals: true,
            ..Default::default()
        };
        let report = fast().run(&process);
        assert_eq!(report.escalation, Escalation::Kill);
        assert_eq!(process.reaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_run_is_noop() {
        let process = FakeProcess {
            exit_after_polls: Some(1),
            ..Default::default()
        };
        let sequencer = fast();
        let first = sequencer.run(&process);
        let polls = process.polls.load(Ordering::SeqCst);

        let second = sequencer.run(&process);
        assert_eq!(first, second);
        assert_eq!(process.closes.load(Ordering::SeqCst), 1);
        assert_eq!(process.reaps.load(Ordering::SeqCst), 1);
        assert_eq!(process.polls.load(Ordering::SeqCst), polls);
        assert_eq!(sequencer.report(), Some(first));
    }

    #[test]
    fn test_timings_from_settings() {
        let settings = ShutdownSettings {
            hangup_wait_ms: 100,
            poll_interval_ms: 0,
            terminate_wait_ms: 200,
        };
        let timings = ShutdownTimings::from(&settings);
        assert_eq!(timings.hangup_wait, Duration::from_millis(100));
        assert_eq!(timings.poll_interval, Duration::from_millis(1));
        assert_eq!(timings.terminate_wait, Duration::from_millis(200));
    }
}
