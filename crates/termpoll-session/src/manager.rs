//! Session registry: the process-wide table of live and recently reaped sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use termpoll_core::{
    Cursor, Dimensions, Error, Markers, Result, ServerConfig, SessionDescriptor, SessionId,
    SessionState, ShellConfig, TerminalSettings, Updates,
};
use termpoll_pty::{ShutdownReport, ShutdownTimings, SignalOutcome};

use crate::log::TopicLog;
use crate::session::Session;

type SessionMap = HashMap<SessionId, Arc<Session>>;

/// Registry of sessions and owner of the shared [`TopicLog`].
///
/// Lookups clone an immutable snapshot of the table; inserts and removals
/// are serialized and publish a new snapshot. Create one per server and pass
/// it to whatever needs it.
pub struct SessionRegistry {
    sessions: RwLock<Arc<SessionMap>>,
    write_lock: Mutex<()>,
    log: Arc<TopicLog>,
    config: ServerConfig,
    markers: Markers,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.snapshot().len())
            .field("max_sessions", &self.config.server.max_sessions)
            .finish()
    }
}

impl SessionRegistry {
    /// Create a registry with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a registry with custom configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            sessions: RwLock::new(Arc::new(HashMap::new())),
            write_lock: Mutex::new(()),
            log: Arc::new(TopicLog::new()),
            config,
            markers: Markers::default(),
        }
    }

    /// Registry configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared message log.
    pub fn log(&self) -> &Arc<TopicLog> {
        &self.log
    }

    fn snapshot(&self) -> Arc<SessionMap> {
        Arc::clone(&self.sessions.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, map: SessionMap) {
        *self.sessions.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
    }

    /// Shell config for `terminal`, with this registry's prompt hook installed.
    pub fn shell_config(&self, terminal: &TerminalSettings) -> ShellConfig {
        terminal.shell_config(&self.markers)
    }

    /// Start a session with the configured shell, prompt and environment.
    pub fn create_default_session(&self) -> Result<Arc<Session>> {
        let config = self.shell_config(&self.config.terminal);
        self.create_session(config)
    }

    /// Start a session running `config`.
    ///
    /// Fails with [`Error::SessionLimitReached`] when `max_sessions` sessions
    /// are still live. Nothing is registered if the shell cannot be started.
    pub fn create_session(&self, config: ShellConfig) -> Result<Arc<Session>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.snapshot();
        let live = current
            .values()
            .filter(|s| s.state() != SessionState::Reaped)
            .count();
        let max = self.config.server.max_sessions;
        if live >= max {
            warn!("Session limit reached ({} live)", live);
            return Err(Error::SessionLimitReached(max));
        }

        let session = Session::spawn(
            config,
            self.markers.clone(),
            ShutdownTimings::from(&self.config.shutdown),
            Arc::clone(&self.log),
        )?;

        let mut next = SessionMap::clone(&current);
        next.insert(*session.id(), Arc::clone(&session));
        self.publish(next);

        Ok(session)
    }

    /// Get a session by ID.
    pub fn get_session(&self, session_id: &SessionId) -> Result<Arc<Session>> {
        self.snapshot()
            .get(session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(*session_id))
    }

    /// Write input to a session.
    pub fn write_input(&self, session_id: &SessionId, data: &[u8]) -> Result<usize> {
        self.get_session(session_id)?.write(data)
    }

    /// Interrupt the foreground job of a session.
    pub fn send_interrupt(&self, session_id: &SessionId) -> Result<SignalOutcome> {
        self.get_session(session_id)?.send_interrupt()
    }

    /// Resize a session's terminal.
    pub fn resize(&self, session_id: &SessionId, dimensions: Dimensions) -> Result<()> {
        self.get_session(session_id)?.resize(dimensions)
    }

    /// Shut a session down. The session stays queryable until it expires.
    ///
    /// Blocks for the duration of the shutdown sequence.
    pub fn close_session(&self, session_id: &SessionId) -> Result<ShutdownReport> {
        let session = self.get_session(session_id)?;
        Ok(session.close())
    }

    /// All known sessions, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionDescriptor> {
        let mut sessions: Vec<SessionDescriptor> =
            self.snapshot().values().map(|s| s.descriptor()).collect();
        sessions.sort_by_key(|d| d.created_at);
        sessions
    }

    /// Topics and messages of a session after `since`.
    pub fn get_updates(&self, session_id: &SessionId, since: Option<Cursor>) -> Result<Updates> {
        match self.log.updates(session_id, since) {
            Err(Error::SessionNotFound(_)) => Err(Error::SessionNotFound(*session_id)),
            other => other,
        }
    }

    /// Long-poll variant of [`SessionRegistry::get_updates`].
    pub async fn wait_for_updates(
        &self,
        session_id: &SessionId,
        since: Option<Cursor>,
        timeout: Duration,
    ) -> Result<Updates> {
        self.log.wait_since(session_id, since, timeout).await
    }

    /// Drop reaped sessions whose retention window ended before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let retention = chrono::Duration::from_std(self.config.server.retention())
            .unwrap_or(chrono::Duration::MAX);

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let expired: Vec<SessionId> = current
            .values()
            .filter(|s| {
                s.reaped_at()
                    .and_then(|at| at.checked_add_signed(retention))
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|s| *s.id())
            .collect();

        if expired.is_empty() {
            return expired;
        }

        let mut next = SessionMap::clone(&current);
        for id in &expired {
            next.remove(id);
            self.log.remove(id);
            debug!("Session expired: id={}", id);
        }
        self.publish(next);
        info!("Swept {} expired session(s)", expired.len());
        expired
    }

    /// Close every session that is still live.
    pub fn close_all(&self) -> Result<()> {
        for session in self.snapshot().values() {
            if session.state() != SessionState::Reaped {
                session.close();
            }
        }
        Ok(())
    }

    /// Sweep expired sessions every `reap_interval` on the current runtime.
    ///
    /// The task stops once the registry is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self
            .config
            .server
            .reap_interval()
            .max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!("Registry dropped, reaper exiting");
                    break;
                };
                registry.sweep_expired(Utc::now());
            }
        })
    }

    /// Number of sessions in the table, reaped ones included.
    pub fn session_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Number of sessions that have not been reaped.
    pub fn live_session_count(&self) -> usize {
        self.snapshot()
            .values()
            .filter(|s| s.state() != SessionState::Reaped)
            .count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
