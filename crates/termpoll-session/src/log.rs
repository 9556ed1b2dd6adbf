//! Append-only topic log with cursor-based incremental reads.
//!
//! Every message gets a timestamp strictly greater than the previous one
//! handed out by the same log, so a client that echoes back the
//! `created_at` of the last message it saw never repeats or skips one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use termpoll_core::{
    Cursor, Error, Message, MessageId, Payload, Result, SessionId, Topic, TopicKind, Updates,
};

/// Messages and topics of one session.
struct SessionLog {
    topics: Vec<Topic>,
    messages: RwLock<Vec<Message>>,
    notify: watch::Sender<Option<Cursor>>,
}

impl SessionLog {
    fn new(session_id: SessionId) -> Self {
        let (notify, _) = watch::channel(None);
        Self {
            topics: TopicKind::ALL
                .iter()
                .map(|kind| Topic::new(session_id, *kind))
                .collect(),
            messages: RwLock::new(Vec::new()),
            notify,
        }
    }

    fn topic(&self, kind: TopicKind) -> &Topic {
        // Every kind gets a topic at registration.
        self.topics
            .iter()
            .find(|t| t.kind == kind)
            .unwrap_or(&self.topics[0])
    }

    fn read_since(&self, since: Option<Cursor>) -> Vec<Message> {
        let messages = self.messages.read().unwrap_or_else(PoisonError::into_inner);
        let start = match since {
            Some(since) => messages.partition_point(|m| m.created_at <= since),
            None => 0,
        };
        messages[start..].to_vec()
    }
}

/// In-memory store of every session's topics and messages.
pub struct TopicLog {
    sessions: RwLock<HashMap<SessionId, Arc<SessionLog>>>,
    /// Last timestamp handed out, in microseconds since the epoch
    clock: Mutex<i64>,
}

impl std::fmt::Debug for TopicLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TopicLog")
            .field("sessions", &sessions.len())
            .finish()
    }
}

impl TopicLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock: Mutex::new(i64::MIN),
        }
    }

    fn session(&self, session_id: &SessionId) -> Result<Arc<SessionLog>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(*session_id))
    }

    /// Next timestamp: now, or one microsecond past the previous one.
    fn tick(&self) -> Result<Cursor> {
        let mut last = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now().timestamp_micros();
        let next = now.max(last.saturating_add(1));
        let ts = DateTime::<Utc>::from_timestamp_micros(next)
            .ok_or_else(|| Error::InvalidInput(format!("timestamp out of range: {next}")))?;
        *last = next;
        Ok(ts)
    }

    /// Create the topics of a new session. Registering twice is a no-op.
    pub fn register(&self, session_id: SessionId) -> Vec<Topic> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let log = sessions
            .entry(session_id)
            .or_insert_with(|| Arc::new(SessionLog::new(session_id)));
        debug!("Registered topics for session {}", session_id);
        log.topics.clone()
    }

    /// Whether the session has a log.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.contains_key(session_id)
    }

    /// Append a payload to the topic it belongs to and wake waiters.
    pub fn append(&self, session_id: &SessionId, payload: Payload) -> Result<Message> {
        let log = self.session(session_id)?;
        let topic_id = log.topic(payload.topic_kind()).id;

        let message = {
            // Timestamp and position are taken under the same lock so the
            // vector stays sorted by `created_at`.
            let mut messages = log.messages.write().unwrap_or_else(PoisonError::into_inner);
            let message = Message {
                id: MessageId::new(),
                topic_id,
                session_id: *session_id,
                seq: messages.len() as u64 + 1,
                payload,
                created_at: self.tick()?,
            };
            messages.push(message.clone());
            message
        };

        log.notify.send_replace(Some(message.created_at));
        Ok(message)
    }

    /// Messages strictly after `since`, ascending. `None` reads everything.
    pub fn read_since(&self, session_id: &SessionId, since: Option<Cursor>) -> Result<Vec<Message>> {
        Ok(self.session(session_id)?.read_since(since))
    }

    /// Topics of a session.
    pub fn topics(&self, session_id: &SessionId) -> Result<Vec<Topic>> {
        Ok(self.session(session_id)?.topics.clone())
    }

    /// Topics plus messages after `since`, with the cursor to use next.
    pub fn updates(&self, session_id: &SessionId, since: Option<Cursor>) -> Result<Updates> {
        let log = self.session(session_id)?;
        let messages = log.read_since(since);
        Ok(Updates::new(log.topics.clone(), messages, since))
    }

    /// Receiver that changes whenever the session gets a new message.
    pub fn subscribe(&self, session_id: &SessionId) -> Result<watch::Receiver<Option<Cursor>>> {
        Ok(self.session(session_id)?.notify.subscribe())
    }

    /// Like [`TopicLog::updates`], but waits up to `timeout` for something new.
    ///
    /// Returns empty updates, with the cursor unchanged, on timeout.
    pub async fn wait_since(
        &self,
        session_id: &SessionId,
        since: Option<Cursor>,
        timeout: Duration,
    ) -> Result<Updates> {
        let log = self.session(session_id)?;
        // Subscribe before reading so an append in between still wakes us.
        let mut changes = log.notify.subscribe();
        let topics = log.topics.clone();

        let messages = log.read_since(since);
        if !messages.is_empty() {
            return Ok(Updates::new(topics, messages, since));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {
                    let messages = log.read_since(since);
                    if !messages.is_empty() {
                        return Ok(Updates::new(topics, messages, since));
                    }
                }
                Ok(Err(_)) | Err(_) => return Ok(Updates::new(topics, Vec::new(), since)),
            }
        }
    }

    /// Drop a session's topics and messages.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let removed = sessions.remove(session_id).is_some();
        if removed {
            debug!("Removed log for session {}", session_id);
        }
        removed
    }

    /// Number of sessions with a log.
    pub fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.len()
    }

    /// Whether no session has a log.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TopicLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termpoll_core::SessionState;

    fn log_with_session() -> (TopicLog, SessionId) {
        let log = TopicLog::new();
        let id = SessionId::new();
        log.register(id);
        (log, id)
    }

    #[test]
    fn test_register_creates_one_topic_per_kind() {
        let (log, id) = log_with_session();
        let topics = log.topics(&id).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "stdout");
        assert_eq!(topics[1].name, "state");
        assert!(topics.iter().all(|t| t.session_id == id));

        // Re-registering keeps the same topic ids.
        let again = log.register(id);
        assert_eq!(again, topics);
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let log = TopicLog::new();
        let id = SessionId::new();
        assert!(matches!(
            log.append(&id, Payload::PromptReady),
            Err(Error::SessionNotFound(_))
        ));
        assert!(matches!(log.read_since(&id, None), Err(Error::SessionNotFound(_))));
        assert!(matches!(log.updates(&id, None), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn test_append_routes_to_topics() {
        let (log, id) = log_with_session();
        let topics = log.topics(&id).unwrap();

        let out = log.append(&id, Payload::output("hi")).unwrap();
        let ready = log.append(&id, Payload::PromptReady).unwrap();

        assert_eq!(out.topic_id, topics[0].id);
        assert_eq!(ready.topic_id, topics[1].id);
        assert_eq!(out.seq, 1);
        assert_eq!(ready.seq, 2);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let (log, id) = log_with_session();
        let mut previous = None;
        for i in 0..1000 {
            let m = log.append(&id, Payload::output(i.to_string())).unwrap();
            if let Some(prev) = previous {
                assert!(m.created_at > prev);
                assert!((m.created_at - prev).num_microseconds().unwrap() >= 1);
            }
            previous = Some(m.created_at);
        }
    }

    #[test]
    fn test_read_since_returns_suffix() {
        let (log, id) = log_with_session();
        let messages: Vec<Message> = (0..5)
            .map(|i| log.append(&id, Payload::output(i.to_string())).unwrap())
            .collect();

        assert_eq!(log.read_since(&id, None).unwrap(), messages);
        assert_eq!(
            log.read_since(&id, Some(messages[1].created_at)).unwrap(),
            messages[2..].to_vec()
        );
        assert!(log
            .read_since(&id, Some(messages[4].created_at))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_updates_cursor_round_trip() {
        let (log, id) = log_with_session();
        log.append(&id, Payload::PromptReady).unwrap();
        log.append(&id, Payload::output("a")).unwrap();

        let first = log.updates(&id, None).unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.topics.len(), 2);

        let empty = log.updates(&id, first.cursor).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.cursor, first.cursor);

        log.append(&id, Payload::StopMark { output_bytes: 1 }).unwrap();
        let next = log.updates(&id, empty.cursor).unwrap();
        assert_eq!(next.messages.len(), 1);
        assert_eq!(next.messages[0].seq, 3);
    }

    #[test]
    fn test_cursor_survives_json() {
        let (log, id) = log_with_session();
        let m = log.append(&id, Payload::output("x")).unwrap();
        log.append(&id, Payload::output("y")).unwrap();

        let json = serde_json::to_string(&m.created_at).unwrap();
        let cursor: Cursor = serde_json::from_str(&json).unwrap();
        let rest = log.read_since(&id, Some(cursor)).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, Payload::output("y"));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let log = TopicLog::new();
        let a = SessionId::new();
        let b = SessionId::new();
        log.register(a);
        log.register(b);

        log.append(&a, Payload::output("a")).unwrap();
        assert!(log.read_since(&b, None).unwrap().is_empty());
        let m = log.append(&b, Payload::output("b")).unwrap();
        assert_eq!(m.seq, 1);
    }

    #[test]
    fn test_remove() {
        let (log, id) = log_with_session();
        assert_eq!(log.len(), 1);
        assert!(log.remove(&id));
        assert!(!log.remove(&id));
        assert!(!log.contains(&id));
        assert!(log.is_empty());
    }

    #[test]
    fn test_concurrent_appends_stay_sorted() {
        let log = Arc::new(TopicLog::new());
        let id = SessionId::new();
        log.register(id);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        log.append(&id, Payload::output(format!("{t}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = log.read_since(&id, None).unwrap();
        assert_eq!(all.len(), 1000);
        for pair in all.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
            assert_eq!(pair[0].seq + 1, pair[1].seq);
        }
    }

    #[tokio::test]
    async fn test_wait_since_returns_immediately_with_backlog() {
        let (log, id) = log_with_session();
        log.append(&id, Payload::PromptReady).unwrap();

        let updates = log
            .wait_since(&id, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(updates.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_since_wakes_on_append() {
        let log = Arc::new(TopicLog::new());
        let id = SessionId::new();
        log.register(id);

        let writer = Arc::clone(&log);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer
                .append(
                    &id,
                    Payload::StateChange {
                        from: SessionState::Starting,
                        to: SessionState::Ready,
                        exit_code: None,
                    },
                )
                .unwrap();
        });

        let updates = log
            .wait_since(&id, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(updates.messages.len(), 1);
        assert_eq!(updates.cursor, Some(updates.messages[0].created_at));
    }

    #[tokio::test]
    async fn test_wait_since_times_out_empty() {
        let (log, id) = log_with_session();
        let m = log.append(&id, Payload::output("old")).unwrap();

        let updates = log
            .wait_since(&id, Some(m.created_at), Duration::from_millis(30))
            .await
            .unwrap();
        assert!(updates.is_empty());
        assert_eq!(updates.cursor, Some(m.created_at));
    }
}
