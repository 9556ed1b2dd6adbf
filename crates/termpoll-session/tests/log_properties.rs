//! Property-based tests for the topic log.

use proptest::prelude::*;

use termpoll_core::{Payload, SessionId};
use termpoll_session::TopicLog;

fn payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        "[a-z ]{0,8}".prop_map(Payload::output),
        Just(Payload::PromptReady),
        (0usize..64).prop_map(|output_bytes| Payload::StopMark { output_bytes }),
    ]
}

proptest! {
    /// `read_since(t)` is exactly the suffix of messages created after `t`.
    #[test]
    fn read_since_is_suffix(
        payloads in prop::collection::vec(payload(), 1..40),
        pick in any::<prop::sample::Index>(),
    ) {
        let log = TopicLog::new();
        let id = SessionId::new();
        log.register(id);

        let appended: Vec<_> = payloads
            .into_iter()
            .map(|p| log.append(&id, p).unwrap())
            .collect();

        let i = pick.index(appended.len());
        let since = appended[i].created_at;
        let read = log.read_since(&id, Some(since)).unwrap();
        prop_assert_eq!(read, appended[i + 1..].to_vec());
    }

    /// Following the returned cursor visits every message once, in order.
    #[test]
    fn cursor_walk_never_repeats_or_skips(
        batches in prop::collection::vec(prop::collection::vec(payload(), 0..6), 1..10),
    ) {
        let log = TopicLog::new();
        let id = SessionId::new();
        log.register(id);

        let mut cursor = None;
        let mut seen = Vec::new();
        let mut total = 0;
        for batch in batches {
            total += batch.len();
            for p in batch {
                log.append(&id, p).unwrap();
            }
            let updates = log.updates(&id, cursor).unwrap();
            seen.extend(updates.messages.iter().map(|m| m.seq));
            cursor = updates.cursor;
        }

        let expected: Vec<u64> = (1..=total as u64).collect();
        prop_assert_eq!(seen, expected);
    }
}
