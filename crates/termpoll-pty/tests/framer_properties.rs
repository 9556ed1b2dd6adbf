//! Property-based tests for prompt and stop-mark framing.
//!
//! Chunk boundaries are arbitrary on a real PTY, so framing must not depend
//! on where reads split the stream.

use proptest::prelude::*;

use termpoll_core::Markers;
use termpoll_pty::{FrameEvent, Framer};

const READY: &str = "<<READY>>";
const DONE: &str = "<<DONE>>";

fn markers() -> Markers {
    Markers::new(READY, DONE).unwrap()
}

/// One piece of a generated stream.
#[derive(Debug, Clone)]
enum Piece {
    Text(String),
    Ready,
    Done,
}

fn piece() -> impl Strategy<Value = Piece> {
    prop_oneof![
        4 => "[a-z<>\r\n ]{0,12}".prop_map(Piece::Text),
        1 => Just(Piece::Ready),
        1 => Just(Piece::Done),
    ]
}

fn render(pieces: &[Piece]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in pieces {
        match p {
            Piece::Text(t) => out.extend_from_slice(t.as_bytes()),
            Piece::Ready => out.extend_from_slice(READY.as_bytes()),
            Piece::Done => out.extend_from_slice(DONE.as_bytes()),
        }
    }
    out
}

/// Merge adjacent output events so chunkings can be compared.
fn normalize(events: Vec<FrameEvent>) -> Vec<FrameEvent> {
    let mut merged: Vec<FrameEvent> = Vec::new();
    for event in events {
        match (merged.last_mut(), event) {
            (Some(FrameEvent::Output(prev)), FrameEvent::Output(next)) => {
                prev.extend_from_slice(&next)
            }
            (_, event) => merged.push(event),
        }
    }
    merged
}

fn frame_all(stream: &[u8], cuts: &[usize]) -> Vec<FrameEvent> {
    let mut framer = Framer::new(markers());
    let mut events = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        let cut = cut.min(stream.len()).max(start);
        events.extend(framer.feed(&stream[start..cut]));
        start = cut;
    }
    events.extend(framer.feed(&stream[start..]));
    events.extend(framer.flush());
    events
}

proptest! {
    /// Splitting the stream anywhere produces the same events.
    #[test]
    fn chunking_does_not_change_events(
        pieces in prop::collection::vec(piece(), 0..24),
        mut cuts in prop::collection::vec(0usize..400, 0..16),
    ) {
        let stream = render(&pieces);
        cuts.sort_unstable();

        let whole = normalize(frame_all(&stream, &[]));
        let chunked = normalize(frame_all(&stream, &cuts));
        prop_assert_eq!(whole, chunked);
    }

    /// Every marker in the stream is reported exactly once.
    #[test]
    fn each_marker_reported_once(
        pieces in prop::collection::vec(piece(), 0..24),
        chunk in 1usize..16,
    ) {
        let stream = render(&pieces);
        let mut framer = Framer::new(markers());
        let mut events = Vec::new();
        for part in stream.chunks(chunk) {
            events.extend(framer.feed(part));
        }
        events.extend(framer.flush());

        let ready = events.iter().filter(|e| matches!(e, FrameEvent::PromptReady)).count();
        let done = events.iter().filter(|e| matches!(e, FrameEvent::StopMark { .. })).count();

        // Generated text can itself spell a marker across piece boundaries,
        // so count markers in the rendered stream rather than in `pieces`.
        prop_assert_eq!(ready, count(&stream, READY.as_bytes()));
        prop_assert_eq!(done, count(&stream, DONE.as_bytes()));
    }

    /// Output never contains a complete marker and loses no bytes.
    #[test]
    fn output_is_stream_minus_markers(
        pieces in prop::collection::vec(piece(), 0..24),
        chunk in 1usize..16,
    ) {
        let stream = render(&pieces);
        let mut framer = Framer::new(markers());
        let mut events = Vec::new();
        for part in stream.chunks(chunk) {
            events.extend(framer.feed(part));
        }
        events.extend(framer.flush());

        let output: usize = events
            .iter()
            .map(|e| match e {
                FrameEvent::Output(bytes) => bytes.len(),
                _ => 0,
            })
            .sum();
        let markers_len = count(&stream, READY.as_bytes()) * READY.len()
            + count(&stream, DONE.as_bytes()) * DONE.len();
        prop_assert_eq!(output + markers_len, stream.len());
    }
}

/// Non-overlapping, leftmost-first occurrences of either marker, counted for `needle`.
fn count(stream: &[u8], needle: &[u8]) -> usize {
    let ready = READY.as_bytes();
    let done = DONE.as_bytes();
    let mut i = 0;
    let mut n = 0;
    while i < stream.len() {
        let rest = &stream[i..];
        if rest.starts_with(ready) {
            if needle == ready {
                n += 1;
            }
            i += ready.len();
        } else if rest.starts_with(done) {
            if needle == done {
                n += 1;
            }
            i += done.len();
        } else {
            i += 1;
        }
    }
    n
}
