//! Prompt and stop-mark framing over the raw PTY byte stream.
//!
//! The framer accumulates chunks and splits them at sentinel markers. A
//! marker split across two reads is matched exactly once: the tail of the
//! buffer that could still grow into a marker is held back until the next
//! chunk decides it. An incomplete trailing UTF-8 sequence is held back the
//! same way so output text never splits a character.

use termpoll_core::{Markers, Payload};

/// Discrete event produced from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Output bytes with markers removed
    Output(Vec<u8>),
    /// Prompt-ready marker seen
    PromptReady,
    /// Stop mark seen; closes the current output segment
    StopMark {
        /// Output bytes emitted since the previous boundary
        output_bytes: usize,
    },
}

impl From<FrameEvent> for Payload {
    fn from(event: FrameEvent) -> Self {
        match event {
            FrameEvent::Output(bytes) => Payload::Output {
                text: String::from_utf8_lossy(&bytes).into_owned(),
            },
            FrameEvent::PromptReady => Payload::PromptReady,
            FrameEvent::StopMark { output_bytes } => Payload::StopMark { output_bytes },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MarkerKind {
    PromptReady,
    StopMark,
}

/// Stateful splitter for one session's output stream.
#[derive(Debug)]
pub struct Framer {
    markers: Markers,
    buffer: Vec<u8>,
    segment_bytes: usize,
    prompt_seen: bool,
}

impl Framer {
    /// Create a framer scanning for `markers`.
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            buffer: Vec::with_capacity(4096),
            segment_bytes: 0,
            prompt_seen: false,
        }
    }

    /// Whether the prompt-ready marker has been seen at least once.
    pub fn prompt_seen(&self) -> bool {
        self.prompt_seen
    }

    /// Bytes currently held back.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk and return the events it completes, in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;

        while let Some((pos, kind, len)) = self.next_marker(start) {
            if pos > start {
                let output = self.buffer[start..pos].to_vec();
                self.segment_bytes += output.len();
                events.push(FrameEvent::Output(output));
            }

            match kind {
                MarkerKind::PromptReady => {
                    self.prompt_seen = true;
                    events.push(FrameEvent::PromptReady);
                }
                MarkerKind::StopMark => {
                    events.push(FrameEvent::StopMark {
                        output_bytes: self.segment_bytes,
                    });
                }
            }
            self.segment_bytes = 0;
            start = pos + len;
        }

        let hold = self.hold_back(&self.buffer[start..]);
        let end = self.buffer.len() - hold;
        if end > start {
            let output = self.buffer[start..end].to_vec();
            self.segment_bytes += output.len();
            events.push(FrameEvent::Output(output));
        }
        self.buffer.drain(..end);

        events
    }

    /// Emit whatever is held back, e.g. at end of stream.
    pub fn flush(&mut self) -> Vec<FrameEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let output = std::mem::take(&mut self.buffer);
        self.segment_bytes += output.len();
        vec![FrameEvent::Output(output)]
    }

    /// Earliest complete marker at or after `from`.
    fn next_marker(&self, from: usize) -> Option<(usize, MarkerKind, usize)> {
        let haystack = &self.buffer[from..];
        let prompt = find(haystack, self.markers.prompt_ready())
            .map(|p| (from + p, MarkerKind::PromptReady, self.markers.prompt_ready().len()));
        let stop = find(haystack, self.markers.stop_mark())
            .map(|p| (from + p, MarkerKind::StopMark, self.markers.stop_mark().len()));

        match (prompt, stop) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    /// Length of the tail of `rest` that must wait for more input.
    fn hold_back(&self, rest: &[u8]) -> usize {
        let marker_tail = partial_suffix(rest, self.markers.prompt_ready())
            .max(partial_suffix(rest, self.markers.stop_mark()));
        marker_tail.max(incomplete_utf8_tail(rest))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Longest proper prefix of `marker` that `buf` ends with.
fn partial_suffix(buf: &[u8], marker: &[u8]) -> usize {
    let max = buf.len().min(marker.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&k| buf.ends_with(&marker[..k]))
        .unwrap_or(0)
}

/// Bytes at the end of `buf` forming the start of a multi-byte character.
fn incomplete_utf8_tail(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let byte = buf[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if back < width { back } else { 0 };
    }
    0
}
