//! Sentinel markers the shell prints to frame its output.
//!
//! Both markers are OSC sequences (`ESC ] 777 ; termpoll ; … BEL`), which
//! terminals silently drop, and the framer strips them before anything is
//! published. They are emitted from bash's `PROMPT_COMMAND`: the first prompt
//! prints the ready marker, every later prompt prints the stop mark.

use crate::{Error, Result};

/// Default prompt-ready marker.
pub const DEFAULT_PROMPT_READY: &[u8] = b"\x1b]777;termpoll;ready\x07";

/// Default stop mark.
pub const DEFAULT_STOP_MARK: &[u8] = b"\x1b]777;termpoll;done\x07";

/// Shell variable set once the ready marker has been printed.
const READY_VAR: &str = "__TERMPOLL_READY";

/// The pair of byte sequences the framer scans for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    prompt_ready: Vec<u8>,
    stop_mark: Vec<u8>,
}

impl Markers {
    /// Create a marker pair.
    ///
    /// Markers must be non-empty and neither may contain the other, so the
    /// earliest match in a buffer is never ambiguous.
    pub fn new(prompt_ready: impl Into<Vec<u8>>, stop_mark: impl Into<Vec<u8>>) -> Result<Self> {
        let prompt_ready = prompt_ready.into();
        let stop_mark = stop_mark.into();

        if prompt_ready.is_empty() || stop_mark.is_empty() {
            return Err(Error::InvalidInput("markers cannot be empty".to_string()));
        }
        if contains(&prompt_ready, &stop_mark) || contains(&stop_mark, &prompt_ready) {
            return Err(Error::InvalidInput(
                "markers must not contain one another".to_string(),
            ));
        }

        Ok(Self {
            prompt_ready,
            stop_mark,
        })
    }

    /// Prompt-ready marker bytes.
    pub fn prompt_ready(&self) -> &[u8] {
        &self.prompt_ready
    }

    /// Stop mark bytes.
    pub fn stop_mark(&self) -> &[u8] {
        &self.stop_mark
    }

    /// Length of the longer marker.
    pub fn max_len(&self) -> usize {
        self.prompt_ready.len().max(self.stop_mark.len())
    }

    /// Bash `PROMPT_COMMAND` that prints these markers.
    pub fn prompt_command(&self) -> String {
        format!(
            "if [ -z \"${READY_VAR}\" ]; then {READY_VAR}=1; printf '{}'; else printf '{}'; fi",
            printf_escape(&self.prompt_ready),
            printf_escape(&self.stop_mark),
        )
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            prompt_ready: DEFAULT_PROMPT_READY.to_vec(),
            stop_mark: DEFAULT_STOP_MARK.to_vec(),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Encode bytes as a single-quoted printf format string.
fn printf_escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b';' | b':' | b'_' | b'-' | b' ' | b'<' | b'>')
        {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{b:03o}"));
        }
    }
    out
}
