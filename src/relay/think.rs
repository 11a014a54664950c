//! Incremental reasoning splitter
//!
//! Some providers interleave a `<think>...</think>` segment at the head of
//! the completion instead of using a dedicated reasoning field. This splitter
//! consumes content deltas and routes text to either the reasoning or the
//! content side. Markers may arrive split across deltas; a partial marker is
//! held back and never forwarded.

const OPEN_MARKER: &str = "<think>";
const CLOSE_MARKER: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before any text: an opening marker may still appear
    Start,
    /// Inside the reasoning segment
    Think,
    /// Regular content, forwarded as-is
    Content,
}

/// Splits a delta stream into (reasoning, content) pieces.
#[derive(Debug)]
pub struct ThinkSplitter {
    state: State,
    held: String,
}

impl Default for ThinkSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            held: String::new(),
        }
    }

    /// Feed one delta; returns the `(reasoning, content)` text to forward.
    pub fn push(&mut self, delta: &str) -> (String, String) {
        self.held.push_str(delta);
        let mut reasoning = String::new();
        let mut content = String::new();

        loop {
            match self.state {
                State::Start => {
                    if let Some(rest) = self.held.strip_prefix(OPEN_MARKER) {
                        self.held = rest.to_string();
                        self.state = State::Think;
                        continue;
                    }
                    if OPEN_MARKER.starts_with(self.held.as_str()) {
                        // Could still become the opening marker: hold it back.
                        break;
                    }
                    self.state = State::Content;
                }
                State::Think => {
                    if let Some(pos) = self.held.find(CLOSE_MARKER) {
                        reasoning.push_str(&self.held[..pos]);
                        self.held = self.held[pos + CLOSE_MARKER.len()..].to_string();
                        self.state = State::Content;
                        continue;
                    }
                    let keep = partial_marker_len(&self.held, CLOSE_MARKER);
                    let emit_to = self.held.len() - keep;
                    reasoning.push_str(&self.held[..emit_to]);
                    self.held = self.held[emit_to..].to_string();
                    break;
                }
                State::Content => {
                    content.push_str(&self.held);
                    self.held.clear();
                    break;
                }
            }
        }

        (reasoning, content)
    }

    /// Flush held text at end of stream.
    ///
    /// An unterminated marker fragment becomes ordinary text: it was never a
    /// complete marker, so it belongs to whichever side was active.
    pub fn finish(&mut self) -> (String, String) {
        let held = std::mem::take(&mut self.held);
        match self.state {
            State::Start | State::Content => (String::new(), held),
            State::Think => (held, String::new()),
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        if !text.is_char_boundary(text.len() - len) {
            continue;
        }
        if marker.starts_with(&text[text.len() - len..]) {
            return len;
        }
    }
    0
}
