//! NDJSON streaming response decoder for Ollama `/api/chat`.
//!
//! Reads the response body as a byte stream, splits it into lines, decodes
//! each line as an independent [`ChatStreamLine`], and drives a
//! [`StreamClassifier`] inline. The output is a stream of
//! [`ClassifiedEvent`]s ending in exactly one `done` or `error`, or in
//! nothing at all when the cancellation gate fires.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};

use super::cancel::CancellationGate;
use super::classifier::{Fragment, StreamClassifier};
use super::types::{ChatResponse, ChatStreamLine, ClassifiedEvent};

// ─── Line decoding ───────────────────────────────────────────────────────────

/// Outcome of decoding one non-empty line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    /// Fragments to feed, thinking before content.
    Fragments(Vec<Fragment>),
    /// The server reported an error inside the stream.
    ServerError(String),
    /// Not valid JSON for a stream record; dropped.
    Malformed,
}

/// Decode a single NDJSON line.
pub fn decode_line(line: &str) -> DecodedLine {
    let record: ChatStreamLine = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, line = %truncate(line, 200), "dropping malformed stream line");
            return DecodedLine::Malformed;
        }
    };

    if let Some(error) = record.error {
        return DecodedLine::ServerError(error);
    }

    if record.done {
        tracing::debug!(done_reason = ?record.done_reason, "final stream record");
    }

    let mut fragments = Vec::with_capacity(2);
    if let Some(message) = record.message {
        if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
            fragments.push(Fragment::Thinking(thinking));
        }
        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            fragments.push(Fragment::Content(content));
        }
    }
    DecodedLine::Fragments(fragments)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ─── Event stream ────────────────────────────────────────────────────────────

/// Longest line kept while waiting for its newline. Anything longer is
/// dropped as malformed, up to the next newline.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Per-call decode state. Dropped when the stream ends.
struct DecodeState<S, G> {
    bytes: S,
    gate: G,
    /// Bytes of an incomplete line carried across network chunks.
    pending: Vec<u8>,
    /// Skipping the rest of an oversized line.
    discarding: bool,
    classifier: Option<StreamClassifier>,
    queue: VecDeque<ClassifiedEvent>,
    finished: bool,
}

impl<S, G: CancellationGate> DecodeState<S, G> {
    /// Take the next complete line out of `pending`, if any.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line_bytes).into_owned())
    }

    /// Buffer a network chunk, dropping oversized lines.
    fn push_chunk(&mut self, chunk: &[u8]) {
        let chunk = if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return,
            }
        } else {
            chunk
        };
        self.pending.extend_from_slice(chunk);

        if self.pending.len() > MAX_LINE_BYTES && !self.pending.contains(&b'\n') {
            tracing::warn!(
                bytes = self.pending.len(),
                limit = MAX_LINE_BYTES,
                "dropping oversized stream line"
            );
            self.pending.clear();
            self.discarding = true;
        }
    }

    /// Handle one line. Returns `false` when the stream must stop.
    fn process_line(&mut self, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return true;
        }
        if self.gate.stop_requested() {
            self.cancel();
            return false;
        }
        match decode_line(trimmed) {
            DecodedLine::Fragments(fragments) => {
                if let Some(classifier) = self.classifier.as_mut() {
                    for fragment in fragments {
                        self.queue.extend(classifier.feed(fragment));
                    }
                }
                true
            }
            DecodedLine::ServerError(message) => {
                tracing::warn!(error = %message, "server reported error mid-stream");
                self.fail(message);
                false
            }
            DecodedLine::Malformed => true,
        }
    }

    fn cancel(&mut self) {
        tracing::info!("stream cancelled by caller");
        self.classifier = None;
        self.finished = true;
    }

    fn fail(&mut self, message: String) {
        self.classifier = None;
        self.queue.push_back(ClassifiedEvent::error(message));
        self.finished = true;
    }

    fn end_of_stream(&mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if !self.process_line(&line) {
                return;
            }
        }
        if self.gate.stop_requested() {
            self.cancel();
            return;
        }
        if let Some(classifier) = self.classifier.take() {
            self.queue.extend(classifier.finish());
        }
        self.finished = true;
    }
}

/// Turn a response byte stream into classified events.
///
/// Generic over the chunk and error types so it can be driven by
/// `reqwest::Response::bytes_stream` or by an in-memory stream in tests.
pub fn classify_stream<S, B, E, G>(
    bytes: S,
    classifier: StreamClassifier,
    gate: G,
) -> impl Stream<Item = ClassifiedEvent>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    G: CancellationGate,
{
    let state = DecodeState {
        bytes,
        gate,
        pending: Vec::new(),
        discarding: false,
        classifier: Some(classifier),
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            if let Some(line) = state.next_line() {
                state.process_line(&line);
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.push_chunk(chunk.as_ref()),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "stream read error");
                    state.fail(format!("stream read error: {e}"));
                }
                None => state.end_of_stream(),
            }
        }
    })
}

// ─── Buffered responses ──────────────────────────────────────────────────────

/// Extract `(content, explicit thinking)` from a buffered response body.
pub fn parse_buffered_response(body: &str) -> Result<(String, Option<String>), serde_json::Error> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let content = response.message.content.unwrap_or_default();
    let thinking = response.message.thinking.filter(|t| !t.trim().is_empty());
    Ok((content, thinking))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
