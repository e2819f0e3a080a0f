//! Streaming thinking/answer classifier.
//!
//! Consumes generated text one fragment at a time and emits
//! [`ClassifiedEvent`]s as soon as their kind is unambiguous. The only state
//! is whether an inline thinking tag is open and a small pending buffer that
//! holds a possible partial delimiter (`"<th"` waiting for `"ink>"`).
//!
//! One tag level is tracked. A start delimiter seen while a tag is open is
//! thinking text; an end delimiter seen while no tag is open is answer text.

use super::think_tags::{partial_suffix_len, ThinkTags, THINKING_SEPARATOR};
use super::types::ClassifiedEvent;

/// One incremental piece of model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Text from the explicit thinking field of a record.
    Thinking(String),
    /// Generated content, possibly containing inline tags.
    Content(String),
}

/// Mutable state of one classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierState {
    pub in_tag: bool,
    pub buffer: String,
    /// An inline span has been opened before; later spans are preceded by
    /// the separator, as in whole-text extraction.
    pub seen_span: bool,
}

/// Two-state machine separating inline thinking from the answer.
///
/// Lives for exactly one streaming call; [`StreamClassifier::finish`]
/// consumes it.
#[derive(Debug)]
pub struct StreamClassifier {
    tags: ThinkTags,
    state: ClassifierState,
}

impl StreamClassifier {
    pub fn new(tags: ThinkTags) -> Self {
        Self {
            tags,
            state: ClassifierState::default(),
        }
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }

    /// Process one fragment, returning the events it resolves.
    pub fn feed(&mut self, fragment: Fragment) -> Vec<ClassifiedEvent> {
        match fragment {
            Fragment::Thinking(text) => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![ClassifiedEvent::thinking(text)]
                }
            }
            Fragment::Content(text) => self.push_content(&text),
        }
    }

    /// Append content text and drain everything that can be classified.
    pub fn push_content(&mut self, text: &str) -> Vec<ClassifiedEvent> {
        let mut events = Vec::new();
        if text.is_empty() {
            return events;
        }
        self.state.buffer.push_str(text);

        loop {
            let delim = if self.state.in_tag {
                &self.tags.end
            } else {
                &self.tags.start
            };

            if let Some(pos) = self.state.buffer.find(delim.as_str()) {
                let before = self.state.buffer[..pos].to_string();
                let after = self.state.buffer[pos + delim.len()..].to_string();
                push_event(&mut events, self.state.in_tag, before);
                self.state.in_tag = !self.state.in_tag;
                if self.state.in_tag {
                    if self.state.seen_span {
                        events.push(ClassifiedEvent::thinking(THINKING_SEPARATOR));
                    }
                    self.state.seen_span = true;
                }
                self.state.buffer = after;
                continue;
            }

            // No complete delimiter: emit all but a possible partial one.
            let hold = partial_suffix_len(&self.state.buffer, delim);
            let ready = self.state.buffer.len() - hold;
            if ready > 0 {
                let text: String = self.state.buffer.drain(..ready).collect();
                push_event(&mut events, self.state.in_tag, text);
            }
            break;
        }

        events
    }

    /// End of stream: flush the residue and emit `done`.
    pub fn finish(self) -> Vec<ClassifiedEvent> {
        let mut events = Vec::with_capacity(2);
        let ClassifierState { in_tag, buffer, .. } = self.state;
        if !buffer.trim().is_empty() {
            push_event(&mut events, in_tag, buffer);
        }
        events.push(ClassifiedEvent::Done);
        events
    }
}

fn push_event(events: &mut Vec<ClassifiedEvent>, thinking: bool, text: String) {
    if text.is_empty() {
        return;
    }
    events.push(if thinking {
        ClassifiedEvent::Thinking { content: text }
    } else {
        ClassifiedEvent::Response { content: text }
    });
}

// ─── Tests ───────────────────────────────────────────────────────────────────
