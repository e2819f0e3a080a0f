//! Inline thinking-tag delimiters and whole-text extraction.
//!
//! Reasoning models served without a dedicated thinking channel wrap their
//! chain of thought in `<think>…</think>`. [`ThinkTags::extract`] separates a
//! complete reply; the streaming equivalent lives in
//! [`super::classifier::StreamClassifier`].

use serde::Deserialize;

pub const DEFAULT_START_TAG: &str = "<think>";
pub const DEFAULT_END_TAG: &str = "</think>";

/// Separator placed between multiple thinking spans.
pub const THINKING_SEPARATOR: &str = "\n\n";

/// A start/end delimiter pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThinkTags {
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_end")]
    pub end: String,
}

fn default_start() -> String {
    DEFAULT_START_TAG.to_string()
}

fn default_end() -> String {
    DEFAULT_END_TAG.to_string()
}

impl Default for ThinkTags {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
        }
    }
}

impl ThinkTags {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Split `text` into `(thinking, answer)`.
    ///
    /// Every non-overlapping `start…end` pair is removed from the answer and
    /// its inner text collected, in order, joined by a blank line. Without a
    /// complete pair the input comes back untouched and thinking is `None`.
    pub fn extract(&self, text: &str) -> (Option<String>, String) {
        if self.start.is_empty() || self.end.is_empty() {
            return (None, text.to_string());
        }

        let mut spans: Vec<String> = Vec::new();
        let mut answer = text.to_string();
        // Removing spans can splice a new pair together ("<thi<think>x</think>nk>…"),
        // so repeat until nothing matches.
        loop {
            let (found, rest) = self.remove_spans(&answer);
            if found.is_empty() {
                break;
            }
            spans.extend(found);
            answer = rest;
        }

        if spans.is_empty() {
            return (None, text.to_string());
        }
        (
            Some(spans.join(THINKING_SEPARATOR)),
            answer.trim().to_string(),
        )
    }

    /// One left-to-right pass: returns the inner texts and the remainder.
    fn remove_spans(&self, text: &str) -> (Vec<String>, String) {
        let mut spans = Vec::new();
        let mut rest = String::with_capacity(text.len());
        let mut cursor = 0;

        while let Some(rel_start) = text[cursor..].find(&self.start) {
            let open = cursor + rel_start;
            let inner_start = open + self.start.len();
            let Some(rel_end) = text[inner_start..].find(&self.end) else {
                break;
            };
            let inner_end = inner_start + rel_end;
            rest.push_str(&text[cursor..open]);
            spans.push(text[inner_start..inner_end].to_string());
            cursor = inner_end + self.end.len();
        }
        rest.push_str(&text[cursor..]);
        (spans, rest)
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `delim`.
///
/// Such a suffix may turn into `delim` once the next fragment arrives, so it
/// must not be emitted yet. Always lands on a char boundary.
pub(crate) fn partial_suffix_len(text: &str, delim: &str) -> usize {
    if delim.is_empty() {
        return 0;
    }
    let max = delim.len().saturating_sub(1).min(text.len());
    let floor = text.len() - max;
    text.char_indices()
        .map(|(i, _)| i)
        .filter(|&i| i >= floor)
        .find(|&i| delim.starts_with(&text[i..]))
        .map(|i| text.len() - i)
        .unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> ThinkTags {
        ThinkTags::default()
    }

    #[test]
    fn test_extract_single_span() {
        let (thinking, answer) = tags().extract("<think>plan it</think>\n\nThe answer is 4.");
        assert_eq!(thinking.as_deref(), Some("plan it"));
        assert_eq!(answer, "The answer is 4.");
    }

    #[test]
    fn test_extract_multiple_spans_joined_by_blank_line() {
        let (thinking, answer) = tags().extract("<think>a</think>One <think>b</think>two");
        assert_eq!(thinking.as_deref(), Some("a\n\nb"));
        assert_eq!(answer, "One two");
    }

    #[test]
    fn test_extract_without_tags_returns_input_unchanged() {
        let text = "  plain answer with spaces  ";
        let (thinking, answer) = tags().extract(text);
        assert!(thinking.is_none());
        assert_eq!(answer, text);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let inputs = [
            "<think>x</think> hello <think>y</think> world",
            "before<think></think>after",
            "<thi<think>x</think>nk>y</think>z",
            "no tags at all",
        ];
        for input in inputs {
            let (_, answer) = tags().extract(input);
            let (again_thinking, again) = tags().extract(&answer);
            assert_eq!(again, answer, "input: {input:?}");
            assert!(again_thinking.is_none(), "input: {input:?}");
        }
    }

    #[test]
    fn test_unmatched_end_is_literal() {
        let (thinking, answer) = tags().extract("a </think> b");
        assert!(thinking.is_none());
        assert_eq!(answer, "a </think> b");
    }

    #[test]
    fn test_unterminated_start_is_literal() {
        let (thinking, answer) = tags().extract("a <think> b");
        assert!(thinking.is_none());
        assert_eq!(answer, "a <think> b");
    }

    #[test]
    fn test_second_start_inside_span_is_inner_text() {
        let (thinking, answer) = tags().extract("<think>a<think>b</think>c");
        assert_eq!(thinking.as_deref(), Some("a<think>b"));
        assert_eq!(answer, "c");
    }

    #[test]
    fn test_custom_delimiters() {
        let tags = ThinkTags::new("[[", "]]");
        let (thinking, answer) = tags.extract("[[why]] because");
        assert_eq!(thinking.as_deref(), Some("why"));
        assert_eq!(answer, "because");
    }

    #[test]
    fn test_partial_suffix_len() {
        assert_eq!(partial_suffix_len("hello <thi", "<think>"), 4);
        assert_eq!(partial_suffix_len("hello <", "<think>"), 1);
        assert_eq!(partial_suffix_len("hello", "<think>"), 0);
        // A complete delimiter is not a *proper* prefix.
        assert_eq!(partial_suffix_len("<think>", "<think>"), 0);
        assert_eq!(partial_suffix_len("x</thin", "</think>"), 6);
        assert_eq!(partial_suffix_len("ünï<", "<think>"), 1);
    }
}
