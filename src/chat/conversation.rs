//! In-memory conversation log.
//!
//! Holds the optional system prompt and the user/assistant turns in order,
//! and hands the inference client the slice it needs for each call.

use crate::inference::types::{Image, Message, Role};

/// Append-only conversation history with an optional system prompt.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut conversation = Self::default();
        conversation.set_system_prompt(system_prompt);
        conversation
    }

    /// Replace (or remove) the system prompt. A blank prompt counts as none.
    pub fn set_system_prompt(&mut self, prompt: Option<&str>) {
        if self.system_prompt().is_some() {
            self.messages.remove(0);
        }
        if let Some(prompt) = prompt.map(str::trim).filter(|p| !p.is_empty()) {
            self.messages.insert(0, Message::system(prompt));
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    pub fn add_user(&mut self, content: impl Into<String>, images: Vec<Image>) {
        self.messages
            .push(Message::user(content).with_images(images));
    }

    pub fn add_assistant(&mut self, content: impl Into<String>, thinking: Option<String>) {
        self.messages
            .push(Message::assistant(content).with_thinking(thinking));
    }

    /// Everything to send to the model, system prompt first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of turns, system prompt excluded.
    pub fn len(&self) -> usize {
        self.messages.len() - usize::from(self.system_prompt().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all turns. The system prompt stays.
    pub fn clear(&mut self) {
        let keep = usize::from(self.system_prompt().is_some());
        self.messages.truncate(keep);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_leads_and_survives_clear() {
        let mut conv = Conversation::new(Some("You are terse."));
        conv.add_user("hi", Vec::new());
        conv.add_assistant("hello", Some("greeting".into()));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[2].thinking.as_deref(), Some("greeting"));

        conv.clear();
        assert!(conv.is_empty());
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.system_prompt(), Some("You are terse."));
    }

    #[test]
    fn test_blank_system_prompt_is_none() {
        let mut conv = Conversation::new(Some("   "));
        assert!(conv.system_prompt().is_none());
        conv.add_user("q", Vec::new());
        conv.set_system_prompt(Some("new"));
        assert_eq!(conv.messages()[0].content, "new");
        assert_eq!(conv.len(), 1);
        conv.set_system_prompt(None);
        assert_eq!(conv.messages()[0].role, Role::User);
    }

    #[test]
    fn test_user_images_kept() {
        let image = Image::from_bytes(b"\x89PNG", "image/png").unwrap();
        let mut conv = Conversation::default();
        conv.add_user("what is this", vec![image.clone()]);
        assert_eq!(conv.last().map(|m| m.images.clone()), Some(vec![image]));
    }
}
