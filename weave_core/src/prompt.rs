//! Prompt stacks: ordered, role-tagged messages sent to a prompt driver.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Role of a message in a prompt stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single role-tagged message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered message list plus optional action schemas.
///
/// System messages are kept at the front; conversation history is inserted
/// directly after them so the current input always stays last.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptStack {
    /// Messages in send order
    pub messages: Vec<Message>,
    /// JSON schemas describing the actions the model may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Value>,
}

impl PromptStack {
    /// Creates an empty prompt stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_system(&mut self, content: impl Into<String>) {
        self.push(Message::system(content));
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// Number of leading system messages.
    pub fn system_len(&self) -> usize {
        self.messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count()
    }

    /// Inserts messages right after the leading system messages, keeping
    /// their relative order.
    pub fn insert_after_system(&mut self, messages: impl IntoIterator<Item = Message>) {
        let at = self.system_len();
        let tail = self.messages.split_off(at);
        self.messages.extend(messages);
        self.messages.extend(tail);
    }

    /// Returns the last message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Flattens the stack to plain text (used for token counting).
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for message in &self.messages {
            text.push_str(&format!("{}: {}\n\n", message.role, message.content));
        }
        for action in &self.actions {
            text.push_str(&action.to_string());
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_after_system() {
        let mut stack = PromptStack::new();
        stack.add_system("rules");
        stack.add_user("current");

        stack.insert_after_system(vec![Message::user("old q"), Message::assistant("old a")]);

        let roles: Vec<Role> = stack.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(stack.last().unwrap().content, "current");
    }

    #[test]
    fn test_insert_without_system() {
        let mut stack = PromptStack::new();
        stack.add_user("current");
        stack.insert_after_system(vec![Message::user("old")]);
        assert_eq!(stack.messages[0].content, "old");
        assert_eq!(stack.system_len(), 0);
    }

    #[test]
    fn test_to_text() {
        let mut stack = PromptStack::new();
        stack.add_system("be nice");
        stack.add_user("hi");
        assert_eq!(stack.to_text(), "system: be nice\n\nuser: hi\n\n");
    }
}
