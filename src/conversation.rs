//! per-panel conversation state.
//!
//! the panel owns its history; the host side only ever sees a copy of it
//! attached to each request.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// one message in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// append-only history, one per open panel. lives and dies with the panel entity.
#[derive(Component, Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// trims `raw` and appends it as a user turn.
    /// returns `None` (and leaves the history alone) when nothing is left after trimming.
    pub fn submit(&mut self, raw: &str) -> Option<&Turn> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        self.turns.push(Turn::user(text));
        self.turns.last()
    }

    pub fn append_reply(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::assistant(text));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn submit_trims_and_appends_one_user_turn() {
        let mut convo = Conversation::default();
        let turn = convo.submit("  Hello \n").cloned();

        assert_eq!(turn, Some(Turn::user("Hello")));
        assert_eq!(convo.turns(), &[Turn::user("Hello")]);
    }

    #[test]
    fn blank_submit_is_ignored() {
        let mut convo = Conversation::default();
        assert!(convo.submit("   \n\t").is_none());
        assert!(convo.submit("").is_none());
        assert!(convo.is_empty());
    }

    #[test]
    fn turns_keep_submission_order() {
        let mut convo = Conversation::default();
        convo.submit("Hello");
        convo.append_reply("Hi there!");
        convo.submit("how are you?");

        assert_eq!(
            convo.turns(),
            &[
                Turn::user("Hello"),
                Turn::assistant("Hi there!"),
                Turn::user("how are you?"),
            ]
        );
        assert_eq!(convo.len(), 3);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
