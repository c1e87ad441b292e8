//! panel bridge: typed messages between a chat panel and the host-side relay.
//!
//! inside a bevy app the messages travel as [`ToHost`] / [`ToPanel`] events.
//! hosts that embed a panel out of process can use the json codec, which keeps
//! the `command` tag (`chat` / `chatResponse`) on the wire.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{Role, Turn};

/// ties a `chatResponse` to the `chat` that caused it. allocated per panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// outcome of one request. failures are a variant, not a string prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatReply {
    Ok(String),
    Error(String),
}

impl ChatReply {
    pub fn is_ok(&self) -> bool {
        matches!(self, ChatReply::Ok(_))
    }

    /// the text a panel shows for this reply; errors read `Error: <description>`.
    pub fn display_text(&self) -> String {
        match self {
            ChatReply::Ok(text) => text.clone(),
            ChatReply::Error(description) => format!("Error: {description}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PanelMessage {
    /// ui -> host: the whole conversation so far, ending with the new user turn.
    Chat { id: RequestId, text: Vec<Turn> },
    /// host -> ui: the fully buffered reply (never partial fragments).
    ChatResponse { id: RequestId, text: ChatReply },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed panel message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("chat request {0} carries no turns")]
    EmptyHistory(RequestId),
    #[error("chat request {0} does not end with a user turn")]
    MissingUserTurn(RequestId),
}

impl PanelMessage {
    pub fn id(&self) -> RequestId {
        match self {
            PanelMessage::Chat { id, .. } | PanelMessage::ChatResponse { id, .. } => *id,
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if let PanelMessage::Chat { id, text } = self {
            match text.last() {
                None => return Err(BridgeError::EmptyHistory(*id)),
                Some(last) if last.role != Role::User => {
                    return Err(BridgeError::MissingUserTurn(*id));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// decodes and validates a message arriving from outside the app.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let msg: PanelMessage = serde_json::from_str(json)?;
        msg.validate()?;
        Ok(msg)
    }
}

/// panel -> host.
#[derive(Event, Clone, Debug)]
pub struct ToHost {
    pub panel: Entity,
    pub message: PanelMessage,
}

/// host -> panel.
#[derive(Event, Clone, Debug)]
pub struct ToPanel {
    pub panel: Entity,
    pub message: PanelMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chat_wire_shape() {
        let msg = PanelMessage::Chat { id: RequestId(3), text: vec![Turn::user("Hello")] };
        let json = msg.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"command":"chat","id":3,"text":[{"role":"user","content":"Hello"}]}"#
        );
        assert_eq!(PanelMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn response_wire_shape_keeps_errors_structural() {
        let ok = PanelMessage::ChatResponse { id: RequestId(1), text: ChatReply::Ok("Hi".into()) };
        let err = PanelMessage::ChatResponse {
            id: RequestId(2),
            text: ChatReply::Error("connection refused".into()),
        };
        assert_eq!(
            ok.to_json().unwrap(),
            r#"{"command":"chatResponse","id":1,"text":{"ok":"Hi"}}"#
        );
        assert_eq!(
            err.to_json().unwrap(),
            r#"{"command":"chatResponse","id":2,"text":{"error":"connection refused"}}"#
        );
    }

    #[test]
    fn display_text_prefixes_errors_only() {
        assert_eq!(ChatReply::Ok("Hi there!".into()).display_text(), "Hi there!");
        assert_eq!(ChatReply::Error("boom".into()).display_text(), "Error: boom");
    }

    #[test]
    fn from_json_rejects_bad_chat_payloads() {
        assert!(matches!(
            PanelMessage::from_json(r#"{"command":"chat","id":1,"text":[]}"#),
            Err(BridgeError::EmptyHistory(RequestId(1)))
        ));
        assert!(matches!(
            PanelMessage::from_json(
                r#"{"command":"chat","id":2,"text":[{"role":"assistant","content":"x"}]}"#
            ),
            Err(BridgeError::MissingUserTurn(RequestId(2)))
        ));
        assert!(matches!(
            PanelMessage::from_json(r#"{"command":"shout","text":"hi"}"#),
            Err(BridgeError::Malformed(_))
        ));
        assert!(matches!(
            PanelMessage::from_json(
                r#"{"command":"chat","id":3,"text":[{"role":"system","content":"x"}]}"#
            ),
            Err(BridgeError::Malformed(_))
        ));
    }

    #[test]
    fn request_ids_increase() {
        let a = RequestId::default();
        let b = a.next();
        assert!(b > a);
        assert_eq!(b.to_string(), "#1");
    }
}
