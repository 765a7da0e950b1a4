use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use warp::ws::Message;

/// Event type the relay persists before broadcasting.
pub const CHAT: &str = "CHAT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub user: String,
    pub text: String,
}

impl From<crate::store::ChatMessage> for ChatLine {
    fn from(message: crate::store::ChatMessage) -> Self {
        ChatLine {
            user: message.user,
            text: message.text,
        }
    }
}

/// Messages the server originates itself. Everything else it sends is a
/// client event echoed as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "SNAPSHOT")]
    Snapshot(String),
    #[serde(rename = "CHAT_HISTORY")]
    ChatHistory(Vec<ChatLine>),
}

impl ServerMessage {
    pub fn to_ws(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::text)
    }
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event is not a JSON object")]
    NotAnObject,
}

/// What the relay understands about a client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Chat(ChatLine),
    /// Drawing strokes, cursor moves, clears... relayed without inspection.
    Opaque { kind: Option<String> },
}

/// A client `{type, data}` event together with the frame it arrived in.
#[derive(Debug, Clone)]
pub struct Envelope {
    event: InboundEvent,
    raw: String,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = &value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let event = match fields.get("type").and_then(Value::as_str) {
            Some(CHAT) => InboundEvent::Chat(chat_line(fields.get("data"))),
            kind => InboundEvent::Opaque {
                kind: kind.map(str::to_string),
            },
        };

        Ok(Envelope {
            event,
            raw: text.to_string(),
        })
    }

    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    /// The frame exactly as the client sent it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

// Absent or non-string fields become empty rather than rejecting the event.
fn chat_line(data: Option<&Value>) -> ChatLine {
    let field = |name: &str| {
        data.and_then(|d| d.get(name))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    ChatLine {
        user: field("user"),
        text: field("text"),
    }
}
