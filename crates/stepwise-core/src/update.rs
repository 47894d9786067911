//! Reference event envelope.
//!
//! [`Update`] is a small, serializable event type that transports without an
//! envelope of their own can produce directly. It covers the two payloads a
//! chat delivers: a text message and a button press.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::event::{ConversationKey, Event, EventKind, parse_command};
use crate::message::MessageRef;

/// Payload of an [`Update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A text message. Commands are text messages starting with `/`.
    Message { message_id: i64, text: String },
    /// A button press on a previously sent message.
    Interaction {
        interaction_id: String,
        message_id: i64,
        data: String,
    },
}

/// An inbound chat update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub payload: Payload,
}

impl Update {
    /// Creates a text message update. The message id is the update id.
    pub fn message(id: i64, chat_id: i64, user_id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            user_id,
            payload: Payload::Message {
                message_id: id,
                text: text.into(),
            },
        }
    }

    /// Creates a button-press update on message `message_id`.
    pub fn interaction(
        id: i64,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id,
            chat_id,
            user_id,
            payload: Payload::Interaction {
                interaction_id: id.to_string(),
                message_id,
                data: data.into(),
            },
        }
    }
}

impl Event for Update {
    fn event_name(&self) -> &'static str {
        match self.kind() {
            EventKind::Message => "update.message",
            EventKind::Command => "update.command",
            EventKind::Interaction => "update.interaction",
        }
    }

    fn kind(&self) -> EventKind {
        match &self.payload {
            Payload::Message { text, .. } if parse_command(text).is_some() => EventKind::Command,
            Payload::Message { .. } => EventKind::Message,
            Payload::Interaction { .. } => EventKind::Interaction,
        }
    }

    fn conversation_key(&self) -> Option<ConversationKey> {
        Some(ConversationKey::new(self.chat_id, self.user_id))
    }

    fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Message { text, .. } => Some(text),
            Payload::Interaction { .. } => None,
        }
    }

    fn interaction_data(&self) -> Option<&str> {
        match &self.payload {
            Payload::Interaction { data, .. } => Some(data),
            Payload::Message { .. } => None,
        }
    }

    fn interaction_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Interaction { interaction_id, .. } => Some(interaction_id),
            Payload::Message { .. } => None,
        }
    }

    fn message_ref(&self) -> Option<MessageRef> {
        let message_id = match &self.payload {
            Payload::Message { message_id, .. } | Payload::Interaction { message_id, .. } => {
                *message_id
            }
        };
        Some(MessageRef::new(self.chat_id, message_id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
