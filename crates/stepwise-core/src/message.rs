//! Outbound message types.
//!
//! The engine treats rendering as the application's business: an
//! [`OutgoingMessage`] is just text plus an optional grid of buttons, and a
//! [`MessageRef`] is the handle a client hands back so the message can be
//! edited or deleted later.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Message Reference
// ============================================================================

/// Handle to a message that was sent or received in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

impl MessageRef {
    pub const fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

// ============================================================================
// Buttons
// ============================================================================

/// An inline button. Pressing it produces an interaction event carrying `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

// ============================================================================
// Outgoing Message
// ============================================================================

/// A renderable message: text plus rows of inline buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
}

impl OutgoingMessage {
    /// Creates a text-only message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    /// Appends a row of buttons.
    pub fn button_row(mut self, row: impl IntoIterator<Item = Button>) -> Self {
        self.buttons.push(row.into_iter().collect());
        self
    }

    /// Appends a single button on its own row.
    pub fn button(self, label: impl Into<String>, data: impl Into<String>) -> Self {
        self.button_row([Button::new(label, data)])
    }
}

impl From<&str> for OutgoingMessage {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_rows() {
        let msg = OutgoingMessage::text("Pick one")
            .button_row([Button::new("A", "pick?v=a"), Button::new("B", "pick?v=b")])
            .button("Cancel", "cancel");
        assert_eq!(msg.buttons.len(), 2);
        assert_eq!(msg.buttons[0].len(), 2);
        assert_eq!(msg.buttons[1][0].data, "cancel");
    }
}
