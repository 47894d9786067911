//! Event system for Stepwise.
//!
//! This module provides the core event infrastructure:
//!
//! - [`Event`] - Base trait for every inbound event a transport produces
//! - [`EventKind`] - The three event shapes the engine routes on
//! - [`ConversationKey`] - The `(chat, user)` pair that addresses conversation state
//! - [`BoxedEvent`] - Type-erased, cheaply clonable event container
//!
//! The engine never inspects transport payloads directly. Everything it needs
//! to route an event (its kind, its conversation key, its text or button data)
//! is exposed through the [`Event`] trait, so any transport binding can feed
//! the dispatcher by implementing it.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::interaction::InteractionData;
use crate::message::MessageRef;

// ============================================================================
// Event Kind Classification
// ============================================================================

/// Classification of inbound events.
///
/// Every event is exactly one of these. A text message whose first token is a
/// `/command` is a [`Command`](EventKind::Command), never a
/// [`Message`](EventKind::Message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A plain text message.
    Message,
    /// A text message starting with a `/command`.
    Command,
    /// An interactive button press.
    Interaction,
}

impl EventKind {
    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Command => "command",
            Self::Interaction => "interaction",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Conversation Key
// ============================================================================

/// Identity of one user's exchange within one chat.
///
/// This is the sole addressing scheme for continuation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    /// The chat the exchange happens in.
    pub chat_id: i64,
    /// The user taking part in the exchange.
    pub user_id: i64,
}

impl ConversationKey {
    /// Creates a new key.
    pub const fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

// ============================================================================
// Command Parsing
// ============================================================================

/// A parsed `/command args` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// Command name without the leading slash and without any `@botname` suffix.
    pub name: &'a str,
    /// Everything after the command token, trimmed.
    pub args: &'a str,
}

/// Parses a message text as a command.
///
/// Returns `None` unless the text starts with `/` followed by a non-empty name.
///
/// ```rust
/// use stepwise_core::parse_command;
///
/// let cmd = parse_command("/start@shop_bot ref42").unwrap();
/// assert_eq!(cmd.name, "start");
/// assert_eq!(cmd.args, "ref42");
/// assert!(parse_command("hello").is_none());
/// ```
pub fn parse_command(text: &str) -> Option<Command<'_>> {
    let rest = text.strip_prefix('/')?;
    let (token, args) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    let name = token.split('@').next().unwrap_or(token);
    if name.is_empty() {
        return None;
    }
    Some(Command { name, args })
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for all inbound events.
///
/// Events are type-erased using `dyn Event` and can be downcast to concrete
/// types using [`as_any`](Event::as_any). Only [`event_name`](Event::event_name),
/// [`kind`](Event::kind), [`conversation_key`](Event::conversation_key) and
/// `as_any` are required; the remaining accessors default to `None` for
/// events that do not carry that piece of data.
pub trait Event: Any + Send + Sync {
    /// Returns the human-readable name of this event type.
    fn event_name(&self) -> &'static str;

    /// Returns the shape of this event.
    fn kind(&self) -> EventKind;

    /// Returns the `(chat, user)` pair this event belongs to, if any.
    ///
    /// Events without a key never touch continuation state.
    fn conversation_key(&self) -> Option<ConversationKey>;

    /// Returns the message text for message and command events.
    fn text(&self) -> Option<&str> {
        None
    }

    /// Returns the raw button payload for interaction events.
    fn interaction_data(&self) -> Option<&str> {
        None
    }

    /// Returns the transport id needed to acknowledge an interaction.
    fn interaction_id(&self) -> Option<&str> {
        None
    }

    /// Returns the message this event refers to.
    ///
    /// For messages this is the message itself; for interactions it is the
    /// message carrying the pressed button.
    fn message_ref(&self) -> Option<MessageRef> {
        None
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Parses the message text as a command.
    fn command(&self) -> Option<Command<'_>> {
        if self.kind() != EventKind::Command {
            return None;
        }
        self.text().and_then(parse_command)
    }

    /// Parses the interaction payload into an action and its arguments.
    fn interaction(&self) -> Option<InteractionData> {
        self.interaction_data().map(InteractionData::parse)
    }
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased container for events that supports runtime downcasting.
///
/// `BoxedEvent` wraps any type implementing [`Event`] in an `Arc`, so a single
/// event can be shared by every route and continuation that processes it.
/// It implements `Deref<Target = dyn Event>`:
///
/// ```rust,ignore
/// let event: BoxedEvent = /* ... */;
/// let kind = event.kind();
/// let key = event.conversation_key();
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Creates a new `BoxedEvent` from any type implementing `Event`.
    pub fn new<E: Event + 'static>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event + 'static>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }
}

impl Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("event_name", &self.event_name())
            .field("kind", &self.kind())
            .field("key", &self.conversation_key())
            .finish()
    }
}
