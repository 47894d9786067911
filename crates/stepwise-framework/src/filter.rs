//! Route filters.
//!
//! A [`Filter`] decides whether a route applies to an event. Filters are pure
//! predicates: they look at the event (and may look at the client handle) but
//! never change any state. A route that needs to record something as a
//! consequence of matching does it in its handler.
//!
//! A route's filters are combined with logical AND and evaluated left to
//! right, stopping at the first one that fails.
//!
//! ```rust,ignore
//! use stepwise_framework::filter;
//!
//! on_interaction("item")
//!     .filter(filter::not(filter::chat(ADMIN_CHAT)))
//!     .handler(show_item);
//! ```

use std::sync::Arc;

use stepwise_core::{BoxedClient, BoxedEvent};

/// A predicate over an incoming event.
pub trait Filter: Send + Sync + 'static {
    fn check(&self, event: &BoxedEvent, client: &BoxedClient) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&BoxedEvent, &BoxedClient) -> bool + Send + Sync + 'static,
{
    fn check(&self, event: &BoxedEvent, client: &BoxedClient) -> bool {
        (self)(event, client)
    }
}

/// A shared filter trait object.
pub type BoxedFilter = Arc<dyn Filter>;

/// Matches commands named `name` (without the slash).
pub fn command(name: impl Into<String>) -> impl Filter {
    let name = name.into();
    move |event: &BoxedEvent, _: &BoxedClient| event.command().is_some_and(|cmd| cmd.name == name)
}

/// Matches message text equal to `text`, ignoring surrounding whitespace.
pub fn text_eq(text: impl Into<String>) -> impl Filter {
    let text = text.into();
    move |event: &BoxedEvent, _: &BoxedClient| event.text().is_some_and(|t| t.trim() == text)
}

/// Matches button payloads exactly equal to `data`.
pub fn data_eq(data: impl Into<String>) -> impl Filter {
    let data = data.into();
    move |event: &BoxedEvent, _: &BoxedClient| event.interaction_data() == Some(data.as_str())
}

/// Matches button presses whose parsed action equals `action`.
pub fn action(action: impl Into<String>) -> impl Filter {
    let action = action.into();
    move |event: &BoxedEvent, _: &BoxedClient| {
        event.interaction().is_some_and(|data| data.action == action)
    }
}

/// Matches button presses whose action starts with `prefix`.
pub fn action_prefix(prefix: impl Into<String>) -> impl Filter {
    let prefix = prefix.into();
    move |event: &BoxedEvent, _: &BoxedClient| {
        event
            .interaction()
            .is_some_and(|data| data.action.starts_with(&prefix))
    }
}

/// Matches events from one chat.
pub fn chat(chat_id: i64) -> impl Filter {
    move |event: &BoxedEvent, _: &BoxedClient| {
        event
            .conversation_key()
            .is_some_and(|key| key.chat_id == chat_id)
    }
}

/// Matches when both filters match.
pub fn and(first: impl Filter, second: impl Filter) -> impl Filter {
    move |event: &BoxedEvent, client: &BoxedClient| {
        first.check(event, client) && second.check(event, client)
    }
}

/// Matches when either filter matches.
pub fn or(first: impl Filter, second: impl Filter) -> impl Filter {
    move |event: &BoxedEvent, client: &BoxedClient| {
        first.check(event, client) || second.check(event, client)
    }
}

/// Inverts a filter.
pub fn not(inner: impl Filter) -> impl Filter {
    move |event: &BoxedEvent, client: &BoxedClient| !inner.check(event, client)
}
