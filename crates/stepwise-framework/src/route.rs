//! Routes and the route table.
//!
//! A [`Route`] pairs a trigger kind with an ordered filter chain and a
//! handler. Routes are stateless: they match every event of their kind that
//! passes their filters, regardless of conversation state.
//!
//! # Claiming a conversation
//!
//! A route that *claims* the conversation clears any pending continuation for
//! the event's key, silently, before its handler runs. This is how navigating
//! away from a flow (pressing an unrelated menu button) ends it. Interaction
//! routes claim by default; command and message routes do not, so a command
//! issued mid-flow leaves the flow pending. Override per route with
//! [`Route::claims_conversation`].
//!
//! # Example
//!
//! ```rust,ignore
//! let routes = RouteTable::new()
//!     .with(on_command("start").name("start").handler(start))
//!     .with(on_interaction("catalog").handler(show_catalog))
//!     .with(on_message().filter(filter::text_eq("help")).handler(help));
//! ```

use std::fmt;
use std::sync::Arc;

use stepwise_core::{BoxedClient, BoxedEvent, EventKind};
use tracing::trace;
use uuid::Uuid;

use crate::context::HandlerContext;
use crate::error::HandlerResult;
use crate::filter::{self, BoxedFilter, Filter};
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::params::Params;

/// The event shape a route triggers on.
pub type TriggerKind = EventKind;

/// Unique identity of a route, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(Uuid);

impl RouteId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Route
// ============================================================================

/// A stateless rule: trigger kind, filter chain, handler.
#[derive(Clone)]
pub struct Route {
    id: RouteId,
    trigger: TriggerKind,
    name: Option<String>,
    filters: Vec<BoxedFilter>,
    handler: Option<BoxedHandler>,
    claims_conversation: bool,
}

impl Route {
    /// Creates a route for `trigger` that matches every event of that kind.
    pub fn new(trigger: TriggerKind) -> Self {
        Self {
            id: RouteId::new(),
            trigger,
            name: None,
            filters: Vec::new(),
            handler: None,
            claims_conversation: trigger == EventKind::Interaction,
        }
    }

    /// Sets a name for this route (used in logs and reports).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a filter to the chain.
    pub fn filter<F: Filter>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Sets the handler.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(into_handler(handler));
        self
    }

    /// Sets whether matching this route clears a pending continuation.
    pub fn claims_conversation(mut self, claims: bool) -> Self {
        self.claims_conversation = claims;
        self
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for logs: the route's name or `"unnamed"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    pub fn is_claiming(&self) -> bool {
        self.claims_conversation
    }

    /// Whether the event has this route's kind and passes every filter.
    pub fn matches(&self, event: &BoxedEvent, client: &BoxedClient) -> bool {
        event.kind() == self.trigger && self.filters.iter().all(|f| f.check(event, client))
    }

    /// Runs the handler. A route without a handler succeeds without doing anything.
    pub async fn call(&self, ctx: Arc<HandlerContext>, params: Params) -> HandlerResult {
        match &self.handler {
            Some(handler) => handler.call(ctx, params).await,
            None => {
                trace!(route = self.display_name(), "Route has no handler");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("filters", &self.filters.len())
            .field("claims_conversation", &self.claims_conversation)
            .finish()
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Creates a route for plain (non-command) messages.
pub fn on_message() -> Route {
    Route::new(EventKind::Message)
}

/// Creates a route for the command `/name`, named after it.
pub fn on_command(name: impl Into<String>) -> Route {
    let name = name.into();
    Route::new(EventKind::Command)
        .name(name.clone())
        .filter(filter::command(name))
}

/// Creates a route for any command.
pub fn on_any_command() -> Route {
    Route::new(EventKind::Command)
}

/// Creates a route for button presses whose action is `action`, named after it.
pub fn on_interaction(action: impl Into<String>) -> Route {
    let action = action.into();
    Route::new(EventKind::Interaction)
        .name(action.clone())
        .filter(filter::action(action))
}

// ============================================================================
// Route Table
// ============================================================================

/// Ordered list of routes. Read-only once the runtime starts.
#[derive(Default, Clone, Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. Routes are evaluated in the order they are added.
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Adds a route (builder pattern).
    pub fn with(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<Route> for RouteTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

impl Extend<Route> for RouteTable {
    fn extend<I: IntoIterator<Item = Route>>(&mut self, iter: I) {
        self.routes.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stepwise_core::Update;
    use stepwise_core::testing::RecordingClient;

    fn client() -> BoxedClient {
        RecordingClient::new()
    }

    #[test]
    fn test_trigger_kinds_are_exclusive() {
        let client = client();
        let plain = BoxedEvent::new(Update::message(1, 1, 1, "start"));
        let cmd = BoxedEvent::new(Update::message(2, 1, 1, "/start"));

        assert!(on_message().matches(&plain, &client));
        assert!(!on_message().matches(&cmd, &client));
        assert!(on_command("start").matches(&cmd, &client));
        assert!(!on_command("start").matches(&plain, &client));
        assert!(on_any_command().matches(&cmd, &client));
    }

    #[test]
    fn test_filters_short_circuit_left_to_right() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let route = on_message()
            .filter(|_: &BoxedEvent, _: &BoxedClient| false)
            .filter(move |_: &BoxedEvent, _: &BoxedClient| {
                counted.fetch_add(1, Ordering::SeqCst);
                true
            });

        assert!(!route.matches(&BoxedEvent::new(Update::message(1, 1, 1, "x")), &client()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_claim_defaults() {
        assert!(on_interaction("menu").is_claiming());
        assert!(!on_command("start").is_claiming());
        assert!(!on_message().is_claiming());
        assert!(on_command("menu").claims_conversation(true).is_claiming());
    }

    #[test]
    fn test_route_ids_are_unique() {
        let table: RouteTable = (0..3).map(|_| on_message()).collect();
        let ids: std::collections::HashSet<_> = table.iter().map(Route::id).collect();
        assert_eq!(ids.len(), 3);
    }
}
