//! Event dispatcher for the Stepwise framework.
//!
//! The [`Dispatcher`] is responsible for deciding what runs for one event:
//!
//! 1. Take the conversation gate for the event's key, so events of the same
//!    conversation are processed one at a time
//! 2. Note which continuation (if any) is pending for the key
//! 3. Run every route whose trigger kind and filters match, in declaration
//!    order; a claiming route clears the pending continuation first
//! 4. If the event is a plain message and the continuation noted in step 2 is
//!    still pending, resume it
//!
//! Routes are not mutually exclusive: every matching route runs, and a route
//! error is recorded without stopping the others. Route matching and
//! continuation resumption are independent, so one event may run several
//! routes *and* resume a continuation.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(routes, continuations);
//! let report = dispatcher.dispatch(event, client, CancellationToken::new(), None).await;
//! for outcome in report.outcomes.iter().filter(|o| o.error.is_some()) { /* ... */ }
//! ```

use std::fmt;
use std::sync::Arc;

use stepwise_core::{BoxedClient, BoxedEvent, ConversationKey};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, span, trace, warn};

use crate::context::HandlerContext;
use crate::continuation::{ContinuationStore, ResumeOutcome};
use crate::error::ContinuationError;
use crate::locks::{ConversationGuard, ConversationLocks};
use crate::params::Params;
use crate::route::{RouteId, RouteTable};

// ============================================================================
// Reports
// ============================================================================

/// Per-route record of one dispatch.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub route_id: RouteId,
    pub name: Option<String>,
    pub matched: bool,
    pub error: Option<anyhow::Error>,
}

/// Everything that happened while dispatching one event.
#[derive(Debug)]
pub struct DispatchReport {
    pub event_name: &'static str,
    pub key: Option<ConversationKey>,
    /// One entry per route, in declaration order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Whether a claiming route cleared a pending continuation.
    pub claimed: bool,
    pub resume: Result<ResumeOutcome, ContinuationError>,
}

impl DispatchReport {
    /// Looks up the outcome for one route.
    pub fn outcome(&self, route_id: RouteId) -> Option<&DispatchOutcome> {
        self.outcomes.iter().find(|o| o.route_id == route_id)
    }

    pub fn matched_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.matched).count()
    }

    /// Route handlers that failed.
    pub fn route_errors(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    /// The continuation failure, if any. Sentinels are not failures.
    pub fn continuation_error(&self) -> Option<&ContinuationError> {
        self.resume.as_ref().err().filter(|e| !e.is_sentinel())
    }

    /// No route failed and the continuation, if resumed, succeeded.
    pub fn is_success(&self) -> bool {
        self.route_errors().next().is_none() && self.continuation_error().is_none()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes one event to its stateless routes and its pending continuation.
///
/// `Dispatcher` is `Send + Sync`; the governor shares one instance across all
/// in-flight tasks.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    continuations: Arc<ContinuationStore>,
    locks: Arc<ConversationLocks>,
}

impl Dispatcher {
    pub fn new(routes: RouteTable, continuations: Arc<ContinuationStore>) -> Self {
        Self {
            routes: Arc::new(routes),
            continuations,
            locks: ConversationLocks::new(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn continuations(&self) -> &Arc<ContinuationStore> {
        &self.continuations
    }

    pub fn locks(&self) -> &Arc<ConversationLocks> {
        &self.locks
    }

    /// Dispatches one event.
    ///
    /// `cancellation` and `deadline` are handed to every handler through its
    /// [`HandlerContext`]; the dispatcher itself never aborts a handler.
    pub async fn dispatch(
        &self,
        event: BoxedEvent,
        client: BoxedClient,
        cancellation: CancellationToken,
        deadline: Option<Instant>,
    ) -> DispatchReport {
        let gate = self.acquire(&event).await;
        self.dispatch_with(gate, event, client, cancellation, deadline)
            .await
    }

    /// Waits for the gate of the event's conversation. Events without a
    /// conversation key need no gate.
    pub async fn acquire(&self, event: &BoxedEvent) -> Option<ConversationGuard> {
        match event.conversation_key() {
            Some(key) => Some(self.locks.lock(key).await),
            None => None,
        }
    }

    /// Dispatches one event while holding the gate returned by
    /// [`acquire`](Self::acquire) for it. The gate is released on return.
    pub async fn dispatch_with(
        &self,
        gate: Option<ConversationGuard>,
        event: BoxedEvent,
        client: BoxedClient,
        cancellation: CancellationToken,
        deadline: Option<Instant>,
    ) -> DispatchReport {
        debug_assert_eq!(
            gate.as_ref().map(ConversationGuard::key),
            event.conversation_key()
        );
        let event_name = event.event_name();
        let key = event.conversation_key();
        let span = span!(
            Level::DEBUG,
            "dispatch",
            event_name = %event_name,
            key = ?key,
        );

        let report = self
            .dispatch_inner(event, client, cancellation, deadline)
            .instrument(span)
            .await;
        drop(gate);
        report
    }

    async fn dispatch_inner(
        &self,
        event: BoxedEvent,
        client: BoxedClient,
        cancellation: CancellationToken,
        deadline: Option<Instant>,
    ) -> DispatchReport {
        let event_name = event.event_name();
        let key = event.conversation_key();

        let snapshot = key
            .and_then(|key| self.continuations.get(&key))
            .map(|pending| pending.generation);

        let ctx = Arc::new(HandlerContext::new(
            event.clone(),
            client.clone(),
            Arc::clone(&self.continuations),
            cancellation,
            deadline,
        ));

        let mut outcomes = Vec::with_capacity(self.routes.len());
        let mut claimed = false;

        for route in self.routes.iter() {
            if !route.matches(&event, &client) {
                trace!(route = route.display_name(), "Route check failed, skipping");
                outcomes.push(DispatchOutcome {
                    route_id: route.id(),
                    name: route.get_name().map(str::to_owned),
                    matched: false,
                    error: None,
                });
                continue;
            }

            if route.is_claiming() {
                if let Some(key) = key {
                    if self.continuations.forget(&key) {
                        claimed = true;
                        debug!(route = route.display_name(), "Route claimed conversation, pending continuation cleared");
                    }
                }
            }

            debug!(route = route.display_name(), "Route matched, executing handler");
            let error = route
                .call(Arc::clone(&ctx), Params::from_event(&*event))
                .await
                .err();
            if let Some(error) = &error {
                warn!(route = route.display_name(), error = %error, "Route handler failed");
            }

            outcomes.push(DispatchOutcome {
                route_id: route.id(),
                name: route.get_name().map(str::to_owned),
                matched: true,
                error,
            });
        }

        let resume = self.continuations.resume_snapshot(ctx, snapshot).await;
        match &resume {
            Ok(outcome) => trace!(?outcome, "Continuation check finished"),
            Err(error) if error.is_sentinel() => debug!(error = %error, "Continuation bypassed"),
            Err(error) => warn!(error = %error, "Continuation failed"),
        }

        DispatchReport {
            event_name,
            key,
            outcomes,
            claimed,
            resume,
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("route_count", &self.routes.len())
            .field("continuations", &self.continuations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use stepwise_core::Update;
    use stepwise_core::testing::{ClientCall, RecordingClient};

    use crate::builtin::{CANCEL_ACK, cancel_route};
    use crate::continuation::{Continuation, DEFAULT_CONTINUATION_TIMEOUT};
    use crate::error::HandlerResult;
    use crate::route::{on_command, on_interaction, on_message};
    use crate::step::{StepId, StepRegistry};

    const KEY: ConversationKey = ConversationKey::new(1, 1);

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Arc<HandlerContext>, Params) -> std::future::Ready<HandlerResult> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let handler = move |_ctx: Arc<HandlerContext>, _params: Params| {
            counted.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        };
        (count, handler)
    }

    fn dispatcher(routes: RouteTable, steps: StepRegistry) -> Dispatcher {
        Dispatcher::new(
            routes,
            Arc::new(ContinuationStore::new(
                Arc::new(steps),
                DEFAULT_CONTINUATION_TIMEOUT,
            )),
        )
    }

    async fn send(dispatcher: &Dispatcher, client: &Arc<RecordingClient>, update: Update) -> DispatchReport {
        dispatcher
            .dispatch(BoxedEvent::new(update), client.clone(), CancellationToken::new(), None)
            .await
    }

    #[tokio::test]
    async fn test_every_matching_route_runs_and_errors_are_isolated() {
        let (first, first_handler) = counter();
        let (last, last_handler) = counter();
        let routes = RouteTable::new()
            .with(on_message().name("first").handler(first_handler))
            .with(on_message().name("failing").handler(
                |_ctx: Arc<HandlerContext>, _params: Params| async {
                    HandlerResult::Err(anyhow::anyhow!("boom"))
                },
            ))
            .with(on_command("start").handler(|_ctx: Arc<HandlerContext>, _params: Params| async {
                HandlerResult::Ok(())
            }))
            .with(on_message().name("last").handler(last_handler));
        let dispatcher = dispatcher(routes, StepRegistry::new());

        let report = send(&dispatcher, &RecordingClient::new(), Update::message(1, 1, 1, "hi")).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.matched_count(), 3);
        assert_eq!(report.route_errors().count(), 1);
        assert_eq!(report.route_errors().next().unwrap().name.as_deref(), Some("failing"));
        assert!(!report.is_success());
        assert_eq!(report.resume.as_ref().ok(), Some(&ResumeOutcome::Idle));
    }

    /// Registration flow: name, then phone. A command in the middle runs its
    /// route but does not resume or clear the flow.
    #[tokio::test]
    async fn test_name_phone_flow_with_command_in_between() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let name_log = Arc::clone(&log);
        let phone_log = Arc::clone(&log);
        let steps = StepRegistry::new()
            .with("name", move |ctx: Arc<HandlerContext>, params: Params| {
                let log = Arc::clone(&name_log);
                async move {
                    assert_eq!(params.get_str("step"), Some("name"));
                    let name = ctx.event().text().unwrap_or_default().to_owned();
                    log.lock().push(format!("name:{name}"));
                    ctx.continue_with(Continuation::new(
                        "phone",
                        Params::new().with("step", "phone").with("name", name),
                    ))?;
                    HandlerResult::Ok(())
                }
            })
            .with("phone", move |ctx: Arc<HandlerContext>, params: Params| {
                let log = Arc::clone(&phone_log);
                async move {
                    let name: String = params.require("name")?;
                    let phone = ctx.event().text().unwrap_or_default();
                    log.lock().push(format!("phone:{name}:{phone}"));
                    ctx.finish();
                    HandlerResult::Ok(())
                }
            });

        let (start_count, start_handler) = counter();
        let dispatcher = dispatcher(
            RouteTable::new().with(on_command("start").handler(start_handler)),
            steps,
        );
        let client = RecordingClient::new();
        dispatcher
            .continuations()
            .register(KEY, Continuation::new("name", Params::new().with("step", "name")))
            .unwrap();

        let report = send(&dispatcher, &client, Update::message(1, 1, 1, "Alice")).await;
        assert_eq!(report.resume.unwrap(), ResumeOutcome::Resumed(StepId::from("name")));
        let pending = dispatcher.continuations().get(&KEY).unwrap();
        assert_eq!(pending.continuation.params.get_str("step"), Some("phone"));

        let report = send(&dispatcher, &client, Update::message(2, 1, 1, "/start")).await;
        assert!(report.resume.unwrap_err().is_sentinel());
        assert_eq!(start_count.load(Ordering::SeqCst), 1);
        assert!(dispatcher.continuations().contains(&KEY));

        let report = send(&dispatcher, &client, Update::message(3, 1, 1, "89990000000")).await;
        assert_eq!(report.resume.unwrap(), ResumeOutcome::Resumed(StepId::from("phone")));
        assert!(!dispatcher.continuations().contains(&KEY));

        assert_eq!(
            *log.lock(),
            vec!["name:Alice".to_owned(), "phone:Alice:89990000000".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_route_registering_continuation_does_not_resume_same_event() {
        let (step_count, step_handler) = counter();
        let steps = StepRegistry::new().with("answer", step_handler);
        let routes = RouteTable::new().with(on_message().filter(crate::filter::text_eq("quiz")).handler(
            |ctx: Arc<HandlerContext>, _params: Params| async move {
                ctx.continue_with(Continuation::new("answer", Params::new()))?;
                HandlerResult::Ok(())
            },
        ));
        let dispatcher = dispatcher(routes, steps);
        let client = RecordingClient::new();

        let report = send(&dispatcher, &client, Update::message(1, 1, 1, "quiz")).await;
        assert_eq!(report.resume.unwrap(), ResumeOutcome::Superseded);
        assert_eq!(step_count.load(Ordering::SeqCst), 0);

        let report = send(&dispatcher, &client, Update::message(2, 1, 1, "42")).await;
        assert_eq!(report.resume.unwrap(), ResumeOutcome::Resumed(StepId::from("answer")));
        assert_eq!(step_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_route_clearing_continuation_leaves_conversation_idle() {
        let (step_count, step_handler) = counter();
        let routes = RouteTable::new().with(on_message().filter(crate::filter::text_eq("stop")).handler(
            |ctx: Arc<HandlerContext>, _params: Params| async move {
                ctx.finish();
                HandlerResult::Ok(())
            },
        ));
        let dispatcher = dispatcher(routes, StepRegistry::new().with("name", step_handler));
        let client = RecordingClient::new();
        dispatcher
            .continuations()
            .register(KEY, Continuation::new("name", Params::new()))
            .unwrap();

        let report = send(&dispatcher, &client, Update::message(1, 1, 1, "stop")).await;

        assert_eq!(report.resume.unwrap(), ResumeOutcome::Idle);
        assert_eq!(step_count.load(Ordering::SeqCst), 0);
        assert!(!dispatcher.continuations().contains(&KEY));
    }

    #[tokio::test]
    async fn test_interaction_route_claims_conversation() {
        let (step_count, step_handler) = counter();
        let (menu_count, menu_handler) = counter();
        let dispatcher = dispatcher(
            RouteTable::new().with(on_interaction("menu").handler(menu_handler)),
            StepRegistry::new().with("name", step_handler),
        );
        let client = RecordingClient::new();
        dispatcher
            .continuations()
            .register(KEY, Continuation::new("name", Params::new()).cancellation_message("bye"))
            .unwrap();

        let report = send(&dispatcher, &client, Update::interaction(1, 1, 1, 7, "menu")).await;

        assert!(report.claimed);
        assert_eq!(menu_count.load(Ordering::SeqCst), 1);
        assert_eq!(step_count.load(Ordering::SeqCst), 0);
        assert!(!dispatcher.continuations().contains(&KEY));
        // Claiming is silent.
        assert_eq!(client.send_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_route_clears_deletes_and_answers() {
        let dispatcher = dispatcher(
            RouteTable::new().with(cancel_route()),
            StepRegistry::new().with("name", counter().1),
        );
        let client = RecordingClient::new();
        dispatcher
            .continuations()
            .register(KEY, Continuation::new("name", Params::new()).cancellation_message("bye"))
            .unwrap();

        let report = send(&dispatcher, &client, Update::interaction(5, 1, 1, 40, "cancel")).await;

        assert!(report.is_success());
        assert!(!dispatcher.continuations().contains(&KEY));
        assert_eq!(
            client.calls(),
            vec![
                ClientCall::Delete {
                    target: stepwise_core::MessageRef::new(1, 40)
                },
                ClientCall::Answer {
                    interaction_id: "5".into(),
                    text: Some(CANCEL_ACK.into())
                },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_conversation_events_are_serialized() {
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let (inside_h, max_h) = (Arc::clone(&inside), Arc::clone(&max_inside));
        let routes = RouteTable::new().with(on_interaction("buy").handler(
            move |_ctx: Arc<HandlerContext>, _params: Params| {
                let inside = Arc::clone(&inside_h);
                let max_inside = Arc::clone(&max_h);
                async move {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    HandlerResult::Ok(())
                }
            },
        ));
        let dispatcher = Arc::new(dispatcher(routes, StepRegistry::new()));
        let client = RecordingClient::new();

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                let client = client.clone();
                tokio::spawn(async move {
                    send(&dispatcher, &client, Update::interaction(i, 1, 1, 9, "buy")).await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_success());
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(dispatcher.locks().is_empty());
    }
}
