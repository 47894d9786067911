//! # Stepwise Framework
//!
//! Routing and conversation-state components for building chat bots.
//!
//! This layer provides:
//! - Routes with filter chains, grouped in an ordered [`RouteTable`]
//! - Multi-step flows as named steps plus a serializable [`Params`] bag,
//!   stored per conversation in the [`ContinuationStore`]
//! - The [`Dispatcher`], which runs the matching routes for an event and
//!   resumes its conversation's pending step, one event per conversation at a
//!   time
//! - A built-in cancel route
//!
//! Concurrency limits, timeouts and process lifecycle live one layer up, in
//! `stepwise-runtime`.

pub mod builtin;
pub mod context;
pub mod continuation;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod handler;
pub mod locks;
pub mod params;
pub mod route;
pub mod step;

pub use builtin::{CANCEL_ACK, CANCEL_ACTION, cancel_route, cancel_route_with};
pub use context::HandlerContext;
pub use continuation::{
    Continuation, ContinuationStore, DEFAULT_CONTINUATION_TIMEOUT, PendingContinuation,
    ResumeOutcome, SweepReport,
};
pub use dispatcher::{DispatchOutcome, DispatchReport, Dispatcher};
pub use error::{Cancelled, ContinuationError, HandlerResult, ParamError};
pub use filter::{BoxedFilter, Filter};
pub use handler::{BoxFuture, BoxedHandler, Handler, into_handler};
pub use locks::{ConversationGuard, ConversationLocks};
pub use params::Params;
pub use route::{
    Route, RouteId, RouteTable, TriggerKind, on_any_command, on_command, on_interaction,
    on_message,
};
pub use step::{StepId, StepRegistry};
