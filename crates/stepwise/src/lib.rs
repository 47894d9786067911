//! # Stepwise
//!
//! Multi-step conversational flows for chat bots.
//!
//! A flow is a chain of named steps. Each step handles one user reply and
//! either registers the next step, together with the data gathered so far,
//! or finishes. Pending steps expire after a configurable idle time, and the
//! user is told so.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌───────────────────────────────┐
//! │ event stream │────▶│  Governor  │────▶│ Dispatcher (one task / event) │──▶ Client
//! │  (platform)  │     │ N workers  │     │  routes, then pending step    │
//! └──────────────┘     └────────────┘     └───────────────────────────────┘
//!                            │                          │
//!                            └──── expiry sweeps ──▶ ContinuationStore
//! ```
//!
//! - **Core**: platform-neutral events, messages and the [`Client`](core::Client) trait
//! - **Framework**: routes, filters, steps and the continuation store
//! - **Runtime**: concurrency governor, configuration, logging and shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepwise::prelude::*;
//!
//! async fn start(ctx: Arc<HandlerContext>, _: Params) -> HandlerResult {
//!     ctx.reply("What's your name?").await?;
//!     ctx.continue_with(Continuation::new("name", Params::new()))?;
//!     Ok(())
//! }
//!
//! async fn name(ctx: Arc<HandlerContext>, _: Params) -> HandlerResult {
//!     let name = ctx.event().text().unwrap_or_default();
//!     ctx.reply(format!("Hello, {name}!")).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     StepwiseRuntime::new()
//!         .route(on_command("start").handler(start))
//!         .step("name", name)
//!         .run(my_events(), my_client())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `stepwise.toml` (default)
//! - `json-log`: JSON log output
//! - `testing`: in-memory recording client

pub use stepwise_core as core;
pub use stepwise_framework as framework;
pub use stepwise_runtime as runtime;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use stepwise::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use stepwise_runtime::{StepwiseConfig, StepwiseRuntime};

    // Platform seam
    pub use stepwise_core::{
        BoxedClient, BoxedEvent, Button, Client, ConversationKey, Event, EventKind, MessageRef,
        OutgoingMessage, Update,
    };

    // Routing and flows
    pub use stepwise_framework::filter;
    pub use stepwise_framework::{
        Continuation, HandlerContext, HandlerResult, Params, Route, cancel_route, on_any_command,
        on_command, on_interaction, on_message,
    };

    pub use stepwise_runtime::prelude::*;
}
