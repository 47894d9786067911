//! Handler system for the Stepwise framework.
//!
//! Stateless routes and continuation steps share one callback shape:
//!
//! ```rust,ignore
//! async fn ask_phone(ctx: Arc<HandlerContext>, params: Params) -> HandlerResult {
//!     let name: String = params.require("name")?;
//!     ctx.reply(format!("Thanks, {name}. Your phone number?")).await?;
//!     ctx.continue_with(Continuation::new("phone", params))?;
//!     Ok(())
//! }
//! ```
//!
//! Any `Fn(Arc<HandlerContext>, Params) -> impl Future<Output = HandlerResult>`
//! is a [`Handler`] through the blanket implementation below.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::HandlerContext;
use crate::error::HandlerResult;
use crate::params::Params;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Handler Trait
// ============================================================================

/// The callback invoked for a matched route or a resumed continuation.
pub trait Handler: Send + Sync + 'static {
    /// Runs the handler for one event.
    fn call(&self, ctx: Arc<HandlerContext>, params: Params) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<HandlerContext>, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: Arc<HandlerContext>, params: Params) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(ctx, params))
    }
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn Handler>;

/// Convert a handler into a boxed handler.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}
