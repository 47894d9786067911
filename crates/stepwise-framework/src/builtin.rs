//! Built-in routes.

use std::sync::Arc;

use tracing::debug;

use crate::context::HandlerContext;
use crate::error::HandlerResult;
use crate::params::Params;
use crate::route::{Route, on_interaction};

/// Button action handled by [`cancel_route`].
pub const CANCEL_ACTION: &str = "cancel";

/// Acknowledgement shown when a flow is cancelled from a button.
pub const CANCEL_ACK: &str = "Action cancelled";

/// A route for the standard "Cancel" button.
///
/// Clears the caller's pending continuation without a notice, deletes the
/// message carrying the button, and answers the press with [`CANCEL_ACK`].
pub fn cancel_route() -> Route {
    cancel_route_with(CANCEL_ACTION, CANCEL_ACK)
}

/// Like [`cancel_route`] with a custom action and acknowledgement.
pub fn cancel_route_with(action: &str, ack: &str) -> Route {
    let ack: Arc<str> = Arc::from(ack);
    on_interaction(action).handler(move |ctx: Arc<HandlerContext>, _params: Params| {
        let ack = Arc::clone(&ack);
        async move { cancel(&ctx, &ack).await }
    })
}

async fn cancel(ctx: &HandlerContext, ack: &str) -> HandlerResult {
    let cleared = ctx.finish();
    debug!(key = ?ctx.key(), cleared, "Flow cancelled from button");

    if let Some(message) = ctx.event().message_ref() {
        ctx.client().delete(message).await?;
    }
    if let Some(id) = ctx.event().interaction_id() {
        ctx.client().answer_interaction(id, Some(ack)).await?;
    }
    Ok(())
}
