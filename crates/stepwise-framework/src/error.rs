//! Error types for the Stepwise framework.

use stepwise_core::{ApiError, ConversationKey};
use thiserror::Error;

use crate::step::StepId;

/// Result type returned by route and step handlers.
///
/// Handlers return `anyhow::Result` so application code can use `?` on any
/// error type; the dispatcher records the error against the route or step
/// that produced it.
pub type HandlerResult = anyhow::Result<()>;

/// Errors reading or writing a [`Params`](crate::params::Params) bag.
#[derive(Debug, Error)]
pub enum ParamError {
    /// The key is not present.
    #[error("missing parameter '{0}'")]
    Missing(String),

    /// The value could not be converted to or from the requested type.
    #[error("invalid parameter '{key}': {source}")]
    Invalid {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the continuation layer.
#[derive(Debug, Error)]
pub enum ContinuationError {
    /// A command arrived while a continuation was pending. Not a failure:
    /// commands never resume continuations.
    #[error("command bypassed pending continuation for {key}")]
    CommandBypass { key: ConversationKey },

    /// The event carries no conversation key, so there is nothing to address.
    #[error("event has no conversation key")]
    NoConversation,

    /// No handler is registered under this step id.
    #[error("unknown step '{0}'")]
    UnknownStep(StepId),

    /// The resumed step handler failed. The continuation is left as the
    /// handler left it.
    #[error("step '{step}' failed: {source}")]
    Handler {
        step: StepId,
        #[source]
        source: anyhow::Error,
    },

    /// Sending the cancellation notice failed. The continuation is already gone.
    #[error("failed to send cancellation notice to {key}: {source}")]
    Notice {
        key: ConversationKey,
        #[source]
        source: ApiError,
    },
}

impl ContinuationError {
    /// Returns `true` for outcomes that are reported through the error channel
    /// but are not failures.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::CommandBypass { .. })
    }
}

/// Returned by [`HandlerContext::run_cancellable`](crate::context::HandlerContext::run_cancellable)
/// when the event's cancellation token fires first.
#[derive(Debug, Clone, Copy, Error)]
#[error("handler cancelled: event deadline elapsed or shutdown requested")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_command_bypass_is_sentinel() {
        let key = ConversationKey::new(1, 1);
        assert!(ContinuationError::CommandBypass { key }.is_sentinel());
        assert!(!ContinuationError::UnknownStep(StepId::from("x")).is_sentinel());
        assert!(!ContinuationError::NoConversation.is_sentinel());
    }
}
