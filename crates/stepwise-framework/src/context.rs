//! Handler context.
//!
//! One [`HandlerContext`] is created per dispatched event and shared (as an
//! `Arc`) by every route handler and the resumed step for that event. It
//! carries the event, the outbound client, the continuation store, and the
//! event's cancellation signal.
//!
//! # Cancellation
//!
//! The governor gives each event a deadline. When it passes, or when the
//! process begins shutting down, the context's [`CancellationToken`] fires.
//! Handler code is never aborted; it observes the signal at suspension points
//! by awaiting through [`run_cancellable`](HandlerContext::run_cancellable).
//! [`reply`](HandlerContext::reply) does this already.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use stepwise_core::{
    ApiError, ApiResult, BoxedClient, BoxedEvent, ConversationKey, MessageRef, OutgoingMessage,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::continuation::{Continuation, ContinuationStore};
use crate::error::{Cancelled, ContinuationError};

/// Everything a handler sees while processing one event.
pub struct HandlerContext {
    event: BoxedEvent,
    client: BoxedClient,
    continuations: Arc<ContinuationStore>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl HandlerContext {
    pub fn new(
        event: BoxedEvent,
        client: BoxedClient,
        continuations: Arc<ContinuationStore>,
        cancellation: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            event,
            client,
            continuations,
            cancellation,
            deadline,
        }
    }

    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    pub fn client(&self) -> &BoxedClient {
        &self.client
    }

    /// The conversation this event belongs to.
    pub fn key(&self) -> Option<ConversationKey> {
        self.event.conversation_key()
    }

    pub fn continuations(&self) -> &Arc<ContinuationStore> {
        &self.continuations
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// When the event's processing budget runs out, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Awaits `fut` unless the event is cancelled first.
    ///
    /// ```rust,ignore
    /// let rows = ctx.run_cancellable(db.load_cart(user_id)).await??;
    /// ```
    pub async fn run_cancellable<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Sends `message` to the event's chat.
    ///
    /// Returns [`ApiError::Cancelled`] if the event is cancelled before the
    /// send completes.
    pub async fn reply(&self, message: impl Into<OutgoingMessage>) -> ApiResult<MessageRef> {
        let chat_id = self
            .chat_id()
            .ok_or_else(|| ApiError::Other("event has no chat to reply to".into()))?;
        let message = message.into();
        self.run_cancellable(self.client.send(chat_id, message))
            .await
            .map_err(|Cancelled| ApiError::Cancelled)?
    }

    /// Makes the next plain message of this conversation resume `continuation`.
    ///
    /// Replaces whatever was pending.
    pub fn continue_with(&self, continuation: Continuation) -> Result<(), ContinuationError> {
        let key = self.key().ok_or(ContinuationError::NoConversation)?;
        self.continuations.register(key, continuation)
    }

    /// Ends the conversation's flow without notice. Returns whether one was pending.
    pub fn finish(&self) -> bool {
        self.key()
            .is_some_and(|key| self.continuations.forget(&key))
    }

    /// Ends the conversation's flow, sending its cancellation message if `notify`.
    pub async fn cancel_flow(&self, notify: bool) -> Result<bool, ContinuationError> {
        let Some(key) = self.key() else {
            return Ok(false);
        };
        self.continuations
            .remove(&key, self.client.as_ref(), notify)
            .await
    }

    fn chat_id(&self) -> Option<i64> {
        self.key()
            .map(|key| key.chat_id)
            .or_else(|| self.event.message_ref().map(|msg| msg.chat_id))
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("event", &self.event)
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stepwise_core::Update;
    use stepwise_core::testing::RecordingClient;

    use crate::continuation::DEFAULT_CONTINUATION_TIMEOUT;
    use crate::error::HandlerResult;
    use crate::params::Params;
    use crate::step::StepRegistry;

    async fn noop(_ctx: Arc<HandlerContext>, _params: Params) -> HandlerResult {
        Ok(())
    }

    fn context(client: Arc<RecordingClient>, token: CancellationToken) -> HandlerContext {
        let steps = Arc::new(StepRegistry::new().with("name", noop));
        HandlerContext::new(
            BoxedEvent::new(Update::message(1, 10, 20, "hi")),
            client,
            Arc::new(ContinuationStore::new(steps, DEFAULT_CONTINUATION_TIMEOUT)),
            token,
            None,
        )
    }

    #[tokio::test]
    async fn test_reply_goes_to_event_chat() {
        let client = RecordingClient::new();
        let ctx = context(client.clone(), CancellationToken::new());

        let sent = ctx.reply("hello").await.unwrap();
        assert_eq!(sent.chat_id, 10);
        assert_eq!(client.sent_texts(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_reply_after_cancellation_is_refused() {
        let client = RecordingClient::new();
        let token = CancellationToken::new();
        let ctx = context(client.clone(), token.clone());

        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.reply("late").await, Err(ApiError::Cancelled)));
        assert_eq!(client.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancellable_observes_token() {
        let token = CancellationToken::new();
        let ctx = context(RecordingClient::new(), token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let result = ctx
            .run_cancellable(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(result.is_err());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_flow_helpers() {
        let client = RecordingClient::new();
        let ctx = context(client.clone(), CancellationToken::new());
        let key = ctx.key().unwrap();

        ctx.continue_with(Continuation::new("name", Params::new()).cancellation_message("stopped"))
            .unwrap();
        assert!(ctx.continuations().contains(&key));
        assert!(ctx.finish());
        assert!(!ctx.finish());

        ctx.continue_with(Continuation::new("name", Params::new()).cancellation_message("stopped"))
            .unwrap();
        assert!(ctx.cancel_flow(true).await.unwrap());
        assert_eq!(client.sent_texts(), vec!["stopped"]);
    }
}
