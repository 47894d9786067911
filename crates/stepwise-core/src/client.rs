//! Outbound client trait.
//!
//! A [`Client`] is the engine's only way to talk back to a chat. The engine
//! never inspects what a call does on the wire; it only needs each call to be
//! awaitable and possibly failing.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::message::{MessageRef, OutgoingMessage};

/// The outbound side of a chat transport.
///
/// Concrete implementations (a Telegram binding, a console binding, a
/// recording double in tests) provide these four calls plus [`as_any`] so
/// handlers can reach protocol-specific APIs through [`downcast_client`].
///
/// [`as_any`]: Client::as_any
#[async_trait]
pub trait Client: Send + Sync {
    /// Sends a message to a chat and returns a handle to it.
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> ApiResult<MessageRef>;

    /// Replaces the content of a previously sent message.
    async fn edit(&self, target: MessageRef, message: OutgoingMessage) -> ApiResult<()>;

    /// Deletes a message.
    async fn delete(&self, target: MessageRef) -> ApiResult<()>;

    /// Acknowledges a button press, optionally showing a short notice.
    async fn answer_interaction(&self, interaction_id: &str, text: Option<&str>) -> ApiResult<()>;

    /// Returns self as an `Arc<dyn Any>` for safe downcasting.
    ///
    /// Implementors should simply return `self`:
    ///
    /// ```rust,ignore
    /// fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    ///     self
    /// }
    /// ```
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A shared Client trait object.
pub type BoxedClient = Arc<dyn Client>;

/// Attempts to downcast a [`BoxedClient`] to a specific concrete type.
pub fn downcast_client<T: Client + 'static>(client: BoxedClient) -> Option<Arc<T>> {
    Arc::downcast::<T>(client.as_any()).ok()
}
