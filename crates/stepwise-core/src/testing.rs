//! Test doubles.
//!
//! [`RecordingClient`] records every outbound call instead of performing it,
//! so tests can assert on exactly what a handler, the continuation store or
//! the cancel route sent.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::Client;
use crate::error::{ApiError, ApiResult};
use crate::message::{MessageRef, OutgoingMessage};

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Send {
        chat_id: i64,
        message: OutgoingMessage,
    },
    Edit {
        target: MessageRef,
        message: OutgoingMessage,
    },
    Delete {
        target: MessageRef,
    },
    Answer {
        interaction_id: String,
        text: Option<String>,
    },
}

/// A [`Client`] that records calls in memory.
#[derive(Debug, Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<ClientCall>>,
    next_message_id: AtomicI64,
    fail_sends: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every subsequent `send` fail with [`ApiError::NotConnected`].
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of every recorded call, oldest first.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    /// Returns the text of every successful `send`.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ClientCall::Send { message, .. } => Some(message.text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent_texts().len()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Client for RecordingClient {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> ApiResult<MessageRef> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::NotConnected);
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(ClientCall::Send { chat_id, message });
        Ok(MessageRef::new(chat_id, message_id))
    }

    async fn edit(&self, target: MessageRef, message: OutgoingMessage) -> ApiResult<()> {
        self.record(ClientCall::Edit { target, message });
        Ok(())
    }

    async fn delete(&self, target: MessageRef) -> ApiResult<()> {
        self.record(ClientCall::Delete { target });
        Ok(())
    }

    async fn answer_interaction(&self, interaction_id: &str, text: Option<&str>) -> ApiResult<()> {
        self.record(ClientCall::Answer {
            interaction_id: interaction_id.to_owned(),
            text: text.map(str::to_owned),
        });
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
