//! Per-conversation serialization.
//!
//! Two events from the same user can arrive close together (a doubled button
//! press, a message typed while the previous one is still being handled).
//! [`ConversationLocks`] hands out one async gate per [`ConversationKey`]; the
//! dispatcher holds it for the whole of an event's processing, so events of
//! one conversation run one at a time while different conversations run in
//! parallel.
//!
//! Gates are created on first use and dropped as soon as nobody holds or
//! waits for them, so the map only ever contains live conversations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_core::ConversationKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Gate = Arc<AsyncMutex<()>>;

/// Registry of per-key async gates.
#[derive(Default)]
pub struct ConversationLocks {
    gates: Mutex<HashMap<ConversationKey, Gate>>,
}

impl ConversationLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits for exclusive access to `key`.
    ///
    /// Waiters are served in FIFO order. Dropping the returned guard releases
    /// the gate.
    pub async fn lock(self: &Arc<Self>, key: ConversationKey) -> ConversationGuard {
        let gate = Arc::clone(self.gates.lock().entry(key).or_default());

        // Built before awaiting so a cancelled wait still runs the cleanup in Drop.
        let mut held = ConversationGuard {
            locks: Arc::clone(self),
            key,
            gate: Arc::clone(&gate),
            guard: None,
        };
        held.guard = Some(gate.lock_owned().await);
        held
    }

    /// Number of conversations currently holding or waiting for a gate.
    pub fn len(&self) -> usize {
        self.gates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.lock().is_empty()
    }
}

impl fmt::Debug for ConversationLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationLocks")
            .field("active", &self.len())
            .finish()
    }
}

/// Exclusive access to one conversation. Released on drop.
pub struct ConversationGuard {
    locks: Arc<ConversationLocks>,
    key: ConversationKey,
    gate: Gate,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConversationGuard {
    pub fn key(&self) -> ConversationKey {
        self.key
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut gates = self.locks.gates.lock();
        if let Some(current) = gates.get(&self.key) {
            // One reference in the map, one in this guard: nobody else is waiting.
            if Arc::ptr_eq(current, &self.gate) && Arc::strong_count(&self.gate) == 2 {
                gates.remove(&self.key);
            }
        }
    }
}

impl fmt::Debug for ConversationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationGuard")
            .field("key", &self.key)
            .finish()
    }
}
