//! Continuation store.
//!
//! The single authoritative place to register, resume and expire
//! per-conversation continuations. At most one continuation exists per
//! [`ConversationKey`]; registering again replaces it wholesale.
//!
//! Every entry carries a generation number drawn from a store-wide counter.
//! The dispatcher snapshots the generation before running routes and only
//! resumes the entry if that same generation is still pending afterwards, so
//! a continuation registered or cleared by a route during the same event is
//! never resumed by that event. The sweeper uses the same number to avoid
//! removing an entry that was re-registered after it was found expired.
//!
//! ```text
//! [none] --register--> [pending] --resume, handler finishes--> [none]
//!                      [pending] --resume, handler re-registers--> [pending]
//!                      [pending] --cancel / claimed by a route--> [none]
//!                      [pending] --timeout, swept--> [none]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stepwise_core::{Client, ConversationKey, EventKind, OutgoingMessage};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::context::HandlerContext;
use crate::error::ContinuationError;
use crate::params::Params;
use crate::step::{StepId, StepRegistry};

/// Reference expiry window for pending continuations.
pub const DEFAULT_CONTINUATION_TIMEOUT: Duration = Duration::from_secs(3600);

// ============================================================================
// Continuation
// ============================================================================

/// A deferred step: which handler runs next, and with what state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    pub step: StepId,
    pub params: Params,
    /// Shown to the user if the continuation is removed without completing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_message: Option<String>,
}

impl Continuation {
    pub fn new(step: impl Into<StepId>, params: Params) -> Self {
        Self {
            step: step.into(),
            params,
            cancellation_message: None,
        }
    }

    pub fn cancellation_message(mut self, text: impl Into<String>) -> Self {
        self.cancellation_message = Some(text.into());
        self
    }
}

/// A continuation as stored: the continuation plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct PendingContinuation {
    pub continuation: Continuation,
    pub created_at: Instant,
    pub generation: u64,
}

/// What [`ContinuationStore::resume`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The event has no key or is an interaction; continuations do not apply.
    NotApplicable,
    /// Nothing was pending for the key.
    Idle,
    /// The pending entry changed while routes ran for this event.
    Superseded,
    /// The pending entry was past its timeout and was removed instead.
    Expired,
    /// The step ran to completion.
    Resumed(StepId),
}

/// Result of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed.
    pub removed: usize,
    /// Cancellation notices that could not be delivered.
    pub failed_notices: usize,
}

// ============================================================================
// Continuation Store
// ============================================================================

/// Concurrency-safe map from conversation to its pending continuation.
///
/// All map operations are synchronous and short; the lock is never held
/// across an await, so step handlers may freely call back into the store.
pub struct ContinuationStore {
    entries: Mutex<HashMap<ConversationKey, PendingContinuation>>,
    steps: Arc<StepRegistry>,
    timeout: Duration,
    next_generation: AtomicU64,
}

impl ContinuationStore {
    pub fn new(steps: Arc<StepRegistry>, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            steps,
            timeout,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn steps(&self) -> &Arc<StepRegistry> {
        &self.steps
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers `continuation` for `key`, replacing whatever was pending.
    ///
    /// Fails if the step is not in the registry.
    pub fn register(
        &self,
        key: ConversationKey,
        continuation: Continuation,
    ) -> Result<(), ContinuationError> {
        self.register_at(key, continuation, Instant::now())
    }

    /// Like [`register`](Self::register) with an explicit creation time.
    pub fn register_at(
        &self,
        key: ConversationKey,
        continuation: Continuation,
        created_at: Instant,
    ) -> Result<(), ContinuationError> {
        if !self.steps.contains(&continuation.step) {
            return Err(ContinuationError::UnknownStep(continuation.step));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let step = continuation.step.clone();
        let replaced = self
            .entries
            .lock()
            .insert(
                key,
                PendingContinuation {
                    continuation,
                    created_at,
                    generation,
                },
            )
            .is_some();

        debug!(key = %key, step = %step, generation, replaced, "Continuation registered");
        Ok(())
    }

    /// Returns a snapshot of the pending continuation for `key`.
    pub fn get(&self, key: &ConversationKey) -> Option<PendingContinuation> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Removes the entry for `key` without notifying anyone.
    ///
    /// Returns whether an entry was removed.
    pub fn forget(&self, key: &ConversationKey) -> bool {
        let removed = self.entries.lock().remove(key);
        if let Some(pending) = &removed {
            debug!(key = %key, step = %pending.continuation.step, "Continuation cleared");
        }
        removed.is_some()
    }

    /// Removes the entry for `key`, optionally sending its cancellation message.
    ///
    /// The entry is taken out of the map before the notice is sent, so two
    /// concurrent removals never both notify. Removing an absent key is a
    /// no-op that returns `Ok(false)`. If the notice fails the entry stays
    /// removed and the error is returned.
    pub async fn remove(
        &self,
        key: &ConversationKey,
        client: &dyn Client,
        notify: bool,
    ) -> Result<bool, ContinuationError> {
        let removed = self.entries.lock().remove(key);
        let Some(pending) = removed else {
            trace!(key = %key, "No continuation to remove");
            return Ok(false);
        };

        debug!(key = %key, step = %pending.continuation.step, notify, "Continuation removed");
        if notify {
            send_notice(*key, &pending, client).await?;
        }
        Ok(true)
    }

    /// Resumes the pending continuation for the event in `ctx`.
    ///
    /// Only plain messages resume. A command while something is pending
    /// yields [`ContinuationError::CommandBypass`]; interactions and keyless
    /// events yield [`ResumeOutcome::NotApplicable`]. The entry is not removed
    /// here: the step either calls `finish`, re-registers, or leaves it as is.
    pub async fn resume(
        &self,
        ctx: Arc<HandlerContext>,
    ) -> Result<ResumeOutcome, ContinuationError> {
        let snapshot = ctx
            .key()
            .and_then(|key| self.get(&key))
            .map(|pending| pending.generation);
        self.resume_snapshot(ctx, snapshot).await
    }

    /// Resumes only if the entry pending now is the one seen as `snapshot`.
    pub(crate) async fn resume_snapshot(
        &self,
        ctx: Arc<HandlerContext>,
        snapshot: Option<u64>,
    ) -> Result<ResumeOutcome, ContinuationError> {
        let Some(key) = ctx.key() else {
            return Ok(ResumeOutcome::NotApplicable);
        };

        match ctx.event().kind() {
            EventKind::Interaction => return Ok(ResumeOutcome::NotApplicable),
            EventKind::Command => {
                return if snapshot.is_some() && self.contains(&key) {
                    Err(ContinuationError::CommandBypass { key })
                } else {
                    Ok(ResumeOutcome::Idle)
                };
            }
            EventKind::Message => {}
        }

        let pending = match (snapshot, self.get(&key)) {
            (None, None) => return Ok(ResumeOutcome::Idle),
            (Some(_), None) => {
                debug!(key = %key, "Pending continuation cleared during dispatch");
                return Ok(ResumeOutcome::Idle);
            }
            (Some(expected), Some(pending)) if pending.generation == expected => pending,
            _ => {
                debug!(key = %key, "Pending continuation changed during dispatch, not resuming");
                return Ok(ResumeOutcome::Superseded);
            }
        };

        if self.is_expired(&pending, Instant::now()) {
            if let Some(expired) = self.take_generation(&key, pending.generation) {
                info!(key = %key, step = %expired.continuation.step, "Continuation expired before resume");
                send_notice(key, &expired, ctx.client().as_ref()).await?;
            }
            return Ok(ResumeOutcome::Expired);
        }

        let step = pending.continuation.step;
        let handler = self
            .steps
            .get(&step)
            .cloned()
            .ok_or_else(|| ContinuationError::UnknownStep(step.clone()))?;

        debug!(key = %key, step = %step, "Resuming continuation");
        handler
            .call(ctx, pending.continuation.params)
            .await
            .map_err(|source| ContinuationError::Handler {
                step: step.clone(),
                source,
            })?;

        Ok(ResumeOutcome::Resumed(step))
    }

    /// Removes every entry older than the timeout as of `now`, sending each
    /// one's cancellation notice.
    ///
    /// A failed notice is logged and counted; the sweep carries on with the
    /// remaining entries.
    pub async fn sweep_expired(&self, now: Instant, client: &dyn Client) -> SweepReport {
        let expired: Vec<(ConversationKey, PendingContinuation)> = {
            let mut entries = self.entries.lock();
            let keys: Vec<ConversationKey> = entries
                .iter()
                .filter(|(_, pending)| self.is_expired(pending, now))
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key).map(|pending| (key, pending)))
                .collect()
        };

        let mut report = SweepReport {
            removed: expired.len(),
            failed_notices: 0,
        };

        for (key, pending) in &expired {
            if let Err(error) = send_notice(*key, pending, client).await {
                report.failed_notices += 1;
                warn!(key = %key, error = %error, "Expiry notice failed, continuing sweep");
            }
        }

        if report.removed > 0 {
            info!(
                removed = report.removed,
                failed_notices = report.failed_notices,
                "Expired continuations swept"
            );
        }
        report
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn is_expired(&self, pending: &PendingContinuation, now: Instant) -> bool {
        now.saturating_duration_since(pending.created_at) > self.timeout
    }

    fn take_generation(&self, key: &ConversationKey, generation: u64) -> Option<PendingContinuation> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(pending) if pending.generation == generation => entries.remove(key),
            _ => None,
        }
    }
}

impl fmt::Debug for ContinuationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationStore")
            .field("pending", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn send_notice(
    key: ConversationKey,
    pending: &PendingContinuation,
    client: &dyn Client,
) -> Result<(), ContinuationError> {
    let Some(text) = pending
        .continuation
        .cancellation_message
        .as_deref()
        .filter(|text| !text.is_empty())
    else {
        return Ok(());
    };

    client
        .send(key.chat_id, OutgoingMessage::text(text))
        .await
        .map(|_| ())
        .map_err(|source| ContinuationError::Notice { key, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use stepwise_core::testing::RecordingClient;
    use stepwise_core::{BoxedClient, BoxedEvent, Update};
    use tokio_util::sync::CancellationToken;

    use crate::error::HandlerResult;

    const KEY: ConversationKey = ConversationKey::new(1, 1);

    async fn noop(_ctx: Arc<HandlerContext>, _params: Params) -> HandlerResult {
        Ok(())
    }

    fn store() -> Arc<ContinuationStore> {
        let steps = StepRegistry::new()
            .with("name", noop)
            .with("phone", noop)
            .with("broken", |_ctx: Arc<HandlerContext>, _params: Params| async {
                HandlerResult::Err(anyhow::anyhow!("database unavailable"))
            });
        Arc::new(ContinuationStore::new(
            Arc::new(steps),
            DEFAULT_CONTINUATION_TIMEOUT,
        ))
    }

    fn ctx(store: &Arc<ContinuationStore>, client: BoxedClient, update: Update) -> Arc<HandlerContext> {
        Arc::new(HandlerContext::new(
            BoxedEvent::new(update),
            client,
            Arc::clone(store),
            CancellationToken::new(),
            None,
        ))
    }

    #[test]
    fn test_register_overwrites() {
        let store = store();
        store
            .register(KEY, Continuation::new("name", Params::new().with("step", "name")))
            .unwrap();
        store
            .register(KEY, Continuation::new("phone", Params::new().with("step", "phone")))
            .unwrap();

        assert_eq!(store.len(), 1);
        let pending = store.get(&KEY).unwrap();
        assert_eq!(pending.continuation.step.as_str(), "phone");
        assert_eq!(pending.continuation.params.get_str("step"), Some("phone"));
    }

    #[test]
    fn test_register_unknown_step_fails() {
        let store = store();
        let err = store
            .register(KEY, Continuation::new("email", Params::new()))
            .unwrap_err();
        assert!(matches!(err, ContinuationError::UnknownStep(_)));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_leave_one_consistent_entry() {
        let store = store();

        let tasks: Vec<_> = (0..64u64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let step = if i % 2 == 0 { "name" } else { "phone" };
                    store
                        .register(KEY, Continuation::new(step, Params::new().with("i", i).with("step", step)))
                        .unwrap();
                    if i % 7 == 0 {
                        store.forget(&KEY);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(store.len() <= 1);
        if let Some(pending) = store.get(&KEY) {
            let step: String = pending.continuation.params.require("step").unwrap();
            assert_eq!(step, pending.continuation.step.as_str());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resume_remove_register_notify_once() {
        let notices = Arc::new(AtomicU64::new(0));
        let advance = |next: &'static str| {
            let notices = Arc::clone(&notices);
            move |ctx: Arc<HandlerContext>, _params: Params| {
                let n = notices.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::task::yield_now().await;
                    ctx.continue_with(
                        Continuation::new(next, Params::new().with("step", next))
                            .cancellation_message(format!("resumed-{n}")),
                    )?;
                    HandlerResult::Ok(())
                }
            }
        };
        let steps = StepRegistry::new()
            .with("name", advance("phone"))
            .with("phone", advance("name"));
        let store = Arc::new(ContinuationStore::new(Arc::new(steps), DEFAULT_CONTINUATION_TIMEOUT));
        let client = RecordingClient::new();

        let tasks: Vec<_> = (0..96i64)
            .map(|i| {
                let store = Arc::clone(&store);
                let client = Arc::clone(&client);
                tokio::spawn(async move {
                    match i % 3 {
                        0 => {
                            let ctx = ctx(&store, client, Update::message(i, 1, 1, "x"));
                            let _ = store.resume(ctx).await;
                        }
                        1 => {
                            store.remove(&KEY, client.as_ref(), true).await.unwrap();
                        }
                        _ => store
                            .register(
                                KEY,
                                Continuation::new("name", Params::new().with("step", "name"))
                                    .cancellation_message(format!("registered-{i}")),
                            )
                            .unwrap(),
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(store.len() <= 1);
        if let Some(pending) = store.get(&KEY) {
            let step: String = pending.continuation.params.require("step").unwrap();
            assert_eq!(step, pending.continuation.step.as_str());
        }

        let sent = client.sent_texts();
        let mut unique = sent.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), sent.len(), "a notice was sent twice: {sent:?}");
    }

    #[tokio::test]
    async fn test_remove_twice_sends_one_notice() {
        let store = store();
        let client = RecordingClient::new();
        store
            .register(
                KEY,
                Continuation::new("name", Params::new()).cancellation_message("flow cancelled"),
            )
            .unwrap();

        assert!(store.remove(&KEY, client.as_ref(), true).await.unwrap());
        assert!(!store.remove(&KEY, client.as_ref(), true).await.unwrap());

        assert_eq!(client.sent_texts(), vec!["flow cancelled"]);
        assert!(store.get(&KEY).is_none());
    }

    #[tokio::test]
    async fn test_remove_without_notice_is_silent() {
        let store = store();
        let client = RecordingClient::new();
        store
            .register(KEY, Continuation::new("name", Params::new()).cancellation_message("bye"))
            .unwrap();

        assert!(store.remove(&KEY, client.as_ref(), false).await.unwrap());
        assert_eq!(client.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_window() {
        let store = store();
        let client = RecordingClient::new();
        let window = store.timeout();
        let created = Instant::now();
        store
            .register_at(
                KEY,
                Continuation::new("name", Params::new()).cancellation_message("timed out"),
                created,
            )
            .unwrap();

        let early = store
            .sweep_expired(created + window - Duration::from_millis(1), client.as_ref())
            .await;
        assert_eq!(early.removed, 0);
        assert!(store.contains(&KEY));

        let late = store
            .sweep_expired(created + window + Duration::from_millis(1), client.as_ref())
            .await;
        assert_eq!(late.removed, 1);
        assert!(!store.contains(&KEY));
        assert_eq!(client.sent_texts(), vec!["timed out"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_continues_after_notice_failure() {
        let store = store();
        let client = RecordingClient::new();
        client.fail_sends(true);
        let created = Instant::now();
        for user in 1..=3 {
            store
                .register_at(
                    ConversationKey::new(1, user),
                    Continuation::new("name", Params::new()).cancellation_message("expired"),
                    created,
                )
                .unwrap();
        }
        store
            .register_at(
                ConversationKey::new(2, 2),
                Continuation::new("name", Params::new()),
                created + store.timeout(),
            )
            .unwrap();

        let report = store
            .sweep_expired(created + store.timeout() + Duration::from_secs(1), client.as_ref())
            .await;

        assert_eq!(report.removed, 3);
        assert_eq!(report.failed_notices, 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_message_runs_step_with_params() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_step = Arc::clone(&seen);
        let steps = StepRegistry::new().with("name", move |ctx: Arc<HandlerContext>, params: Params| {
            let seen = Arc::clone(&seen_in_step);
            async move {
                assert_eq!(params.get_str("step"), Some("name"));
                assert_eq!(ctx.event().text(), Some("Alice"));
                seen.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        });
        let store = Arc::new(ContinuationStore::new(Arc::new(steps), DEFAULT_CONTINUATION_TIMEOUT));
        store
            .register(KEY, Continuation::new("name", Params::new().with("step", "name")))
            .unwrap();

        let outcome = store
            .resume(ctx(&store, RecordingClient::new(), Update::message(1, 1, 1, "Alice")))
            .await
            .unwrap();

        assert_eq!(outcome, ResumeOutcome::Resumed(StepId::from("name")));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        // Step did not finish or re-register, so the entry is still pending.
        assert!(store.contains(&KEY));
    }

    #[tokio::test]
    async fn test_command_bypasses_pending() {
        let store = store();
        store.register(KEY, Continuation::new("name", Params::new())).unwrap();

        let err = store
            .resume(ctx(&store, RecordingClient::new(), Update::message(1, 1, 1, "/start")))
            .await
            .unwrap_err();

        assert!(err.is_sentinel());
        assert!(store.contains(&KEY));
    }

    #[tokio::test]
    async fn test_non_message_and_idle_outcomes() {
        let store = store();
        let client: BoxedClient = RecordingClient::new();

        let idle = store
            .resume(ctx(&store, Arc::clone(&client), Update::message(1, 1, 1, "hi")))
            .await
            .unwrap();
        assert_eq!(idle, ResumeOutcome::Idle);

        store.register(KEY, Continuation::new("name", Params::new())).unwrap();
        let press = store
            .resume(ctx(&store, client, Update::interaction(2, 1, 1, 9, "menu")))
            .await
            .unwrap();
        assert_eq!(press, ResumeOutcome::NotApplicable);
    }

    #[tokio::test]
    async fn test_failed_step_leaves_entry_untouched() {
        let store = store();
        store.register(KEY, Continuation::new("broken", Params::new())).unwrap();
        let before = store.get(&KEY).unwrap().generation;

        let err = store
            .resume(ctx(&store, RecordingClient::new(), Update::message(1, 1, 1, "x")))
            .await
            .unwrap_err();

        assert!(matches!(err, ContinuationError::Handler { .. }));
        assert_eq!(store.get(&KEY).unwrap().generation, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_not_resumed() {
        let store = store();
        let client = RecordingClient::new();
        store
            .register(KEY, Continuation::new("name", Params::new()).cancellation_message("too late"))
            .unwrap();

        tokio::time::advance(store.timeout() + Duration::from_secs(1)).await;

        let outcome = store
            .resume(ctx(&store, client.clone(), Update::message(1, 1, 1, "Alice")))
            .await
            .unwrap();

        assert_eq!(outcome, ResumeOutcome::Expired);
        assert!(!store.contains(&KEY));
        assert_eq!(client.sent_texts(), vec!["too late"]);
    }
}
