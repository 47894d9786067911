//! Bounded-concurrency event processing.
//!
//! The [`Governor`] pulls events from a stream and runs each one through the
//! [`Dispatcher`] on its own task:
//!
//! ```text
//!  events ──► queue slot ──► spawn ──► conversation gate ──► worker permit
//!                                                                 │
//!        metrics, expiry sweep ◄── dispatch (deadline, catch_unwind)
//! ```
//!
//! At most `max_workers` events run at once. An event waits for its
//! conversation's gate before it takes a worker, so a burst from one user
//! queues behind that user's running event without starving other
//! conversations. Admitted events, running or queued, are capped at
//! `max_workers + max_queued`; past that the stream is not polled. The
//! deadline starts when the event gets its worker.
//!
//! When the shutdown token fires, admission stops, queued events are dropped,
//! every running handler sees its cancellation token fire, and the governor
//! waits up to the grace period for them to finish.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use stepwise_core::{BoxedClient, BoxedEvent};
use stepwise_framework::{ContinuationError, DispatchReport, Dispatcher, SweepReport};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{ContinuationConfig, GovernorConfig};
use crate::metrics::{ErrorCategory, Metrics, MetricsSnapshot};

/// How a [`Governor::run`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every admitted event finished before the governor returned.
    pub drained: bool,
    /// Events still running when the grace period ran out.
    pub abandoned: usize,
    /// Final metrics.
    pub metrics: MetricsSnapshot,
}

/// Runs events through a [`Dispatcher`] with a concurrency cap, per-event
/// deadlines, panic isolation and graceful shutdown.
#[derive(Debug)]
pub struct Governor {
    dispatcher: Arc<Dispatcher>,
    config: GovernorConfig,
    continuations: ContinuationConfig,
    metrics: Arc<Metrics>,
}

impl Governor {
    pub fn new(
        dispatcher: Dispatcher,
        config: GovernorConfig,
        continuations: ContinuationConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            config,
            continuations,
            metrics: Metrics::new(),
        }
    }

    /// Reports into an existing metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Processes `events` until the stream ends or `shutdown` fires.
    ///
    /// When the stream ends, every admitted event is awaited in full. When
    /// `shutdown` fires, in-flight events get `shutdown_grace` to finish;
    /// any still running afterwards are left behind and counted in
    /// [`ShutdownReport::abandoned`].
    pub async fn run<S>(
        &self,
        events: S,
        client: BoxedClient,
        shutdown: CancellationToken,
    ) -> ShutdownReport
    where
        S: Stream<Item = BoxedEvent>,
    {
        let mut events = pin!(events);
        let workers = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let admission = Arc::new(Semaphore::new(self.config.admission_limit()));
        let tracker = TaskTracker::new();
        let background = shutdown.child_token();

        self.spawn_background(&tracker, &client, &background);

        info!(
            max_workers = self.config.max_workers,
            max_queued = self.config.max_queued,
            event_timeout_secs = self.config.event_timeout_secs,
            "Governor started"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => event,
                    None => {
                        info!("Event stream ended");
                        break;
                    }
                },
            };

            let slot = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(event_name = event.event_name(), "Shutdown while waiting for admission, event dropped");
                    break;
                }
                permit = Arc::clone(&admission).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if self.config.log_events {
                debug!(
                    event_name = event.event_name(),
                    key = ?event.conversation_key(),
                    "Event admitted"
                );
            }

            tracker.spawn(self.process(
                event,
                client.clone(),
                shutdown.child_token(),
                slot,
                Arc::clone(&workers),
            ));
        }

        background.cancel();
        tracker.close();

        let drained = if shutdown.is_cancelled() {
            let grace = self.config.shutdown_grace();
            info!(
                in_flight = self.metrics.in_flight(),
                grace_secs = grace.as_secs(),
                "Shutdown requested, waiting for in-flight events"
            );
            tokio::time::timeout(grace, tracker.wait()).await.is_ok()
        } else {
            tracker.wait().await;
            true
        };

        let abandoned = if drained { 0 } else { self.metrics.in_flight() };
        if !drained {
            warn!(abandoned, "Shutdown grace period elapsed with events still running");
        }

        let metrics = self.metrics.snapshot();
        metrics.log_summary("Governor stopped");

        ShutdownReport {
            drained,
            abandoned,
            metrics,
        }
    }

    /// Builds the task for one admitted event.
    fn process(
        &self,
        event: BoxedEvent,
        client: BoxedClient,
        cancellation: CancellationToken,
        slot: OwnedSemaphorePermit,
        workers: Arc<Semaphore>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let dispatcher = Arc::clone(&self.dispatcher);
        let metrics = Arc::clone(&self.metrics);
        let timeout = self.config.event_timeout();
        let sweep_on_dispatch = self.continuations.sweep_on_dispatch;

        async move {
            let _slot = slot;
            let event_name = event.event_name();

            // Queued events hold no worker while their conversation is busy.
            let ready = async {
                let gate = dispatcher.acquire(&event).await;
                let worker = Arc::clone(&workers).acquire_owned().await.ok()?;
                Some((gate, worker))
            };
            let acquired = tokio::select! {
                biased;
                _ = cancellation.cancelled() => None,
                ready = ready => ready,
            };
            let Some((gate, _worker)) = acquired else {
                debug!(event_name, "Shutdown before a worker was free, queued event dropped");
                return;
            };

            let _in_flight = metrics.track_in_flight();
            let started = Instant::now();
            let deadline = started + timeout;

            let mut work = pin!(
                AssertUnwindSafe(dispatcher.dispatch_with(
                    gate,
                    event,
                    client.clone(),
                    cancellation.clone(),
                    Some(deadline),
                ))
                .catch_unwind()
            );

            let mut timed_out = false;
            let result = tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    cancellation.cancel();
                    warn!(
                        event_name,
                        timeout_secs = timeout.as_secs(),
                        "Event deadline elapsed, cancellation signalled"
                    );
                    work.await
                }
            };

            let mut errors = match &result {
                Ok(report) => report_errors(report),
                Err(payload) => {
                    error!(
                        event_name,
                        panic_msg = %panic_message(&**payload),
                        "Handler panicked, task recovered"
                    );
                    vec![ErrorCategory::Panic]
                }
            };
            let failed = !errors.is_empty();
            if timed_out {
                errors.push(ErrorCategory::Timeout);
            }

            let elapsed = started.elapsed();
            metrics.record_event(elapsed, failed);
            for category in errors {
                metrics.record_error(category);
            }
            debug!(event_name, elapsed_ms = elapsed.as_millis() as u64, failed, "Event processed");

            if sweep_on_dispatch {
                let report = dispatcher
                    .continuations()
                    .sweep_expired(Instant::now(), client.as_ref())
                    .await;
                record_sweep(&metrics, report);
            }
        }
    }

    fn spawn_background(
        &self,
        tracker: &TaskTracker,
        client: &BoxedClient,
        token: &CancellationToken,
    ) {
        if let Some(period) = self.continuations.sweep_interval() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let metrics = Arc::clone(&self.metrics);
            let client = client.clone();
            let token = token.clone();
            tracker.spawn(async move {
                let mut interval = ticker(period);
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            let report = dispatcher
                                .continuations()
                                .sweep_expired(Instant::now(), client.as_ref())
                                .await;
                            record_sweep(&metrics, report);
                        }
                    }
                }
            });
        }

        if let Some(period) = self.config.metrics_interval() {
            tracker.spawn(report_metrics(
                Arc::clone(&self.metrics),
                period,
                token.clone(),
                |snapshot| snapshot.log_summary("Processing metrics"),
            ));
        }
    }
}

/// Hands a snapshot to `emit` every `period` until `token` fires.
async fn report_metrics<F>(
    metrics: Arc<Metrics>,
    period: Duration,
    token: CancellationToken,
    mut emit: F,
) where
    F: FnMut(&MetricsSnapshot),
{
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => emit(&metrics.snapshot()),
        }
    }
}

/// An interval whose first tick is one period from now.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn report_errors(report: &DispatchReport) -> Vec<ErrorCategory> {
    let mut errors: Vec<ErrorCategory> = report
        .route_errors()
        .map(|_| ErrorCategory::RouteError)
        .collect();
    match report.continuation_error() {
        Some(ContinuationError::Notice { .. }) => errors.push(ErrorCategory::NoticeError),
        Some(_) => errors.push(ErrorCategory::ContinuationError),
        None => {}
    }
    errors
}

fn record_sweep(metrics: &Metrics, report: SweepReport) {
    metrics.record_errors(ErrorCategory::ExpirySweepError, report.failed_notices as u64);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
