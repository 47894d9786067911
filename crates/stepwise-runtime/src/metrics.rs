//! Processing metrics kept by the governor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// What went wrong while processing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A stateless route handler returned an error.
    RouteError,
    /// A continuation step failed or could not be resumed.
    ContinuationError,
    /// A handler panicked.
    Panic,
    /// The event outlived its deadline.
    Timeout,
    /// An expiry notice could not be delivered during a sweep.
    ExpirySweepError,
    /// A cancellation notice could not be delivered.
    NoticeError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteError => "route_error",
            Self::ContinuationError => "continuation_error",
            Self::Panic => "panic",
            Self::Timeout => "timeout",
            Self::ExpirySweepError => "expiry_sweep_error",
            Self::NoticeError => "notice_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared counters, updated by every task.
#[derive(Debug, Default)]
pub struct Metrics {
    total: AtomicU64,
    failed: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    errors: Mutex<BTreeMap<ErrorCategory, u64>>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks one event as in flight until the guard drops.
    pub fn track_in_flight(self: &Arc<Self>) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlightGuard {
            metrics: Arc::clone(self),
        }
    }

    /// Records one finished event.
    pub fn record_event(&self, elapsed: Duration, failed: bool) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn record_error(&self, category: ErrorCategory) {
        self.record_errors(category, 1);
    }

    pub fn record_errors(&self, category: ErrorCategory, count: u64) {
        if count == 0 {
            return;
        }
        *self.errors.lock().entry(category).or_default() += count;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let total_nanos = self.total_nanos.load(Ordering::Relaxed);
        let avg_processing = if total == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(total_nanos / total)
        };

        MetricsSnapshot {
            total_events: total,
            failed_events: self.failed.load(Ordering::Relaxed),
            avg_processing,
            max_processing: Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed)),
            in_flight: self.in_flight.load(Ordering::Acquire),
            max_in_flight: self.max_in_flight.load(Ordering::Acquire),
            errors_by_category: self.errors.lock().clone(),
        }
    }
}

/// Decrements the in-flight count on drop, including on panic.
#[derive(Debug)]
pub struct InFlightGuard {
    metrics: Arc<Metrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_events: u64,
    pub failed_events: u64,
    pub avg_processing: Duration,
    pub max_processing: Duration,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
}

impl MetricsSnapshot {
    pub fn errors(&self, category: ErrorCategory) -> u64 {
        self.errors_by_category.get(&category).copied().unwrap_or(0)
    }

    /// Writes the snapshot as one structured `info` line.
    pub fn log_summary(&self, label: &str) {
        let errors = self
            .errors_by_category
            .iter()
            .map(|(category, count)| format!("{category}={count}"))
            .collect::<Vec<_>>()
            .join(",");
        info!(
            total = self.total_events,
            failed = self.failed_events,
            avg_ms = self.avg_processing.as_millis() as u64,
            max_ms = self.max_processing.as_millis() as u64,
            in_flight = self.in_flight,
            max_in_flight = self.max_in_flight,
            errors = %errors,
            "{label}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record_event(Duration::from_millis(10), false);
        metrics.record_event(Duration::from_millis(30), true);
        metrics.record_error(ErrorCategory::RouteError);
        metrics.record_errors(ErrorCategory::ExpirySweepError, 2);
        metrics.record_errors(ErrorCategory::Panic, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_events, 2);
        assert_eq!(snapshot.failed_events, 1);
        assert_eq!(snapshot.avg_processing, Duration::from_millis(20));
        assert_eq!(snapshot.max_processing, Duration::from_millis(30));
        assert_eq!(snapshot.errors(ErrorCategory::RouteError), 1);
        assert_eq!(snapshot.errors(ErrorCategory::ExpirySweepError), 2);
        assert!(!snapshot.errors_by_category.contains_key(&ErrorCategory::Panic));
    }

    #[test]
    fn test_in_flight_high_water_mark() {
        let metrics = Metrics::new();
        let a = metrics.track_in_flight();
        let b = metrics.track_in_flight();
        assert_eq!(metrics.in_flight(), 2);
        drop(a);
        let c = metrics.track_in_flight();
        drop(b);
        drop(c);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.max_in_flight, 2);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }
}
