//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepwiseConfig {
    /// Logging settings.
    pub logging: LoggingConfig,

    /// Concurrency governor settings.
    pub governor: GovernorConfig,

    /// Continuation expiry settings.
    pub continuations: ContinuationConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity. Unknown names are rejected when the configuration is parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` without it.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Write to `logging.file_path`.
    File,
}

/// Rotation policy for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEventConfig {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close only. Each dispatched event then logs one line when
    /// it starts and one, with its busy/idle time, when it finishes.
    pub const LIFECYCLE: Self = Self {
        close: true,
        new: true,
        ..Self::NONE
    };
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level. `RUST_LOG` takes precedence when set.
    pub level: LogLevel,

    pub format: LogFormat,

    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    pub file_path: Option<PathBuf>,

    pub rotation: LogRotation,

    /// Include thread ids.
    pub thread_ids: bool,

    /// Include source file and line.
    pub file_location: bool,

    pub span_events: SpanEventConfig,

    /// Per-target levels, e.g. `stepwise_framework = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

// =============================================================================
// Governor
// =============================================================================

/// Concurrency governor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Maximum number of events processed at once.
    pub max_workers: usize,

    /// Admitted events allowed to wait, beyond the running ones, for their
    /// conversation or a worker. The event stream is not polled while full.
    pub max_queued: usize,

    /// Per-event deadline in seconds.
    pub event_timeout_secs: u64,

    /// How long shutdown waits for in-flight events, in seconds.
    pub shutdown_grace_secs: u64,

    /// Interval between periodic metrics summaries in seconds. 0 disables them.
    pub metrics_interval_secs: u64,

    /// Log every admitted event at debug level.
    pub log_events: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_workers: 50,
            max_queued: 200,
            event_timeout_secs: 30,
            shutdown_grace_secs: 5,
            metrics_interval_secs: 12 * 60 * 60,
            log_events: false,
        }
    }
}

impl GovernorConfig {
    /// Running plus queued events.
    pub fn admission_limit(&self) -> usize {
        self.max_workers
            .max(1)
            .saturating_add(self.max_queued)
            .min(tokio::sync::Semaphore::MAX_PERMITS)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_secs > 0).then(|| Duration::from_secs(self.metrics_interval_secs))
    }
}

// =============================================================================
// Continuations
// =============================================================================

/// Continuation expiry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Idle time after which a pending continuation expires, in seconds.
    pub timeout_secs: u64,

    /// Sweep expired continuations after every processed event.
    pub sweep_on_dispatch: bool,

    /// Interval of the background sweeper in seconds. 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: stepwise_framework::DEFAULT_CONTINUATION_TIMEOUT.as_secs(),
            sweep_on_dispatch: true,
            sweep_interval_secs: 60,
        }
    }
}

impl ContinuationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
