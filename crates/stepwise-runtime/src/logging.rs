//! Logging setup on top of `tracing-subscriber`.
//!
//! ```rust,ignore
//! use stepwise_runtime::config::load_config;
//! use stepwise_runtime::logging;
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! Or by hand:
//!
//! ```rust,ignore
//! use stepwise_runtime::config::{LogLevel, SpanEventConfig};
//! use stepwise_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .target("stepwise_framework", LogLevel::Debug)
//!     .span_events(SpanEventConfig::LIFECYCLE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

const DEFAULT_LOG_FILE: &str = "stepwise.log";

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    LoggingBuilder::from_config(config).init();
}

/// A builder for the global `tracing` subscriber, seeded from a
/// [`LoggingConfig`].
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    config: LoggingConfig,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Sets the level for one target, e.g. `stepwise_framework`.
    pub fn target(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.config.filters.insert(target.into(), level);
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.config.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    /// Logs to `path`, switching output to [`LogOutput::File`].
    pub fn file(mut self, path: impl Into<PathBuf>, rotation: LogRotation) -> Self {
        self.config.output = LogOutput::File;
        self.config.file_path = Some(path.into());
        self.config.rotation = rotation;
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.config.thread_ids = enabled;
        self
    }

    /// Includes source file and line in every record.
    pub fn file_location(mut self, enabled: bool) -> Self {
        self.config.file_location = enabled;
        self
    }

    /// `RUST_LOG` wins over the configured base level. Per-target levels are
    /// added on top of either.
    fn build_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.level.as_str()));

        for (target, level) in &self.config.filters {
            match format!("{target}={level}").parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring log filter for {target:?}: {e}"),
            }
        }

        filter
    }

    fn file_appender(&self, path: &Path) -> RollingFileAppender {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path.file_name().unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE));
        match self.config.rotation {
            LogRotation::Never => rolling::never(dir, name),
            LogRotation::Hourly => rolling::hourly(dir, name),
            LogRotation::Daily => rolling::daily(dir, name),
        }
    }

    /// Installs the subscriber, ignoring failure.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber.
    ///
    /// Fails if a global subscriber is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        let spans = fmt_span(self.config.span_events);
        let threads = self.config.thread_ids;
        let location = self.config.file_location;

        #[cfg(not(feature = "json-log"))]
        let format = match self.config.format {
            LogFormat::Json => {
                eprintln!("JSON log format requires the `json-log` feature, using full format");
                LogFormat::Full
            }
            other => other,
        };
        #[cfg(feature = "json-log")]
        let format = self.config.format;

        macro_rules! configure_layer {
            ($layer:expr) => {
                $layer
                    .with_span_events(spans.clone())
                    .with_thread_ids(threads)
                    .with_file(location)
                    .with_line_number(location)
            };
        }

        macro_rules! install {
            ($writer:expr) => {{
                let registry = tracing_subscriber::registry().with(filter);
                match format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => registry
                        .with(configure_layer!(fmt::layer().json().with_writer($writer)))
                        .try_init(),
                    LogFormat::Compact => registry
                        .with(configure_layer!(fmt::layer().compact().with_writer($writer)))
                        .try_init(),
                    LogFormat::Pretty => registry
                        .with(configure_layer!(fmt::layer().pretty().with_writer($writer)))
                        .try_init(),
                    _ => registry
                        .with(configure_layer!(fmt::layer().with_writer($writer)))
                        .try_init(),
                }
            }};
        }

        match (self.config.output, self.config.file_path.as_deref()) {
            (LogOutput::Stdout, _) => install!(std::io::stdout),
            (LogOutput::Stderr, _) => install!(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                let appender = self.file_appender(path);
                install!(appender)
            }
            (LogOutput::File, None) => {
                let result = install!(std::io::stdout);
                warn!("File output requested but no file path configured, logging to stdout");
                result
            }
        }
    }
}

fn fmt_span(events: SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_config() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            ..Default::default()
        };

        let builder = LoggingBuilder::from_config(&config)
            .target("stepwise_framework", LogLevel::Trace)
            .file("logs/bot.log", LogRotation::Daily)
            .thread_ids(true);

        assert_eq!(builder.config.level, LogLevel::Debug);
        assert_eq!(builder.config.output, LogOutput::File);
        assert_eq!(builder.config.file_path, Some(PathBuf::from("logs/bot.log")));
        assert_eq!(builder.config.rotation, LogRotation::Daily);
        assert!(builder.config.thread_ids);
        assert_eq!(
            builder.config.filters.get("stepwise_framework"),
            Some(&LogLevel::Trace)
        );
    }

    #[test]
    fn test_span_event_flags() {
        assert_eq!(
            fmt_span(SpanEventConfig::LIFECYCLE),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        assert_eq!(fmt_span(SpanEventConfig::NONE), FmtSpan::NONE);
    }
}
