//! Stepwise Runtime - process layer for the Stepwise conversation engine.
//!
//! This crate provides:
//! - The [`Governor`], which runs events through the dispatcher with a
//!   concurrency cap, per-event deadlines, panic isolation and graceful
//!   shutdown
//! - [`StepwiseRuntime`], which owns routes, steps and configuration and
//!   runs them until the event stream ends or a shutdown signal arrives
//! - Layered configuration (`stepwise.toml`, `STEPWISE_*` environment variables)
//! - Logging setup and processing metrics
//!
//! ```ignore
//! use stepwise_runtime::StepwiseRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = StepwiseRuntime::new()
//!         .route(on_command("start").handler(start))
//!         .step("ask_phone", ask_phone);
//!
//!     runtime.run(my_events(), my_client()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod governor;
pub mod logging;
pub mod metrics;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, StepwiseConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use governor::{Governor, ShutdownReport};
pub use logging::LoggingBuilder;
pub use metrics::{ErrorCategory, Metrics, MetricsSnapshot};
pub use runtime::{RuntimeBuilder, StepwiseRuntime, shutdown_signal};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for application code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
