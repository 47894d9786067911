//! Process-level entry point.
//!
//! ```rust,ignore
//! use stepwise_runtime::StepwiseRuntime;
//!
//! // Loads stepwise.toml from the current directory, if any
//! let runtime = StepwiseRuntime::new()
//!     .route(on_command("start").handler(start))
//!     .step("ask_phone", ask_phone);
//!
//! // Runs until the stream ends, Ctrl+C or SIGTERM
//! let report = runtime.run(events, client).await?;
//! ```

use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::Stream;
use stepwise_core::{BoxedClient, BoxedEvent};
use stepwise_framework::{
    ContinuationStore, Dispatcher, Handler, Route, RouteTable, StepId, StepRegistry, cancel_route,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, StepwiseConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::governor::{Governor, ShutdownReport};
use crate::logging;
use crate::metrics::{Metrics, MetricsSnapshot};

/// Owns the configuration, routes and steps, and runs them under a
/// [`Governor`].
pub struct StepwiseRuntime {
    config: StepwiseConfig,
    routes: RouteTable,
    steps: StepRegistry,
    builtin_cancel: bool,
    metrics: Arc<Metrics>,
    running: AtomicBool,
}

impl StepwiseRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory, falling back to defaults if loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                StepwiseConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime and installs logging from `config`.
    ///
    /// The configuration is validated when the runtime starts.
    pub fn from_config(config: &StepwiseConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            max_workers = config.governor.max_workers,
            continuation_timeout_secs = config.continuations.timeout_secs,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            routes: RouteTable::new(),
            steps: StepRegistry::new(),
            builtin_cancel: true,
            metrics: Metrics::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StepwiseConfig {
        &self.config
    }

    /// Appends a route. Routes run in the order they are added.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.add(route);
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Registers a continuation step.
    pub fn step<H: Handler>(mut self, id: impl Into<StepId>, handler: H) -> Self {
        self.steps.register(id, handler);
        self
    }

    /// Leaves out the built-in cancel button route, which is otherwise
    /// placed ahead of all user routes.
    pub fn without_cancel_route(mut self) -> Self {
        self.builtin_cancel = false;
        self
    }

    /// Number of routes that will be dispatched, including the built-in one.
    pub fn route_count(&self) -> usize {
        self.routes.len() + usize::from(self.builtin_cancel)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Metrics of the current or last run.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Validates the configuration and assembles a governor over the
    /// registered routes and steps.
    pub fn governor(&self) -> RuntimeResult<Governor> {
        validate_config(&self.config)?;

        let mut routes = RouteTable::new();
        if self.builtin_cancel {
            routes.add(cancel_route());
        }
        routes.extend(self.routes.iter().cloned());

        let store = ContinuationStore::new(
            Arc::new(self.steps.clone()),
            self.config.continuations.timeout(),
        );
        let dispatcher = Dispatcher::new(routes, Arc::new(store));

        Ok(Governor::new(
            dispatcher,
            self.config.governor.clone(),
            self.config.continuations.clone(),
        )
        .with_metrics(Arc::clone(&self.metrics)))
    }

    /// Processes `events` until the stream ends or Ctrl+C / SIGTERM arrives.
    pub async fn run<S>(&self, events: S, client: BoxedClient) -> RuntimeResult<ShutdownReport>
    where
        S: Stream<Item = BoxedEvent>,
    {
        info!("Stepwise runtime is now running. Press Ctrl+C to stop.");
        self.run_until(events, client, shutdown_signal()).await
    }

    /// Processes `events` until the stream ends or `shutdown` completes.
    pub async fn run_until<S, F>(
        &self,
        events: S,
        client: BoxedClient,
        shutdown: F,
    ) -> RuntimeResult<ShutdownReport>
    where
        S: Stream<Item = BoxedEvent>,
        F: Future<Output = ()>,
    {
        let governor = self.governor()?;
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Err(RuntimeError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let mut run = pin!(governor.run(events, client, token.clone()));

        let report = tokio::select! {
            report = &mut run => report,
            () = shutdown => {
                token.cancel();
                run.await
            }
        };

        self.running.store(false, Ordering::Release);
        info!(drained = report.drained, "Runtime stopped");
        Ok(report)
    }
}

impl Default for StepwiseRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes on Ctrl+C or, on Unix, SIGTERM.
///
/// If no signal can be registered the future never completes.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => match result {
                        Ok(()) => info!("Received Ctrl+C, shutting down"),
                        Err(e) => {
                            error!(error = %e, "Failed to listen for Ctrl+C, waiting for SIGTERM only");
                            sigterm.recv().await;
                            info!("Received SIGTERM, shutting down");
                        }
                    },
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C, shutdown signals disabled");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a [`StepwiseRuntime`] from a customised [`ConfigLoader`].
///
/// ```rust,ignore
/// let runtime = StepwiseRuntime::builder()
///     .config_file("deploy/stepwise.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: StepwiseConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<StepwiseRuntime> {
        let config = self.config_loader.load()?;
        Ok(StepwiseRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
