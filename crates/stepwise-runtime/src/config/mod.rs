//! Configuration module for the Stepwise runtime.
//!
//! This module provides TOML-based configuration loading and validation for
//! logging, the concurrency governor, and continuation expiry.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ContinuationConfig, GovernorConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, SpanEventConfig, StepwiseConfig,
};
pub use validation::validate_config;
