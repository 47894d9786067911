//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or validating a [`StepwiseConfig`](super::StepwiseConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("configuration file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// The file extension names no enabled format.
    #[error("cannot read {}: unsupported or disabled format", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The merged sources do not fit the schema (unknown log level, wrong type).
    #[error("malformed configuration: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A value required by another setting is absent.
    #[error("`{0}` is required")]
    MissingField(&'static str),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The dotted key this error is about, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } | Self::MissingField(field) => Some(*field),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
