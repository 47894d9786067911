//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ContinuationConfig, GovernorConfig, LogOutput, LoggingConfig, StepwiseConfig};

/// Validates the entire configuration.
///
/// Log levels are not checked here: unknown names already fail to parse.
pub fn validate_config(config: &StepwiseConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_governor_config(&config.governor)?;
    validate_continuation_config(&config.continuations)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File {
        match &logging.file_path {
            None => return Err(ConfigError::MissingField("logging.file_path")),
            Some(path) if path.file_name().is_none() => {
                return Err(ConfigError::invalid(
                    "logging.file_path",
                    format!("{} has no file name", path.display()),
                ));
            }
            Some(_) => {}
        }
    }

    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "logging.filters",
                format!("{target:?} is not a target name"),
            ));
        }
    }

    Ok(())
}

fn validate_governor_config(governor: &GovernorConfig) -> ConfigResult<()> {
    if governor.max_workers == 0 {
        return Err(ConfigError::invalid("governor.max_workers", "must be greater than 0"));
    }

    if governor.max_workers > tokio::sync::Semaphore::MAX_PERMITS {
        return Err(ConfigError::invalid(
            "governor.max_workers",
            format!("must not exceed {}", tokio::sync::Semaphore::MAX_PERMITS),
        ));
    }

    if governor.max_workers.saturating_add(governor.max_queued) > tokio::sync::Semaphore::MAX_PERMITS {
        return Err(ConfigError::invalid(
            "governor.max_queued",
            format!(
                "max_workers + max_queued must not exceed {}",
                tokio::sync::Semaphore::MAX_PERMITS
            ),
        ));
    }

    if governor.event_timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "governor.event_timeout_secs",
            "must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_continuation_config(continuations: &ContinuationConfig) -> ConfigResult<()> {
    if continuations.timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "continuations.timeout_secs",
            "must be greater than 0",
        ));
    }

    Ok(())
}
