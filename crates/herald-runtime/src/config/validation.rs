//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{HeraldConfig, LogOutput, LoggingConfig, QueueConfig, StorageConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &HeraldConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_storage_config(&config.storage)?;
    validate_queue_config(&config.queue)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    for module in logging.filters.keys() {
        if module.trim().is_empty() || module.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter module name: {module:?}"
            )));
        }
    }

    Ok(())
}

fn validate_storage_config(storage: &StorageConfig) -> ConfigResult<()> {
    if let Some(path) = &storage.path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::validation("Storage path cannot be empty"));
        }
    }
    Ok(())
}

fn validate_queue_config(queue: &QueueConfig) -> ConfigResult<()> {
    if queue.key.trim().is_empty() {
        return Err(ConfigError::missing_field("queue.key"));
    }

    if queue.max_pending == Some(0) {
        return Err(ConfigError::validation(
            "queue.max_pending must be greater than 0 (leave unset for unbounded)",
        ));
    }

    Ok(())
}
