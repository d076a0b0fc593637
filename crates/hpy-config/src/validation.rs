//! Configuration validation
//!
//! This module provides validation logic to ensure configuration values are
//! consistent and within the ranges the BLE stack and the ring accept.

use crate::{BackoffBand, ConfigError, ConfigResult, HpyConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    OutOfRange { field: String, value: i64, min: i64, max: i64 },
    InvalidSchedule { field: String, reason: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(
                f,
                "{} = {} is outside valid range ({}-{})",
                field, value, min, max
            ),
            Self::InvalidSchedule { field, reason } => {
                write!(f, "Invalid backoff schedule {}: {}", field, reason)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &HpyConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_ranges(config, &mut errors);
    validate_schedule("reconnect.schedule", &config.reconnect.schedule, &mut errors);
    validate_schedule(
        "reconnect.fw_schedule",
        &config.reconnect.fw_schedule,
        &mut errors,
    );
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn check_range(
    field: &str,
    value: i64,
    min: i64,
    max: i64,
    errors: &mut Vec<ConfigValidationError>,
) {
    if value < min || value > max {
        errors.push(ConfigValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
}

fn validate_ranges(config: &HpyConfig, errors: &mut Vec<ConfigValidationError>) {
    const MAX: i64 = i64::MAX;

    check_range(
        "connection.requested_mtu",
        config.connection.requested_mtu as i64,
        23,
        517,
        errors,
    );
    check_range(
        "connection.command_timeout_ms",
        config.connection.command_timeout_ms as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "connection.max_queue_depth",
        config.connection.max_queue_depth as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "download.batch_size",
        config.download.batch_size as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "download.l2cap_command_timeout_ms",
        config.download.l2cap_command_timeout_ms as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "download.gatt_batch_timeout_ms",
        config.download.gatt_batch_timeout_ms as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "reconnect.max_attempts",
        config.reconnect.max_attempts as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "reconnect.connect_timeout_ms",
        config.reconnect.connect_timeout_ms as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "fw_update.block_size",
        config.fw_update.block_size as i64,
        1,
        512,
        errors,
    );
    check_range(
        "memfault.buffer_size",
        config.memfault.buffer_size as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "memfault.max_descriptors",
        config.memfault.max_descriptors as i64,
        1,
        MAX,
        errors,
    );
    check_range(
        "memfault.max_chunks_per_drain",
        config.memfault.max_chunks_per_drain as i64,
        1,
        MAX,
        errors,
    );
}

/// Bands must start at attempt 1, be ordered and leave no gaps.
fn validate_schedule(
    field: &str,
    bands: &[BackoffBand],
    errors: &mut Vec<ConfigValidationError>,
) {
    let Some(first) = bands.first() else {
        errors.push(ConfigValidationError::InvalidSchedule {
            field: field.to_string(),
            reason: "at least one band is required".to_string(),
        });
        return;
    };

    if first.from_attempt != 1 {
        errors.push(ConfigValidationError::InvalidSchedule {
            field: field.to_string(),
            reason: format!("first band must start at attempt 1, not {}", first.from_attempt),
        });
    }

    let mut expected_from = first.from_attempt;
    for band in bands {
        if band.from_attempt > band.to_attempt {
            errors.push(ConfigValidationError::InvalidSchedule {
                field: field.to_string(),
                reason: format!(
                    "band {}-{} has from_attempt > to_attempt",
                    band.from_attempt, band.to_attempt
                ),
            });
        }
        if band.from_attempt != expected_from {
            errors.push(ConfigValidationError::InvalidSchedule {
                field: field.to_string(),
                reason: format!(
                    "band starting at {} leaves a gap or overlap (expected {})",
                    band.from_attempt, expected_from
                ),
            });
        }
        expected_from = band.to_attempt.saturating_add(1);
    }
}

fn validate_logging(config: &HpyConfig, errors: &mut Vec<ConfigValidationError>) {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("must be one of: {}", valid_levels.join(", ")),
        });
    }

    let valid_formats = ["text", "json"];
    if !valid_formats.contains(&config.logging.format.to_lowercase().as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.format".to_string(),
            reason: format!("must be one of: {}", valid_formats.join(", ")),
        });
    }
}
