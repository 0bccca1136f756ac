use std::ops::RangeInclusive;

use crate::config::{Config, TRANSACTION_OPTION};
use crate::error::{ConfigError, ConfigResult};

/// Accepted values for `worker.idle_time_ms`.
pub const IDLE_TIME_RANGE_MS: RangeInclusive<u64> = 1..=10_000;

/// Longest identifier the server accepts (NAMEDATALEN - 1).
pub const MAX_SLOT_NAME_LEN: usize = 63;

/// Validate a parsed configuration.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_idle_time(config.worker.idle_time_ms)?;
    validate_slot_name(&config.source.slot_name)?;
    validate_start_lsn(config)?;
    validate_connection_strings(config)?;
    validate_options(config)?;
    Ok(())
}

fn validate_idle_time(value: u64) -> ConfigResult<()> {
    if !IDLE_TIME_RANGE_MS.contains(&value) {
        return Err(ConfigError::IdleTimeOutOfRange {
            value,
            min: *IDLE_TIME_RANGE_MS.start(),
            max: *IDLE_TIME_RANGE_MS.end(),
        });
    }
    Ok(())
}

/// Replication slot names may only contain lower case letters, numbers
/// and the underscore character.
pub fn validate_slot_name(name: &str) -> ConfigResult<()> {
    let invalid = |reason| ConfigError::InvalidSlotName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_SLOT_NAME_LEN {
        return Err(invalid("longer than 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(invalid("only lower case letters, numbers and underscore are allowed"));
    }
    Ok(())
}

fn validate_start_lsn(config: &Config) -> ConfigResult<()> {
    config.start_lsn().map(|_| ())
}

fn validate_connection_strings(config: &Config) -> ConfigResult<()> {
    if config.source_connection_string().trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "source.connection_string".to_string(),
        });
    }
    if config.apply_connection_string().trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "apply.connection_string".to_string(),
        });
    }
    if config.apply.database.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "apply.database".to_string(),
        });
    }
    Ok(())
}

fn validate_options(config: &Config) -> ConfigResult<()> {
    if let Some(name) = config.source.options.keys().find(|k| k.trim().is_empty()) {
        return Err(ConfigError::InvalidOption { name: name.clone() });
    }
    if let Some(value) = config.source.options.get(TRANSACTION_OPTION) {
        if !is_false(value) {
            return Err(ConfigError::TransactionOptionEnabled {
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// Boolean spellings the server accepts for false.
fn is_false(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "off" | "false" | "f" | "no" | "n" | "0"
    )
}
