use thiserror::Error;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("idle_time_ms must be between {min} and {max}, got {value}")]
    IdleTimeOutOfRange { value: u64, min: u64, max: u64 },

    #[error("invalid slot name '{name}': {reason}")]
    InvalidSlotName { name: String, reason: &'static str },

    #[error("invalid start_lsn '{value}': expected X/Y in hexadecimal")]
    InvalidStartLsn { value: String },

    #[error("invalid plugin option '{name}': option names must not be empty")]
    InvalidOption { name: String },

    #[error("include_transaction must be off, got '{value}'")]
    TransactionOptionEnabled { value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
