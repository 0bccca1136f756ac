mod config;
mod error;
mod validation;

pub use config::{
    resolve_env, ApplyConfig, Config, SourceConfig, WorkerConfig, DEFAULT_CONFIG_FILE,
    TRANSACTION_OPTION,
};
pub use error::{ConfigError, ConfigResult};
pub use validation::{validate, validate_slot_name, IDLE_TIME_RANGE_MS, MAX_SLOT_NAME_LEN};
