use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rawrecv_core::LogPosition;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::validate;

/// decoder_raw option that wraps changes in BEGIN/COMMIT statements.
pub const TRANSACTION_OPTION: &str = "include_transaction";

/// File looked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "rawrecv.toml";

/// Receiver configuration from rawrecv.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// The upstream server and the logical slot to stream from.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Replication connection string, URL or key/value form.
    pub connection_string: String,
    #[serde(default = "default_slot_name")]
    pub slot_name: String,
    /// Output plugin used when the slot is created.
    #[serde(default = "default_plugin")]
    pub plugin: String,
    /// Create the slot on startup if it does not exist.
    #[serde(default)]
    pub create_slot: bool,
    #[serde(default = "default_start_lsn")]
    pub start_lsn: String,
    /// Options passed to the output plugin on START_REPLICATION.
    #[serde(default = "default_plugin_options")]
    pub options: BTreeMap<String, String>,
}

/// The local database that decoded statements are applied to.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyConfig {
    #[serde(default = "default_database")]
    pub database: String,
    /// Connection string for the local server. Its dbname is replaced by
    /// `database`.
    #[serde(default = "default_apply_connection_string")]
    pub connection_string: String,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            connection_string: default_apply_connection_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_name")]
    pub name: String,
    /// Nap between two loop iterations. Reloadable.
    #[serde(default = "default_idle_time_ms")]
    pub idle_time_ms: u64,
    /// Interval between unsolicited status reports, 0 to disable.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Delay before restarting a worker that exited on error.
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            idle_time_ms: default_idle_time_ms(),
            status_interval_ms: default_status_interval_ms(),
            restart_delay_secs: default_restart_delay_secs(),
        }
    }
}

fn default_slot_name() -> String {
    "slot".to_string()
}

fn default_plugin() -> String {
    "decoder_raw".to_string()
}

fn default_start_lsn() -> String {
    "0/0".to_string()
}

fn default_plugin_options() -> BTreeMap<String, String> {
    BTreeMap::from([(TRANSACTION_OPTION.to_string(), "off".to_string())])
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_apply_connection_string() -> String {
    "host=localhost".to_string()
}

fn default_worker_name() -> String {
    "receiver_raw".to_string()
}

fn default_idle_time_ms() -> u64 {
    100
}

fn default_status_interval_ms() -> u64 {
    10_000
}

fn default_restart_delay_secs() -> u64 {
    10
}

impl Config {
    /// Parse and validate a configuration from a TOML string.
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let mut config: Config = toml::from_str(toml_str)?;
        // Applied statements run inside our own transaction, so the plugin
        // must never emit BEGIN/COMMIT.
        config
            .source
            .options
            .entry(TRANSACTION_OPTION.to_string())
            .or_insert_with(|| "off".to_string());
        validate(&config)?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Re-read `path` and return only the hot-reloadable idle time.
    pub fn reload_idle_time(path: impl AsRef<Path>) -> ConfigResult<Duration> {
        Self::load(path).map(|config| config.idle_time())
    }

    /// Get the resolved replication connection string.
    pub fn source_connection_string(&self) -> String {
        resolve_env(&self.source.connection_string)
    }

    /// Get the resolved local connection string.
    pub fn apply_connection_string(&self) -> String {
        resolve_env(&self.apply.connection_string)
    }

    pub fn start_lsn(&self) -> ConfigResult<LogPosition> {
        self.source
            .start_lsn
            .parse()
            .map_err(|_| ConfigError::InvalidStartLsn {
                value: self.source.start_lsn.clone(),
            })
    }

    pub fn idle_time(&self) -> Duration {
        Duration::from_millis(self.worker.idle_time_ms)
    }

    /// `None` when proactive status reports are disabled.
    pub fn status_interval(&self) -> Option<Duration> {
        match self.worker.status_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.worker.restart_delay_secs)
    }
}

/// Resolve environment variables in a string.
/// Supports ${VAR_NAME} syntax; unset variables resolve to "".
pub fn resolve_env(s: &str) -> String {
    let mut result = s.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        } else {
            break;
        }
    }

    result
}
