use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

pub const SAMPLE_CONFIG: &str = r#"# rawrecv configuration
# ${VAR} references are resolved from the environment (and .env).

[source]
# Replication connection to the server that owns the logical slot.
# replication=database is added when not given.
connection_string = "host=localhost port=5432 user=postgres dbname=postgres"
# connection_string = "${SOURCE_DATABASE_URL}"
slot_name = "slot"
plugin = "decoder_raw"
# Create the slot on startup when it does not exist yet.
create_slot = false
# Position to start streaming from; 0/0 lets the slot decide.
start_lsn = "0/0"

[source.options]
include_transaction = "off"

[apply]
# Database the received statements are applied to.
database = "postgres"
connection_string = "host=localhost port=5432 user=postgres"

[worker]
name = "receiver_raw"
# Nap between two loop iterations, 1 to 10000 ms. Re-read on SIGHUP.
idle_time_ms = 100
# Unsolicited status reports to the source, 0 to disable.
status_interval_ms = 10000
# Delay before restarting after a fatal error.
restart_delay_secs = 10
"#;

/// Write the sample configuration to `path`. An existing file is left alone.
pub fn cmd_init(path: &Path) -> Result<()> {
    if path.exists() {
        println!(
            "{}",
            format!("{} already exists, skipping", path.display()).yellow()
        );
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    fs::write(path, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Created config file");

    println!("{}", format!("Created {}", path.display()).green());
    println!("\nNext steps:");
    println!("  1. Edit the connection strings in {}", path.display());
    println!("  2. Run `rawrecv check` to validate it");
    println!("  3. Run `rawrecv run` to start receiving changes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rawrecv_config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_sample_config_is_valid() {
        let config = Config::parse(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.source.plugin, "decoder_raw");
        assert_eq!(config.worker.name, "receiver_raw");
        assert_eq!(config.worker.idle_time_ms, 100);
    }

    #[test]
    fn test_init_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("rawrecv.toml");

        cmd_init(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE_CONFIG);
    }

    #[test]
    fn test_init_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rawrecv.toml");
        fs::write(&path, "# mine\n").unwrap();

        cmd_init(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "# mine\n");
    }
}
