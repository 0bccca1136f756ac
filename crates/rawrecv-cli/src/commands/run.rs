use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rawrecv_config::Config;
use rawrecv_core::{ExitReason, Lifecycle, Receiver, ReceiverSettings, Reloader};
use rawrecv_pg::{ConnectionParams, PgExecutor, PgTransport};
use tracing::{debug, error, info, info_span, Instrument};

/// When and how often a failed receiver is started again.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Pause between a fatal exit and the next start.
    pub delay: Duration,
    /// Give up after the first failure.
    pub once: bool,
}

/// Run the receiver, restarting it after `restart_delay_secs` whenever it
/// exits on error. A shutdown request or the end of the stream stops it.
pub async fn cmd_run(config_path: &Path, once: bool) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let lifecycle = Lifecycle::new();
    let _signals = lifecycle
        .listen_for_signals()
        .context("Failed to install signal handlers")?;

    info!(
        worker = %config.worker.name,
        slot = %config.source.slot_name,
        "Starting receiver"
    );

    let policy = RestartPolicy {
        delay: config.restart_delay(),
        once,
    };
    let span = info_span!("supervisor", worker = %config.worker.name);
    let (fallback, handle) = (&config, &lifecycle);

    supervise(&lifecycle, policy, move || start_worker(config_path, fallback, handle))
        .instrument(span)
        .await
}

/// Keep starting workers until one exits cleanly, shutdown is requested,
/// or the policy gives up.
pub async fn supervise<F, Fut>(lifecycle: &Lifecycle, policy: RestartPolicy, mut start: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ExitReason>>,
{
    let mut restarts: u64 = 0;
    loop {
        if lifecycle.shutdown_requested() {
            return Ok(());
        }

        match start().await {
            Ok(reason) => {
                info!(reason = ?reason, "Receiver finished");
                return Ok(());
            }
            Err(e) if policy.once => return Err(e),
            Err(e) => {
                restarts += 1;
                error!(error = %format!("{:#}", e), restarts, "Receiver exited with error");

                info!(delay_secs = policy.delay.as_secs(), "Restarting receiver after delay");
                lifecycle.wait_for_shutdown(policy.delay).await;
            }
        }
    }
}

/// Start one worker with the configuration file as it is now, so a restart
/// applies edits that are not hot-reloadable.
async fn start_worker(config_path: &Path, fallback: &Config, lifecycle: &Lifecycle) -> Result<ExitReason> {
    let config = match Config::load(config_path) {
        Ok(latest) => latest,
        Err(e) => {
            error!(error = %e, "Configuration no longer valid, keeping previous settings");
            fallback.clone()
        }
    };
    run_worker(&config, config_path, lifecycle).await
}

async fn run_worker(config: &Config, config_path: &Path, lifecycle: &Lifecycle) -> Result<ExitReason> {
    let source = ConnectionParams::parse_replication(&config.source_connection_string())
        .context("Invalid source.connection_string")?;
    let local = ConnectionParams::parse(&config.apply_connection_string())
        .context("Invalid apply.connection_string")?;
    let start_lsn = config.start_lsn()?;

    let mut transport = PgTransport::connect(&source)
        .await
        .with_context(|| format!("Failed to connect to source {}", source.redacted()))?;

    if config.source.create_slot {
        transport
            .create_slot(&config.source.slot_name, &config.source.plugin)
            .await?;
    }

    let options = plugin_options(config);
    transport
        .start_replication(&config.source.slot_name, start_lsn, &options)
        .await?;

    let executor = PgExecutor::connect(&local, &config.apply.database)
        .await
        .with_context(|| format!("Failed to connect to local database {}", config.apply.database))?;

    let mut receiver = Receiver::new(settings(config), transport, executor, lifecycle.clone())
        .with_reloader(reloader(config_path.to_path_buf()));

    let reason = receiver.run().await?;

    if let Err(e) = receiver.into_transport().close().await {
        debug!(error = %e, "Replication connection did not close cleanly");
    }
    Ok(reason)
}

fn settings(config: &Config) -> ReceiverSettings {
    ReceiverSettings {
        worker_name: config.worker.name.clone(),
        idle_time: config.idle_time(),
        status_interval: config.status_interval(),
    }
}

fn plugin_options(config: &Config) -> Vec<(&str, &str)> {
    config
        .source
        .options
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect()
}

/// Re-read only the idle time from the file on each reconfigure request.
fn reloader(path: PathBuf) -> Reloader {
    Box::new(move || Config::reload_idle_time(&path).map_err(|e| e.to_string()))
}
