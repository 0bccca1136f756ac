//! The receiver event loop.
//!
//! One loop owns the transport, the executor and the stream positions. Each
//! iteration naps for the idle time (or until a lifecycle request), drains
//! every buffered message inside one local transaction, then waits for more
//! input. The only suspension points are those waits; everything else runs
//! to completion, so a drain and its commit always finish before a shutdown
//! request is honoured.

mod applier;
mod feedback;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub use applier::{BatchApplier, BatchStats};
pub use feedback::{wake_deadline, FeedbackSender, MIN_INPUT_WAIT};

use crate::error::Result;
use crate::executor::Executor;
use crate::lifecycle::Lifecycle;
use crate::message::StreamMessage;
use crate::position::PositionTracker;
use crate::timestamp;
use crate::transport::{ReadOutcome, Transport};

/// Re-reads the hot-reloadable setting (the idle time).
pub type Reloader = Box<dyn FnMut() -> std::result::Result<Duration, String> + Send>;

/// Runtime settings for one receiver.
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    /// Name used to identify the worker in logs.
    pub worker_name: String,
    /// Nap between two loop iterations.
    pub idle_time: Duration,
    /// Interval between unsolicited status reports (`None` = only on request).
    pub status_interval: Option<Duration>,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            worker_name: "receiver_raw".to_string(),
            idle_time: Duration::from_millis(100),
            status_interval: Some(Duration::from_secs(10)),
        }
    }
}

/// Why a receiver stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested.
    Shutdown,
    /// The source ended the stream.
    EndOfStream,
}

enum DrainEnd {
    WouldBlock,
    EndOfStream,
}

pub struct Receiver<T, E> {
    settings: ReceiverSettings,
    transport: T,
    applier: BatchApplier<E>,
    positions: PositionTracker,
    feedback: FeedbackSender,
    lifecycle: Lifecycle,
    reloader: Option<Reloader>,
    batches: u64,
}

impl<T: Transport, E: Executor> Receiver<T, E> {
    pub fn new(settings: ReceiverSettings, transport: T, executor: E, lifecycle: Lifecycle) -> Self {
        let feedback = FeedbackSender::new(settings.status_interval);
        Self {
            settings,
            transport,
            applier: BatchApplier::new(executor),
            positions: PositionTracker::new(),
            feedback,
            lifecycle,
            reloader: None,
            batches: 0,
        }
    }

    /// Install the callback used on reconfigure requests.
    pub fn with_reloader(mut self, reloader: Reloader) -> Self {
        self.reloader = Some(reloader);
        self
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn settings(&self) -> &ReceiverSettings {
        &self.settings
    }

    /// Number of committed drain transactions.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Number of status updates sent.
    pub fn status_updates_sent(&self) -> u64 {
        self.feedback.sent()
    }

    /// Give the transport back, e.g. to close the session after a shutdown.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run until shutdown, end of stream, or a fatal error.
    ///
    /// Everything the loop logs is recorded inside a `receiver` span that
    /// carries the worker name.
    pub async fn run(&mut self) -> Result<ExitReason> {
        let span = info_span!("receiver", worker = %self.settings.worker_name);
        async {
            let result = self.run_loop().await;
            match &result {
                Ok(reason) => info!(
                    reason = ?reason,
                    written = %self.positions.written(),
                    "Receiver stopped"
                ),
                Err(e) => error!(
                    error = %e,
                    written = %self.positions.written(),
                    "Receiver terminating on fatal error"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_loop(&mut self) -> Result<ExitReason> {
        info!(
            idle_time_ms = self.settings.idle_time.as_millis() as u64,
            "Receiver started"
        );

        loop {
            self.lifecycle.wait(self.settings.idle_time).await;

            if self.lifecycle.take_reload() {
                self.reload();
            }

            if self.lifecycle.shutdown_requested() {
                info!("Processed shutdown request");
                return Ok(ExitReason::Shutdown);
            }

            match self.drain().await? {
                DrainEnd::WouldBlock => self.wait_for_input().await?,
                DrainEnd::EndOfStream => {
                    info!("COPY stream has ended");
                    return Ok(ExitReason::EndOfStream);
                }
            }
        }
    }

    /// Apply everything currently buffered inside one transaction.
    async fn drain(&mut self) -> Result<DrainEnd> {
        self.applier.begin().await?;

        let end = loop {
            match self.transport.try_read()? {
                ReadOutcome::Message(chunk) => self.handle(StreamMessage::parse(chunk)?).await?,
                ReadOutcome::WouldBlock => break DrainEnd::WouldBlock,
                ReadOutcome::EndOfStream => break DrainEnd::EndOfStream,
            }
        };

        self.applier.commit().await?;
        self.batches += 1;
        Ok(end)
    }

    async fn handle(&mut self, message: StreamMessage) -> Result<()> {
        match message {
            StreamMessage::Keepalive(keepalive) => {
                debug!(
                    lsn = %keepalive.end_position,
                    sent_at = %timestamp::format(keepalive.send_time),
                    reply_requested = keepalive.reply_requested,
                    "Keepalive"
                );
                self.positions.observe(keepalive.end_position);

                if keepalive.reply_requested {
                    self.feedback
                        .send(&mut self.transport, &self.positions)
                        .await?;
                }
            }
            StreamMessage::Data(change) => {
                self.positions.observe(change.end_position);
                self.applier.apply(&change).await;
            }
        }
        Ok(())
    }

    /// Block until input arrives, the next wake deadline passes, or a
    /// lifecycle request comes in.
    async fn wait_for_input(&mut self) -> Result<()> {
        self.feedback
            .send_if_due(&mut self.transport, &self.positions)
            .await?;

        let deadline = wake_deadline(Instant::now(), self.feedback.next_due());

        tokio::select! {
            received = self.transport.wait_for_input(deadline) => {
                if !received? {
                    debug!("No input before wake deadline");
                }
            }
            _ = self.lifecycle.notified() => {
                debug!("Input wait interrupted by lifecycle request");
            }
        }
        Ok(())
    }

    fn reload(&mut self) {
        let Some(reloader) = self.reloader.as_mut() else {
            info!("Processed reload request");
            return;
        };

        match reloader() {
            Ok(idle_time) => {
                info!(
                    previous_ms = self.settings.idle_time.as_millis() as u64,
                    idle_time_ms = idle_time.as_millis() as u64,
                    "Processed reload request"
                );
                self.settings.idle_time = idle_time;
            }
            Err(e) => warn!(
                error = %e,
                "Configuration reload failed, keeping previous settings"
            ),
        }
    }
}
