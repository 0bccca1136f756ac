use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::codec::build_status_update;
use crate::error::{Error, Result};
use crate::position::PositionTracker;
use crate::timestamp;
use crate::transport::Transport;

/// Shortest wait while idle on the stream when no status report is due sooner.
pub const MIN_INPUT_WAIT: Duration = Duration::from_secs(1);

/// Sends standby status updates, on request or on a fixed schedule.
#[derive(Debug)]
pub struct FeedbackSender {
    interval: Option<Duration>,
    next_due: Option<Instant>,
    sent: u64,
}

impl FeedbackSender {
    /// `interval` of `None` disables proactive reports.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            next_due: interval.map(|i| Instant::now() + i),
            sent: 0,
        }
    }

    /// Report current positions to the source. Any send failure is fatal.
    pub async fn send<T: Transport>(
        &mut self,
        transport: &mut T,
        positions: &PositionTracker,
    ) -> Result<()> {
        info!(
            write = %positions.written(),
            flush = %positions.flushed(),
            "Confirming write and flush positions"
        );

        let frame = build_status_update(positions.written(), positions.flushed(), timestamp::now());
        transport
            .send(frame)
            .await
            .map_err(|e| Error::Feedback(e.to_string()))?;

        self.sent += 1;
        self.next_due = self.interval.map(|i| Instant::now() + i);
        Ok(())
    }

    /// Send a scheduled report if one is due.
    pub async fn send_if_due<T: Transport>(
        &mut self,
        transport: &mut T,
        positions: &PositionTracker,
    ) -> Result<()> {
        if self.is_due(Instant::now()) {
            debug!("Scheduled status report due");
            self.send(transport, positions).await?;
        }
        Ok(())
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Number of status updates sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

/// When to stop waiting for input: the next scheduled report if it falls
/// inside the minimum wait, otherwise `now + MIN_INPUT_WAIT`.
pub fn wake_deadline(now: Instant, next_status: Option<Instant>) -> Instant {
    let floor = now + MIN_INPUT_WAIT;
    match next_status {
        Some(due) if due > now && due < floor => due,
        _ => floor,
    }
}
