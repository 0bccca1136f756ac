use tracing::{debug, info, warn};

use crate::error::Result;
use crate::executor::{ApplyOutcome, Executor};
use crate::message::DataMessage;

/// Per-transaction outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub other: u64,
    pub failures: u64,
    pub skipped: u64,
}

impl BatchStats {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Insert => self.inserts += 1,
            ApplyOutcome::Update => self.updates += 1,
            ApplyOutcome::Delete => self.deletes += 1,
            ApplyOutcome::OtherSuccess => self.other += 1,
            ApplyOutcome::Failure(_) => self.failures += 1,
        }
    }

    /// Statements handed to the executor.
    pub fn applied(&self) -> u64 {
        self.inserts + self.updates + self.deletes + self.other + self.failures
    }
}

/// Wraps each drain of the stream in one local transaction.
///
/// Statements are applied best-effort: a failing statement is logged and the
/// transaction carries on with the next one.
pub struct BatchApplier<E> {
    executor: E,
    open: bool,
    stats: BatchStats,
}

impl<E: Executor> BatchApplier<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            open: false,
            stats: BatchStats::default(),
        }
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.executor.begin().await?;
        self.open = true;
        self.stats = BatchStats::default();
        Ok(())
    }

    pub async fn apply(&mut self, message: &DataMessage) -> Option<ApplyOutcome> {
        debug_assert!(self.open, "apply outside of a transaction");

        let statement = match message.statement() {
            Ok(s) => s,
            Err(e) => {
                warn!(lsn = %message.end_position, error = %e, "Change is not valid UTF-8, skipping");
                self.stats.failures += 1;
                return None;
            }
        };

        if statement.trim().is_empty() {
            warn!(lsn = %message.end_position, "Empty change received, skipping");
            self.stats.skipped += 1;
            return None;
        }

        let outcome = self.executor.apply(statement).await;
        match &outcome {
            ApplyOutcome::Insert => info!("INSERT received correctly: {}", statement),
            ApplyOutcome::Update => info!("UPDATE received correctly: {}", statement),
            ApplyOutcome::Delete => info!("DELETE received correctly: {}", statement),
            ApplyOutcome::OtherSuccess => info!("Change applied: {}", statement),
            ApplyOutcome::Failure(error) => {
                warn!(error = %error, "Error when applying change: {}", statement)
            }
        }
        self.stats.record(&outcome);

        Some(outcome)
    }

    pub async fn commit(&mut self) -> Result<BatchStats> {
        self.executor.commit().await?;
        self.open = false;

        if self.stats.applied() > 0 || self.stats.skipped > 0 {
            debug!(
                inserts = self.stats.inserts,
                updates = self.stats.updates,
                deletes = self.stats.deletes,
                other = self.stats.other,
                failures = self.stats.failures,
                skipped = self.stats.skipped,
                "Batch committed"
            );
        }
        Ok(self.stats)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
