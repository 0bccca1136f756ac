//! High-water marks reported to the source.

use crate::lsn::LogPosition;

/// Tracks how far into the stream the receiver has got.
///
/// Receipt is treated as durable: the flushed position always equals the
/// written position, and the applied position is never reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionTracker {
    written: LogPosition,
    flushed: LogPosition,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an end position seen on the stream. Returns true if the
    /// written position advanced.
    pub fn observe(&mut self, end_position: LogPosition) -> bool {
        let previous = self.written;
        self.written = self.written.max(end_position);
        self.flushed = self.written;
        self.written > previous
    }

    pub fn written(&self) -> LogPosition {
        self.written
    }

    pub fn flushed(&self) -> LogPosition {
        self.flushed
    }

    pub fn applied(&self) -> LogPosition {
        LogPosition::INVALID
    }
}
