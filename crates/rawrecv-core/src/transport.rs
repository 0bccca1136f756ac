use std::future::Future;

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::Result;

/// Result of a non-blocking read from the replication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One complete COPY chunk.
    Message(Bytes),
    /// No complete chunk is buffered right now.
    WouldBlock,
    /// The peer ended the COPY stream or closed the connection.
    EndOfStream,
}

/// A started logical replication stream.
pub trait Transport: Send {
    /// Return the next buffered chunk without waiting for the network.
    fn try_read(&mut self) -> Result<ReadOutcome>;

    /// Wait until more input has been received or `deadline` passes.
    ///
    /// Returns true if new input was consumed. Must be cancel safe.
    fn wait_for_input(&mut self, deadline: Instant) -> impl Future<Output = Result<bool>> + Send;

    /// Send one COPY chunk to the source and flush it.
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = Result<()>> + Send;
}
