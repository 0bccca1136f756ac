use thiserror::Error;

/// Errors that can terminate a receiver.
///
/// Every variant is fatal for the worker. Statement failures inside a batch
/// are not errors; they surface as [`crate::ApplyOutcome::Failure`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("incorrect streaming header: unknown message tag 0x{0:02X}")]
    UnknownTag(u8),

    #[error("streaming header too small: {kind} message of {len} bytes, need at least {min}")]
    HeaderTooSmall {
        kind: &'static str,
        len: usize,
        min: usize,
    },

    #[error("empty frame received on the replication stream")]
    EmptyFrame,

    #[error("could not send feedback packet: {0}")]
    Feedback(String),

    #[error("failure while receiving changes: {0}")]
    Transport(String),

    #[error("local executor error: {0}")]
    Executor(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error means the source sent a frame we cannot interpret.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::UnknownTag(_) | Error::HeaderTooSmall { .. } | Error::EmptyFrame
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
