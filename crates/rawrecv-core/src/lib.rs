pub mod codec;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod lsn;
pub mod message;
pub mod mock;
pub mod position;
pub mod receiver;
pub mod timestamp;
pub mod transport;

pub use codec::{build_status_update, decode_i64_be, encode_i64_be, StatusUpdate, STATUS_UPDATE_LEN};
pub use error::{Error, Result};
pub use executor::{ApplyOutcome, Executor, StatementKind};
pub use lifecycle::Lifecycle;
pub use lsn::{format_lsn, parse_lsn, LogPosition};
pub use message::{DataMessage, Keepalive, StreamMessage};
pub use position::PositionTracker;
pub use receiver::{ExitReason, Receiver, ReceiverSettings, Reloader};
pub use transport::{ReadOutcome, Transport};
