//! Wire codec for the COPY sub-protocol carried over the replication stream.
//!
//! All integers are big-endian. Inbound frames are parsed in [`crate::message`];
//! this module holds the primitives and the one outbound message shape.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::lsn::LogPosition;

/// Tag byte of a standby status update.
pub const STATUS_UPDATE_TAG: u8 = b'r';

/// Fixed length of a standby status update: tag, three positions, send time, reply flag.
pub const STATUS_UPDATE_LEN: usize = 1 + 8 + 8 + 8 + 8 + 1;

/// Encode an i64 in network byte order.
pub fn encode_i64_be(value: i64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_i64(&mut buf, value);
    buf
}

/// Decode an i64 from network byte order.
pub fn decode_i64_be(buf: &[u8; 8]) -> i64 {
    BigEndian::read_i64(buf)
}

/// Progress reported back to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub written: LogPosition,
    pub flushed: LogPosition,
    /// Always [`LogPosition::INVALID`]: apply completion is not tracked.
    pub applied: LogPosition,
    pub send_time: i64,
}

impl StatusUpdate {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STATUS_UPDATE_LEN);
        buf.put_u8(STATUS_UPDATE_TAG);
        buf.put_slice(&encode_i64_be(self.written.as_u64() as i64));
        buf.put_slice(&encode_i64_be(self.flushed.as_u64() as i64));
        buf.put_slice(&encode_i64_be(self.applied.as_u64() as i64));
        buf.put_slice(&encode_i64_be(self.send_time));
        // No reply requested from the server.
        buf.put_u8(0);
        buf.freeze()
    }

    /// Parse an encoded status update. Returns `None` if the frame is not one.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() != STATUS_UPDATE_LEN || frame[0] != STATUS_UPDATE_TAG {
            return None;
        }

        let field = |offset: usize| -> i64 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&frame[offset..offset + 8]);
            decode_i64_be(&raw)
        };

        Some(Self {
            written: LogPosition::new(field(1) as u64),
            flushed: LogPosition::new(field(9) as u64),
            applied: LogPosition::new(field(17) as u64),
            send_time: field(25),
        })
    }
}

/// Build the standby status update frame for the given write/flush positions.
pub fn build_status_update(written: LogPosition, flushed: LogPosition, now: i64) -> Bytes {
    StatusUpdate {
        written,
        flushed,
        applied: LogPosition::INVALID,
        send_time: now,
    }
    .encode()
}
