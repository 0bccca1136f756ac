//! Classification of raw COPY chunks into stream messages.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::lsn::LogPosition;

pub const KEEPALIVE_TAG: u8 = b'k';
pub const DATA_TAG: u8 = b'w';

/// tag + end position + send time + reply flag
pub const KEEPALIVE_LEN: usize = 1 + 8 + 8 + 1;

/// tag + start position + end position + send time
pub const DATA_HEADER_LEN: usize = 1 + 8 + 8 + 8;

/// A data frame must carry at least one payload byte.
pub const DATA_MIN_LEN: usize = DATA_HEADER_LEN + 1;

/// Liveness message from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    pub end_position: LogPosition,
    pub send_time: i64,
    pub reply_requested: bool,
}

impl Keepalive {
    /// Frame this keepalive as the source would send it.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(KEEPALIVE_LEN);
        buf.put_u8(KEEPALIVE_TAG);
        buf.put_u64(self.end_position.as_u64());
        buf.put_i64(self.send_time);
        buf.put_u8(u8::from(self.reply_requested));
        buf.freeze()
    }
}

/// A decoded change: one statement to apply locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub start_position: LogPosition,
    pub end_position: LogPosition,
    pub send_time: i64,
    /// Statement bytes with any trailing NUL terminator removed.
    pub payload: Bytes,
}

impl DataMessage {
    /// The payload as statement text, if it is valid UTF-8.
    pub fn statement(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Frame this change as the source would send it.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_HEADER_LEN + self.payload.len());
        buf.put_u8(DATA_TAG);
        buf.put_u64(self.start_position.as_u64());
        buf.put_u64(self.end_position.as_u64());
        buf.put_i64(self.send_time);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Keepalive(Keepalive),
    Data(DataMessage),
}

impl StreamMessage {
    /// Classify one framed chunk received from the transport.
    pub fn parse(chunk: Bytes) -> Result<Self> {
        let Some(&tag) = chunk.first() else {
            return Err(Error::EmptyFrame);
        };

        match tag {
            KEEPALIVE_TAG => parse_keepalive(&chunk).map(StreamMessage::Keepalive),
            DATA_TAG => parse_data(chunk).map(StreamMessage::Data),
            other => Err(Error::UnknownTag(other)),
        }
    }

    /// End position carried by the message.
    pub fn end_position(&self) -> LogPosition {
        match self {
            StreamMessage::Keepalive(k) => k.end_position,
            StreamMessage::Data(d) => d.end_position,
        }
    }
}

fn parse_keepalive(chunk: &[u8]) -> Result<Keepalive> {
    if chunk.len() < KEEPALIVE_LEN {
        return Err(Error::HeaderTooSmall {
            kind: "keepalive",
            len: chunk.len(),
            min: KEEPALIVE_LEN,
        });
    }

    let mut cursor = Cursor::new(&chunk[1..]);
    let end_position = cursor.read_u64::<BigEndian>()?;
    let send_time = cursor.read_i64::<BigEndian>()?;
    let reply_requested = cursor.read_u8()? != 0;

    Ok(Keepalive {
        end_position: LogPosition::new(end_position),
        send_time,
        reply_requested,
    })
}

fn parse_data(chunk: Bytes) -> Result<DataMessage> {
    if chunk.len() < DATA_MIN_LEN {
        return Err(Error::HeaderTooSmall {
            kind: "data",
            len: chunk.len(),
            min: DATA_MIN_LEN,
        });
    }

    let mut cursor = Cursor::new(&chunk[1..DATA_HEADER_LEN]);
    let start_position = cursor.read_u64::<BigEndian>()?;
    let end_position = cursor.read_u64::<BigEndian>()?;
    let send_time = cursor.read_i64::<BigEndian>()?;

    let mut end = chunk.len();
    while end > DATA_HEADER_LEN && chunk[end - 1] == 0 {
        end -= 1;
    }

    Ok(DataMessage {
        start_position: LogPosition::new(start_position),
        end_position: LogPosition::new(end_position),
        send_time,
        payload: chunk.slice(DATA_HEADER_LEN..end),
    })
}
