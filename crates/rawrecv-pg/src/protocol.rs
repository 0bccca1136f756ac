//! Backend message framing.
//!
//! Every backend message is a tag byte followed by a big-endian i32 length
//! that counts itself but not the tag.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, Bytes, BytesMut};

use crate::error::{PgError, PgResult};

pub const AUTHENTICATION_TAG: u8 = b'R';
pub const BACKEND_KEY_DATA_TAG: u8 = b'K';
pub const COMMAND_COMPLETE_TAG: u8 = b'C';
pub const COPY_BOTH_RESPONSE_TAG: u8 = b'W';
pub const COPY_DATA_TAG: u8 = b'd';
pub const COPY_DONE_TAG: u8 = b'c';
pub const DATA_ROW_TAG: u8 = b'D';
pub const ERROR_RESPONSE_TAG: u8 = b'E';
pub const NEGOTIATE_PROTOCOL_VERSION_TAG: u8 = b'v';
pub const NOTICE_RESPONSE_TAG: u8 = b'N';
pub const PARAMETER_STATUS_TAG: u8 = b'S';
pub const READY_FOR_QUERY_TAG: u8 = b'Z';
pub const ROW_DESCRIPTION_TAG: u8 = b'T';

/// Largest message accepted from the server.
const MAX_MESSAGE_LEN: usize = 1 << 30;

/// One complete backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub body: Bytes,
}

/// Split one complete message off the front of `buf`, if there is one.
pub fn take_frame(buf: &mut BytesMut) -> PgResult<Option<Frame>> {
    if buf.len() < 5 {
        return Ok(None);
    }

    let len = BigEndian::read_i32(&buf[1..5]);
    if len < 4 || len as usize > MAX_MESSAGE_LEN {
        return Err(PgError::Protocol(format!(
            "invalid length {} for message tag 0x{:02X}",
            len, buf[0]
        )));
    }

    let total = 1 + len as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }

    let mut frame = buf.split_to(total);
    let tag = frame[0];
    frame.advance(5);

    Ok(Some(Frame {
        tag,
        body: frame.freeze(),
    }))
}

/// Authentication request sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl { mechanisms: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
    Unsupported(i32),
}

impl AuthRequest {
    pub fn parse(mut body: Bytes) -> PgResult<Self> {
        if body.len() < 4 {
            return Err(PgError::Protocol("truncated authentication request".to_string()));
        }

        let request = match body.get_i32() {
            0 => AuthRequest::Ok,
            3 => AuthRequest::CleartextPassword,
            5 => {
                if body.len() < 4 {
                    return Err(PgError::Protocol("truncated MD5 salt".to_string()));
                }
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                AuthRequest::Md5Password { salt }
            }
            10 => AuthRequest::Sasl {
                mechanisms: body[..]
                    .split(|b| *b == 0)
                    .filter(|m| !m.is_empty())
                    .map(|m| String::from_utf8_lossy(m).into_owned())
                    .collect(),
            },
            11 => AuthRequest::SaslContinue { data: body },
            12 => AuthRequest::SaslFinal { data: body },
            other => AuthRequest::Unsupported(other),
        };

        Ok(request)
    }
}

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
}

impl ServerError {
    pub fn parse(body: &[u8]) -> Self {
        let mut error = ServerError::default();

        let mut rest = body;
        while let Some((&field, tail)) = rest.split_first() {
            if field == 0 {
                break;
            }
            let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
            let value = String::from_utf8_lossy(&tail[..end]).into_owned();
            match field {
                b'V' => error.severity = value,
                b'S' if error.severity.is_empty() => error.severity = value,
                b'C' => error.code = value,
                b'M' => error.message = value,
                b'D' => error.detail = Some(value),
                _ => {}
            }
            rest = tail.get(end + 1..).unwrap_or(&[]);
        }

        error
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (code: {})", self.severity, self.message, self.code)?;
        if let Some(ref detail) = self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn message(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = vec![tag];
        buf.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_take_frame_waits_for_complete_message() {
        let bytes = message(b'd', b"hello");
        let mut buf = BytesMut::new();

        for &b in &bytes[..bytes.len() - 1] {
            buf.put_u8(b);
            assert_eq!(take_frame(&mut buf).unwrap(), None);
        }
        buf.put_u8(bytes[bytes.len() - 1]);

        let frame = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, b'd');
        assert_eq!(&frame.body[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_frame_leaves_following_message() {
        let mut buf = BytesMut::new();
        buf.put_slice(&message(b'c', b""));
        buf.put_slice(&message(b'Z', b"I"));

        assert_eq!(take_frame(&mut buf).unwrap().unwrap().tag, b'c');
        let frame = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, b'Z');
        assert_eq!(&frame.body[..], b"I");
    }

    #[test]
    fn test_take_frame_rejects_bad_length() {
        let mut buf = BytesMut::from(&[b'd', 0, 0, 0, 2][..]);
        assert!(matches!(take_frame(&mut buf), Err(PgError::Protocol(_))));
    }

    #[test]
    fn test_auth_request_parse() {
        let parse = |body: &[u8]| AuthRequest::parse(Bytes::copy_from_slice(body)).unwrap();

        assert_eq!(parse(&[0, 0, 0, 0]), AuthRequest::Ok);
        assert_eq!(parse(&[0, 0, 0, 3]), AuthRequest::CleartextPassword);
        assert_eq!(
            parse(&[0, 0, 0, 5, 1, 2, 3, 4]),
            AuthRequest::Md5Password { salt: [1, 2, 3, 4] }
        );
        assert_eq!(
            parse(b"\0\0\0\x0aSCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0"),
            AuthRequest::Sasl {
                mechanisms: vec!["SCRAM-SHA-256-PLUS".to_string(), "SCRAM-SHA-256".to_string()]
            }
        );
        assert_eq!(parse(&[0, 0, 0, 7]), AuthRequest::Unsupported(7));
    }

    #[test]
    fn test_server_error_parse() {
        let body = b"SERROR\0VERROR\0C42704\0Mreplication slot \"slot\" does not exist\0\0";
        let error = ServerError::parse(body);

        assert_eq!(error.severity, "ERROR");
        assert_eq!(error.code, "42704");
        assert_eq!(error.to_string(), "ERROR: replication slot \"slot\" does not exist (code: 42704)");
    }
}
