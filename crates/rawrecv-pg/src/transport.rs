//! Logical replication connection speaking the streaming protocol directly.
//!
//! The connection is established with a replication startup packet, after
//! which `START_REPLICATION` switches it into CopyBoth mode. From then on
//! every CopyData payload is surfaced as one raw chunk to the receiver.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use postgres_protocol::authentication::md5_hash;
use postgres_protocol::authentication::sasl::{ChannelBinding, ScramSha256, SCRAM_SHA_256};
use postgres_protocol::escape::{escape_identifier, escape_literal};
use postgres_protocol::message::frontend;
use rawrecv_core::{LogPosition, ReadOutcome, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connect::{open_stream, AsyncStream};
use crate::conninfo::ConnectionParams;
use crate::error::{PgError, PgResult};
use crate::protocol::{
    take_frame, AuthRequest, Frame, ServerError, AUTHENTICATION_TAG, BACKEND_KEY_DATA_TAG,
    COMMAND_COMPLETE_TAG, COPY_BOTH_RESPONSE_TAG, COPY_DATA_TAG, COPY_DONE_TAG, DATA_ROW_TAG,
    ERROR_RESPONSE_TAG, NEGOTIATE_PROTOCOL_VERSION_TAG, NOTICE_RESPONSE_TAG,
    PARAMETER_STATUS_TAG, READY_FOR_QUERY_TAG, ROW_DESCRIPTION_TAG,
};

/// SQLSTATE for duplicate_object, returned when the slot already exists.
const DUPLICATE_OBJECT: &str = "42710";

/// Build the command that creates a logical slot.
pub fn create_slot_command(slot_name: &str, plugin: &str) -> String {
    format!(
        "CREATE_REPLICATION_SLOT {} LOGICAL {}",
        escape_identifier(slot_name),
        escape_identifier(plugin)
    )
}

/// Build the command that starts streaming from a logical slot.
pub fn start_replication_command(
    slot_name: &str,
    start: LogPosition,
    options: &[(&str, &str)],
) -> String {
    let options_string = if options.is_empty() {
        String::new()
    } else {
        format!(
            " ({})",
            options
                .iter()
                .map(|(name, value)| format!("{} {}", escape_identifier(name), escape_literal(value)))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    format!(
        "START_REPLICATION SLOT {} LOGICAL {}{}",
        escape_identifier(slot_name),
        start,
        options_string
    )
}

/// A replication connection to the source server.
pub struct PgTransport {
    stream: Box<dyn AsyncStream>,
    /// Bytes received but not yet consumed.
    buf: BytesMut,
    /// The server closed the connection.
    closed: bool,
    /// START_REPLICATION succeeded and the connection is in CopyBoth mode.
    streaming: bool,
    /// The server ended the COPY stream.
    copy_done: bool,
}

impl PgTransport {
    /// Connect and authenticate a replication connection.
    pub async fn connect(params: &ConnectionParams) -> PgResult<Self> {
        info!(
            host = %params.host,
            port = params.port,
            user = %params.user,
            database = %params.database,
            sslmode = %params.sslmode,
            "Connecting for streaming replication"
        );

        let stream = open_stream(params).await?;
        Self::establish(stream, params).await
    }

    /// Run the startup and authentication exchange over an open stream.
    pub async fn handshake<S: AsyncStream + 'static>(
        stream: S,
        params: &ConnectionParams,
    ) -> PgResult<Self> {
        Self::establish(Box::new(stream), params).await
    }

    async fn establish(stream: Box<dyn AsyncStream>, params: &ConnectionParams) -> PgResult<Self> {
        let mut transport = Self {
            stream,
            buf: BytesMut::with_capacity(8192),
            closed: false,
            streaming: false,
            copy_done: false,
        };

        let mut startup = vec![
            ("user", params.user.as_str()),
            ("database", params.database.as_str()),
        ];
        if let Some(ref replication) = params.replication {
            startup.push(("replication", replication.as_str()));
        }
        if let Some(ref name) = params.application_name {
            startup.push(("application_name", name.as_str()));
        }

        let mut out = BytesMut::new();
        frontend::startup_message(startup, &mut out)?;
        transport.write(out).await?;

        transport.authenticate(params).await?;
        transport.wait_until_ready().await?;

        info!(user = %params.user, database = %params.database, "Replication connection established");
        Ok(transport)
    }

    async fn authenticate(&mut self, params: &ConnectionParams) -> PgResult<()> {
        let frame = self.expect_frame(AUTHENTICATION_TAG).await?;

        match AuthRequest::parse(frame.body)? {
            AuthRequest::Ok => {
                debug!("Server requested no password");
            }
            AuthRequest::CleartextPassword => {
                let password = required_password(params)?;
                let mut out = BytesMut::new();
                frontend::password_message(password.as_bytes(), &mut out)?;
                self.write(out).await?;
                self.expect_auth_ok().await?;
            }
            AuthRequest::Md5Password { salt } => {
                let password = required_password(params)?;
                let hash = md5_hash(params.user.as_bytes(), password.as_bytes(), salt);
                let mut out = BytesMut::new();
                frontend::password_message(hash.as_bytes(), &mut out)?;
                self.write(out).await?;
                self.expect_auth_ok().await?;
            }
            AuthRequest::Sasl { mechanisms } => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(PgError::Authentication(format!(
                        "no supported SASL mechanism offered: {}",
                        mechanisms.join(", ")
                    )));
                }
                let password = required_password(params)?;
                self.authenticate_scram(password).await?;
            }
            AuthRequest::SaslContinue { .. } | AuthRequest::SaslFinal { .. } => {
                return Err(PgError::Protocol(
                    "SASL exchange started without negotiation".to_string(),
                ));
            }
            AuthRequest::Unsupported(code) => {
                return Err(PgError::Authentication(format!(
                    "unsupported authentication method (code {})",
                    code
                )));
            }
        }

        Ok(())
    }

    async fn authenticate_scram(&mut self, password: &str) -> PgResult<()> {
        let mut scram = ScramSha256::new(password.as_bytes(), ChannelBinding::unsupported());

        let mut out = BytesMut::new();
        frontend::sasl_initial_response(SCRAM_SHA_256, scram.message(), &mut out)?;
        self.write(out).await?;

        let frame = self.expect_frame(AUTHENTICATION_TAG).await?;
        let AuthRequest::SaslContinue { data } = AuthRequest::parse(frame.body)? else {
            return Err(PgError::Protocol("expected SASL continue message".to_string()));
        };
        scram
            .update(&data)
            .map_err(|e| PgError::Authentication(e.to_string()))?;

        let mut out = BytesMut::new();
        frontend::sasl_response(scram.message(), &mut out)?;
        self.write(out).await?;

        let frame = self.expect_frame(AUTHENTICATION_TAG).await?;
        let AuthRequest::SaslFinal { data } = AuthRequest::parse(frame.body)? else {
            return Err(PgError::Protocol("expected SASL final message".to_string()));
        };
        scram
            .finish(&data)
            .map_err(|e| PgError::Authentication(e.to_string()))?;

        self.expect_auth_ok().await
    }

    async fn expect_auth_ok(&mut self) -> PgResult<()> {
        let frame = self.expect_frame(AUTHENTICATION_TAG).await?;
        match AuthRequest::parse(frame.body)? {
            AuthRequest::Ok => Ok(()),
            other => Err(PgError::Protocol(format!(
                "unexpected authentication request {:?}",
                other
            ))),
        }
    }

    /// Consume startup messages until the server is ready for queries.
    async fn wait_until_ready(&mut self) -> PgResult<()> {
        loop {
            let frame = self.read_frame().await?;
            match frame.tag {
                READY_FOR_QUERY_TAG => return Ok(()),
                PARAMETER_STATUS_TAG | BACKEND_KEY_DATA_TAG | NEGOTIATE_PROTOCOL_VERSION_TAG => {}
                NOTICE_RESPONSE_TAG => log_notice(&frame),
                ERROR_RESPONSE_TAG => {
                    return Err(PgError::Connection(ServerError::parse(&frame.body).to_string()))
                }
                other => return Err(unexpected(other, "startup")),
            }
        }
    }

    /// Create a logical slot. Returns false if it already existed.
    pub async fn create_slot(&mut self, slot_name: &str, plugin: &str) -> PgResult<bool> {
        info!(slot = %slot_name, plugin = %plugin, "Creating replication slot");
        self.query(&create_slot_command(slot_name, plugin)).await?;

        let mut error = None;
        loop {
            let frame = self.read_frame().await?;
            match frame.tag {
                READY_FOR_QUERY_TAG => break,
                ROW_DESCRIPTION_TAG | DATA_ROW_TAG | COMMAND_COMPLETE_TAG => {}
                NOTICE_RESPONSE_TAG => log_notice(&frame),
                ERROR_RESPONSE_TAG => error = Some(ServerError::parse(&frame.body)),
                other => return Err(unexpected(other, "CREATE_REPLICATION_SLOT")),
            }
        }

        match error {
            None => Ok(true),
            Some(e) if e.code == DUPLICATE_OBJECT => {
                info!(slot = %slot_name, "Using existing replication slot");
                Ok(false)
            }
            Some(e) => Err(PgError::SlotCreationFailed(e.to_string())),
        }
    }

    /// Switch the connection into streaming mode.
    pub async fn start_replication(
        &mut self,
        slot_name: &str,
        start: LogPosition,
        options: &[(&str, &str)],
    ) -> PgResult<()> {
        let command = start_replication_command(slot_name, start, options);
        debug!(command = %command, "Starting logical replication");
        self.query(&command).await?;

        loop {
            let frame = self.read_frame().await?;
            match frame.tag {
                COPY_BOTH_RESPONSE_TAG => break,
                NOTICE_RESPONSE_TAG => log_notice(&frame),
                ERROR_RESPONSE_TAG => {
                    return Err(PgError::StartReplication(
                        ServerError::parse(&frame.body).to_string(),
                    ))
                }
                other => {
                    return Err(PgError::StartReplication(format!(
                        "unexpected message tag 0x{:02X}",
                        other
                    )))
                }
            }
        }

        self.streaming = true;
        info!(slot = %slot_name, start_lsn = %start, "Started logical replication");
        Ok(())
    }

    /// Finish the COPY stream and close the session.
    pub async fn close(mut self) -> PgResult<()> {
        if self.closed {
            return Ok(());
        }
        let mut out = BytesMut::new();
        if self.streaming {
            frontend::copy_done(&mut out);
        }
        frontend::terminate(&mut out);
        self.write(out).await
    }

    async fn query(&mut self, sql: &str) -> PgResult<()> {
        let mut out = BytesMut::new();
        frontend::query(sql, &mut out)?;
        self.write(out).await
    }

    async fn write(&mut self, out: BytesMut) -> PgResult<()> {
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read until one complete message is buffered.
    async fn read_frame(&mut self) -> PgResult<Frame> {
        loop {
            if let Some(frame) = take_frame(&mut self.buf)? {
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                self.closed = true;
                return Err(PgError::Connection(
                    "server closed the connection unexpectedly".to_string(),
                ));
            }
        }
    }

    async fn expect_frame(&mut self, tag: u8) -> PgResult<Frame> {
        let frame = self.read_frame().await?;
        if frame.tag == ERROR_RESPONSE_TAG {
            return Err(PgError::Authentication(
                ServerError::parse(&frame.body).to_string(),
            ));
        }
        if frame.tag != tag {
            return Err(unexpected(frame.tag, "authentication"));
        }
        Ok(frame)
    }
}

fn required_password(params: &ConnectionParams) -> PgResult<&str> {
    params
        .password
        .as_deref()
        .ok_or_else(|| PgError::Authentication("server requested a password but none was given".to_string()))
}

fn unexpected(tag: u8, phase: &str) -> PgError {
    PgError::Protocol(format!("unexpected message tag 0x{:02X} during {}", tag, phase))
}

fn log_notice(frame: &Frame) {
    let notice = ServerError::parse(&frame.body);
    info!(severity = %notice.severity, code = %notice.code, "{}", notice.message);
}

impl Transport for PgTransport {
    fn try_read(&mut self) -> rawrecv_core::Result<ReadOutcome> {
        loop {
            let Some(frame) = take_frame(&mut self.buf)? else {
                if self.closed || self.copy_done {
                    return Ok(ReadOutcome::EndOfStream);
                }
                return Ok(ReadOutcome::WouldBlock);
            };

            match frame.tag {
                COPY_DATA_TAG => return Ok(ReadOutcome::Message(frame.body)),
                COPY_DONE_TAG => {
                    self.copy_done = true;
                    return Ok(ReadOutcome::EndOfStream);
                }
                ERROR_RESPONSE_TAG => {
                    return Err(rawrecv_core::Error::Transport(
                        ServerError::parse(&frame.body).to_string(),
                    ))
                }
                NOTICE_RESPONSE_TAG => log_notice(&frame),
                PARAMETER_STATUS_TAG => {}
                other => return Err(unexpected(other, "streaming").into()),
            }
        }
    }

    fn wait_for_input(
        &mut self,
        deadline: Instant,
    ) -> impl Future<Output = rawrecv_core::Result<bool>> + Send {
        async move {
            if self.closed || self.copy_done {
                return Ok(true);
            }

            match tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.buf)).await {
                Err(_elapsed) => Ok(false),
                Ok(Ok(0)) => {
                    warn!("Replication connection closed by server");
                    self.closed = true;
                    Ok(true)
                }
                Ok(Ok(_)) => Ok(true),
                Ok(Err(e)) => Err(rawrecv_core::Error::Transport(e.to_string())),
            }
        }
    }

    fn send(&mut self, chunk: Bytes) -> impl Future<Output = rawrecv_core::Result<()>> + Send {
        async move {
            let mut out = BytesMut::new();
            frontend::CopyData::new(chunk)?.write(&mut out);
            self.write(out).await?;
            Ok(())
        }
    }
}
