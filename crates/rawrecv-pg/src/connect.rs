//! Shared Postgres connection utilities with TLS support.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::Client;
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::debug;

use crate::conninfo::ConnectionParams;
use crate::error::{PgError, PgResult};

/// A byte stream to the server, plain or encrypted.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Connect to Postgres for regular queries, with TLS when sslmode demands it.
/// Spawns the connection task and returns only the client.
pub async fn connect_postgres(params: &ConnectionParams) -> PgResult<Client> {
    let config = client_config(params);

    if params.sslmode.requires_tls() {
        let connector = MakeRustlsConnect::new(tls_config()?);

        let (client, connection) = config
            .connect(connector)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        Ok(client)
    } else {
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        Ok(client)
    }
}

fn client_config(params: &ConnectionParams) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .dbname(&params.database);

    if let Some(ref password) = params.password {
        config.password(password);
    }
    if let Some(ref name) = params.application_name {
        config.application_name(name);
    }
    if params.sslmode.requires_tls() {
        config.ssl_mode(tokio_postgres::config::SslMode::Require);
    } else {
        config.ssl_mode(tokio_postgres::config::SslMode::Disable);
    }

    config
}

/// Open the raw byte stream for a replication connection, negotiating TLS
/// first when sslmode demands it.
pub async fn open_stream(params: &ConnectionParams) -> PgResult<Box<dyn AsyncStream>> {
    if params.is_unix_socket() {
        return open_unix_stream(params).await;
    }

    let tcp = TcpStream::connect((params.host.as_str(), params.port))
        .await
        .map_err(|e| {
            PgError::Connection(format!("could not connect to {}:{}: {}", params.host, params.port, e))
        })?;
    tcp.set_nodelay(true)?;

    if !params.sslmode.requires_tls() {
        return Ok(Box::new(tcp));
    }

    negotiate_tls(tcp, &params.host).await
}

#[cfg(unix)]
async fn open_unix_stream(params: &ConnectionParams) -> PgResult<Box<dyn AsyncStream>> {
    let path = format!("{}/.s.PGSQL.{}", params.host.trim_end_matches('/'), params.port);
    let stream = tokio::net::UnixStream::connect(&path)
        .await
        .map_err(|e| PgError::Connection(format!("could not connect to socket {}: {}", path, e)))?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn open_unix_stream(params: &ConnectionParams) -> PgResult<Box<dyn AsyncStream>> {
    Err(PgError::Connection(format!(
        "unix socket host {} is not supported on this platform",
        params.host
    )))
}

async fn negotiate_tls(mut tcp: TcpStream, host: &str) -> PgResult<Box<dyn AsyncStream>> {
    let mut buf = bytes::BytesMut::new();
    postgres_protocol::message::frontend::ssl_request(&mut buf);
    tcp.write_all(&buf).await?;
    tcp.flush().await?;

    match tcp.read_u8().await? {
        b'S' => {}
        b'N' => {
            return Err(PgError::Connection(
                "server does not support SSL, but SSL was required".to_string(),
            ))
        }
        other => {
            return Err(PgError::Protocol(format!(
                "unexpected response 0x{:02X} to SSL request",
                other
            )))
        }
    }

    let mut maker = MakeRustlsConnect::new(tls_config()?);
    let connect = MakeTlsConnect::<TcpStream>::make_tls_connect(&mut maker, host)
        .map_err(|e| PgError::Connection(format!("invalid TLS server name {}: {}", host, e)))?;
    let stream = TlsConnect::connect(connect, tcp)
        .await
        .map_err(|e| PgError::Connection(format!("TLS handshake failed: {}", e)))?;

    debug!(host = %host, "TLS established for replication connection");
    Ok(Box::new(stream))
}

fn tls_config() -> PgResult<ClientConfig> {
    Ok(
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| PgError::Connection(format!("TLS config error: {}", e)))?
            .with_root_certificates(root_certs())
            .with_no_client_auth(),
    )
}

/// Get root certificates from webpki-roots.
fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_uses_params() {
        let params = ConnectionParams::parse("host=db port=6000 user=app dbname=replica sslmode=require")
            .unwrap();
        let config = client_config(&params);

        assert_eq!(config.get_ports(), &[6000]);
        assert_eq!(config.get_user(), Some("app"));
        assert_eq!(config.get_dbname(), Some("replica"));
        assert_eq!(config.get_ssl_mode(), tokio_postgres::config::SslMode::Require);
    }

    #[test]
    fn test_tls_config_builds() {
        assert!(tls_config().is_ok());
    }

    #[tokio::test]
    async fn test_open_stream_refused() {
        // Port 1 on loopback is not expected to accept connections.
        let params = ConnectionParams::parse("host=127.0.0.1 port=1").unwrap();
        let err = open_stream(&params).await.err().unwrap();
        assert!(matches!(err, PgError::Connection(_)));
    }
}
