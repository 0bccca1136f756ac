use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("could not start logical replication: {0}")]
    StartReplication(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Extract database error details if available
        if let Some(db_err) = e.as_db_error() {
            let msg = format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            );
            PgError::Postgres(msg)
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

impl From<PgError> for rawrecv_core::Error {
    fn from(e: PgError) -> Self {
        match e {
            PgError::Postgres(_) => rawrecv_core::Error::Executor(e.to_string()),
            PgError::Protocol(_) => rawrecv_core::Error::Transport(e.to_string()),
            PgError::Io(io) => rawrecv_core::Error::Io(io),
            PgError::Connection(_)
            | PgError::InvalidConnectionString(_)
            | PgError::Authentication(_)
            | PgError::SlotCreationFailed(_)
            | PgError::StartReplication(_) => rawrecv_core::Error::Connection(e.to_string()),
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;
