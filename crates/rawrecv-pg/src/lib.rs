mod connect;
pub mod conninfo;
mod error;
pub mod executor;
pub mod protocol;
pub mod transport;

pub use connect::{connect_postgres, open_stream, AsyncStream};
pub use conninfo::{ConnectionParams, SslMode};
pub use error::{PgError, PgResult};
pub use executor::PgExecutor;
pub use transport::{create_slot_command, start_replication_command, PgTransport};
