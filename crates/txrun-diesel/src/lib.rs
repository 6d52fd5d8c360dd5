//! Postgres adapter over `diesel-async` and `bb8`.

pub mod connection;
pub mod driver;
pub mod error;
pub mod provider;

pub use connection::{DbConnection, DbPool, create_pool, create_pool_from_config};
pub use driver::PostgresDriver;
pub use error::{DbError, DbResult};
pub use provider::{DieselProvider, Executor, ExecutorConnection, TxConnection};
