//! A database access facade.
//!
//! Application code acquires a [`Handle`] and runs queries through it without
//! knowing which store sits behind it. The store is picked from the url in a
//! [`DatabaseConfig`]: postgres, mysql, mariadb, sqlite, hosted libSQL or
//! mongodb. Without a url the unconfigured backend answers every query with an
//! empty result.
//!
//! ```no_run
//! # async fn run() -> datagate::Result<()> {
//! use datagate::{DatabaseConfig, Value};
//!
//! let config = DatabaseConfig::new("sqlite://./app.db");
//! let mut handle = datagate::acquire(&config).await?;
//! let rows = handle
//!     .query("SELECT name FROM users WHERE id = ?", &[Value::Int(1)])
//!     .await?;
//! # Ok(())
//! # }
//! ```
mod config;
pub mod database_drivers;
mod error;
mod handle;
mod pool;
mod value;

#[cfg(test)]
mod test_utils;

pub use config::{Backend, DatabaseConfig};
pub use error::{DatabaseError, Result};
pub use handle::Handle;
pub use pool::{Pool, PooledHandle};
pub use value::{Record, Value};

use std::sync::Arc;

/// Opens a fresh handle for the caller to own. Use [`pool`] instead when many
/// callers should share a bounded set of connections.
pub async fn acquire(config: &DatabaseConfig) -> Result<Handle> {
    Handle::connect(Arc::new(config.clone())).await
}

/// Builds a pool of up to `config.pool_size` connections. Nothing connects
/// until the first lease is acquired.
pub fn pool(config: DatabaseConfig) -> Result<Pool> {
    Pool::new(config)
}
