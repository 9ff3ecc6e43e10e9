use crate::config::{Backend, DatabaseConfig};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use std::future::Future;
use std::pin::Pin;

pub mod libsql;
pub mod maria;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod unconfigured;
pub(crate) mod utils;

// DatabaseDriver is a trait that all database drivers must implement
pub trait DatabaseDriver: Send {
    // run a statement that returns rows
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>>;

    // run a statement for its side effects and report rows affected
    fn execute<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

    // round-trip a trivial statement
    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    // release the underlying connection
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;

    fn backend(&self) -> Backend;
}

// Creates a new database driver based on the configured url
pub async fn new(config: &DatabaseConfig) -> Result<Box<dyn DatabaseDriver>> {
    utils::with_deadline(config.connect_timeout, open(config)).await
}

async fn open(config: &DatabaseConfig) -> Result<Box<dyn DatabaseDriver>> {
    let db_url = match &config.url {
        Some(url) => url.as_str(),
        None => return Ok(Box::new(unconfigured::UnconfiguredDriver::new())),
    };

    let mut parsed_db_url = url::Url::parse(db_url)?;

    match Backend::new(parsed_db_url.scheme())? {
        Backend::Unconfigured => Ok(Box::new(unconfigured::UnconfiguredDriver::new())),
        Backend::LibSQL => {
            let driver =
                libsql::LibSQLDriver::new(db_url, config.token.clone(), config.wait_timeout)
                    .await?;
            Ok(Box::new(driver))
        }
        Backend::Postgres => {
            parsed_db_url.set_scheme("postgresql").map_err(|_| {
                DatabaseError::Configuration(format!("Cannot use {} as a postgres url", db_url))
            })?;
            let driver =
                postgres::PostgresDriver::new(parsed_db_url.as_str(), config.wait_timeout).await?;
            Ok(Box::new(driver))
        }
        Backend::MySQL => {
            let driver = mysql::MySQLDriver::new(parsed_db_url.as_str(), config.wait_timeout).await?;
            Ok(Box::new(driver))
        }
        Backend::MariaDB => {
            let driver = maria::MariaDBDriver::new(parsed_db_url, config.wait_timeout).await?;
            Ok(Box::new(driver))
        }
        Backend::SQLite => {
            let driver = sqlite::SqliteDriver::new(db_url).await?;
            Ok(Box::new(driver))
        }
        #[cfg(feature = "mongodb")]
        Backend::MongoDB => {
            let driver = mongo::MongoDriver::new(db_url, config.wait_timeout).await?;
            Ok(Box::new(driver))
        }
        #[cfg(not(feature = "mongodb"))]
        Backend::MongoDB => Err(DatabaseError::Configuration(
            "mongodb support is disabled, rebuild with the mongodb feature".to_string(),
        )),
    }
}
