use crate::config::{Backend, DatabaseConfig};
use crate::database_drivers::DatabaseDriver;
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use std::future::Future;
use std::net::TcpListener;
use std::pin::Pin;
use tempfile::TempDir;

/// Config for a private in-memory sqlite database
pub fn memory_config() -> DatabaseConfig {
    DatabaseConfig::new("sqlite::memory:")
}

/// Config for a sqlite file inside `dir`, shared by every connection opened from it
pub fn sqlite_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig::new(format!("sqlite://{}", dir.path().join("test.db").display()))
}

/// A local port with nothing listening on it
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn create_users_table(driver: &mut dyn DatabaseDriver) {
    driver
        .execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, score REAL, avatar BLOB, active BOOLEAN)",
            &[],
        )
        .await
        .unwrap();
}

/// Driver whose operations never complete, for exercising cancellation
pub struct PendingDriver;

impl DatabaseDriver for PendingDriver {
    fn query<'a>(
        &'a mut self,
        _statement: &'a str,
        _params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        Box::pin(futures::future::pending())
    }

    fn execute<'a>(
        &'a mut self,
        _statement: &'a str,
        _params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(futures::future::pending())
    }

    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(futures::future::pending())
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move { Ok(()) })
    }

    fn backend(&self) -> Backend {
        Backend::Unconfigured
    }
}

/// Driver whose store went away: every operation fails with a connection error
pub struct BrokenDriver;

fn gone<T>() -> Result<T> {
    Err(DatabaseError::Connection("connection reset by peer".to_string()))
}

impl DatabaseDriver for BrokenDriver {
    fn query<'a>(
        &'a mut self,
        _statement: &'a str,
        _params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        Box::pin(async { gone() })
    }

    fn execute<'a>(
        &'a mut self,
        _statement: &'a str,
        _params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(async { gone() })
    }

    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { gone() })
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move { Ok(()) })
    }

    fn backend(&self) -> Backend {
        Backend::Unconfigured
    }
}
