use crate::config::{Backend, DatabaseConfig};
use crate::database_drivers::{self, utils, DatabaseDriver};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use log::{debug, warn};
use std::sync::Arc;

/// A usable connection to the configured store.
///
/// If a `query` or `execute` future is dropped before it completes, or the
/// operation fails with a connection error, the connection is in an unknown
/// state. The handle remembers that and opens a fresh connection before its
/// next operation, so nothing from the abandoned call can leak into a later
/// result.
pub struct Handle {
    driver: Box<dyn DatabaseDriver>,
    config: Arc<DatabaseConfig>,
    abandoned: bool,
}

impl Handle {
    pub(crate) async fn connect(config: Arc<DatabaseConfig>) -> Result<Handle> {
        let driver = database_drivers::new(&config).await?;
        debug!("Acquired {} handle", driver.backend());

        Ok(Handle {
            driver,
            config,
            abandoned: false,
        })
    }

    /// Wraps a driver that was built outside the factory, e.g. a custom
    /// backend. `config` supplies the timeouts and is used to reconnect after
    /// an abandoned operation.
    pub fn from_driver(driver: Box<dyn DatabaseDriver>, config: DatabaseConfig) -> Handle {
        Handle {
            driver,
            config: Arc::new(config),
            abandoned: false,
        }
    }

    pub fn backend(&self) -> Backend {
        self.driver.backend()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// True while an operation is in flight, or after one was dropped mid-way
    /// or lost its connection.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub async fn query(&mut self, statement: &str, params: &[Value]) -> Result<Vec<Record>> {
        self.recover().await?;

        self.abandoned = true;
        let result = utils::with_deadline(
            self.config.query_timeout,
            self.driver.query(statement, params),
        )
        .await;
        self.settle(&result);

        result
    }

    pub async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<u64> {
        self.recover().await?;

        self.abandoned = true;
        let result = utils::with_deadline(
            self.config.query_timeout,
            self.driver.execute(statement, params),
        )
        .await;
        self.settle(&result);

        result
    }

    pub async fn ready(&mut self) -> Result<()> {
        self.recover().await?;

        self.abandoned = true;
        let result = utils::with_deadline(self.config.query_timeout, self.driver.ready()).await;
        self.settle(&result);

        result
    }

    pub async fn close(self) -> Result<()> {
        debug!("Closing {} handle", self.driver.backend());
        self.driver.close().await
    }

    // a timed out operation was dropped mid-flight and a connection error
    // leaves a dead socket behind, so both keep the handle abandoned
    fn settle<T>(&mut self, result: &Result<T>) {
        if !matches!(
            result,
            Err(DatabaseError::Timeout(_)) | Err(DatabaseError::Connection(_))
        ) {
            self.abandoned = false;
        }
    }

    async fn recover(&mut self) -> Result<()> {
        if !self.abandoned {
            return Ok(());
        }

        warn!(
            "Previous {} operation was abandoned, reconnecting",
            self.driver.backend()
        );
        self.driver = database_drivers::new(&self.config).await?;
        self.abandoned = false;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::database_test_utils::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unconfigured_handle_returns_nothing() {
        let mut handle = Handle::connect(Arc::new(DatabaseConfig::default()))
            .await
            .unwrap();

        assert_eq!(handle.backend(), Backend::Unconfigured);
        assert!(handle.query("SELECT 1", &[]).await.unwrap().is_empty());
        assert_eq!(handle.execute("DELETE FROM t", &[]).await.unwrap(), 0);
        handle.ready().await.unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_timeout_abandons_handle() {
        let config = DatabaseConfig::default().with_query_timeout(Duration::from_millis(20));
        let mut handle = Handle::from_driver(Box::new(PendingDriver), config);

        let err = handle.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Timeout(_)));
        assert!(handle.is_abandoned());

        // the next call reconnects through the config, here the unconfigured backend
        let records = handle.query("SELECT 1", &[]).await.unwrap();
        assert!(records.is_empty());
        assert!(!handle.is_abandoned());
        assert_eq!(handle.backend(), Backend::Unconfigured);
    }

    #[tokio::test]
    async fn test_dropped_query_abandons_handle() {
        let mut handle = Handle::from_driver(Box::new(PendingDriver), DatabaseConfig::default());

        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            handle.query("SELECT 1", &[]),
        )
        .await;
        assert!(attempt.is_err());
        assert!(handle.is_abandoned());

        handle.ready().await.unwrap();
        assert!(!handle.is_abandoned());
    }

    #[tokio::test]
    async fn test_connection_error_reconnects() {
        let mut handle = Handle::from_driver(Box::new(BrokenDriver), DatabaseConfig::default());

        let err = handle.execute("UPDATE t SET v = 1", &[]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connection(_)));
        assert!(handle.is_abandoned());

        assert!(handle.query("SELECT 1", &[]).await.unwrap().is_empty());
        assert!(!handle.is_abandoned());
        assert_eq!(handle.backend(), Backend::Unconfigured);
    }

    #[tokio::test]
    async fn test_query_errors_do_not_abandon() {
        let mut handle = Handle::connect(Arc::new(memory_config())).await.unwrap();

        let err = handle.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
        assert!(!handle.is_abandoned());
        assert_eq!(handle.backend(), Backend::SQLite);
    }
}
