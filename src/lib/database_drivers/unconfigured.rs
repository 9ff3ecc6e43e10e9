use crate::config::Backend;
use crate::database_drivers::DatabaseDriver;
use crate::error::Result;
use crate::value::{Record, Value};
use log::warn;
use std::future::Future;
use std::pin::Pin;

/// Stand-in used when no database url is configured. Every operation
/// succeeds, returns nothing and logs a notice.
#[derive(Debug, Default)]
pub struct UnconfiguredDriver {}

impl UnconfiguredDriver {
    pub fn new() -> UnconfiguredDriver {
        warn!("Database not yet configured");
        UnconfiguredDriver {}
    }
}

impl DatabaseDriver for UnconfiguredDriver {
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        _params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        let fut = async move {
            warn!("Database not yet configured, ignoring query: {}", statement);
            Ok(vec![])
        };

        Box::pin(fut)
    }

    fn execute<'a>(
        &'a mut self,
        statement: &'a str,
        _params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        let fut = async move {
            warn!("Database not yet configured, ignoring statement: {}", statement);
            Ok(0)
        };

        Box::pin(fut)
    }

    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let fut = async move { Ok(()) };

        Box::pin(fut)
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move { Ok(()) })
    }

    fn backend(&self) -> Backend {
        Backend::Unconfigured
    }
}
