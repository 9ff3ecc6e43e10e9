use std::time::Duration;
use thiserror::Error;

/// Every failure the facade can surface to callers of `acquire` or `query`.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Missing or invalid connection parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store is unreachable or rejected the credentials.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed statement, constraint violation or undecodable result.
    #[error("query error: {0}")]
    Query(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

impl From<url::ParseError> for DatabaseError {
    fn from(err: url::ParseError) -> Self {
        DatabaseError::Configuration(format!("invalid database url: {}", err))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => DatabaseError::Configuration(e.to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DatabaseError::Connection(err.to_string()),
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

impl From<libsql::Error> for DatabaseError {
    fn from(err: libsql::Error) -> Self {
        match &err {
            libsql::Error::ConnectionFailed(_) | libsql::Error::InvalidTlsConfiguration(_) => {
                DatabaseError::Connection(err.to_string())
            }
            // hrana errors are boxed, only the message tells transport failures
            // apart from statement errors reported by the server
            libsql::Error::Hrana(e) if is_hrana_transport_error(&e.to_string()) => {
                DatabaseError::Connection(err.to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

fn is_hrana_transport_error(message: &str) -> bool {
    message.starts_with("http error") || message.starts_with("stream closed")
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for DatabaseError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match *err.kind {
            ErrorKind::Command(_) | ErrorKind::Write(_) | ErrorKind::BulkWrite(_) => {
                DatabaseError::Query(err.to_string())
            }
            ErrorKind::InvalidArgument { .. } => DatabaseError::Configuration(err.to_string()),
            _ => DatabaseError::Connection(err.to_string()),
        }
    }
}
