use crate::config::Backend;
use crate::error::{DatabaseError, Result};
use log::info;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Runs `fut` to completion, or fails with `Timeout` once `deadline` elapses.
/// The inner future is dropped on timeout.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| DatabaseError::Timeout(d))?,
        None => fut.await,
    }
}

/// Keeps calling `connect` once per second until it succeeds or
/// `wait_timeout` retries have been spent.
pub async fn connect_with_retry<T, E, F, Fut>(
    backend: Backend,
    wait_timeout: usize,
    mut connect: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut count = 0;
    loop {
        match connect().await {
            Ok(c) => return Ok(c),
            Err(e) => {
                if count >= wait_timeout {
                    return Err(DatabaseError::Connection(format!(
                        "{} is not ready: {}",
                        backend, e
                    )));
                }

                info!("Waiting for database to be ready");
                count += 1;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

pub fn parse_sqlite_path(db_url: &str) -> &str {
    if let Some((_, path)) = db_url.split_once("://") {
        return path;
    }

    db_url
        .strip_prefix("sqlite3:")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url)
}
