use crate::error::{DatabaseError, Result};
use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const DEFAULT_ENV_WAIT_TIMEOUT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Unconfigured,
    LibSQL,
    Postgres,
    MariaDB,
    MySQL,
    SQLite,
    MongoDB,
}

impl Backend {
    pub fn new(s: &str) -> Result<Backend> {
        match s {
            "https" | "http" | "libsql" => Ok(Backend::LibSQL),
            "psql" | "postgres" | "postgresql" => Ok(Backend::Postgres),
            "mariadb" => Ok(Backend::MariaDB),
            "mysql" => Ok(Backend::MySQL),
            "sqlite" | "sqlite3" => Ok(Backend::SQLite),
            "mongodb" | "mongodb+srv" => Ok(Backend::MongoDB),
            _ => Err(DatabaseError::Configuration(format!(
                "Unsupported database driver: {}",
                s
            ))),
        }
    }

    /// Picks the backend from the scheme of a connection url.
    pub fn from_url(db_url: &str) -> Result<Backend> {
        let parsed = url::Url::parse(db_url)?;
        Backend::new(parsed.scheme())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Unconfigured => "unconfigured",
            Backend::LibSQL => "libsql",
            Backend::Postgres => "postgres",
            Backend::MariaDB => "mariadb",
            Backend::MySQL => "mysql",
            Backend::SQLite => "sqlite",
            Backend::MongoDB => "mongodb",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to acquire a handle. Passed explicitly to `acquire` and
/// `Pool::new`; nothing in the library reads the environment on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Connection url. `None` selects the unconfigured backend.
    pub url: Option<String>,
    /// Auth token for hosted libSQL.
    pub token: Option<String>,
    /// Seconds to keep retrying a refused connection, one attempt per second.
    pub wait_timeout: usize,
    pub connect_timeout: Option<Duration>,
    pub query_timeout: Option<Duration>,
    pub acquire_timeout: Option<Duration>,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            token: None,
            wait_timeout: 0,
            connect_timeout: None,
            query_timeout: None,
            acquire_timeout: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> DatabaseConfig {
        DatabaseConfig {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_wait_timeout(mut self, seconds: usize) -> Self {
        self.wait_timeout = seconds;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn backend(&self) -> Result<Backend> {
        match &self.url {
            Some(url) => Backend::from_url(url),
            None => Ok(Backend::Unconfigured),
        }
    }

    /// Builds a config from the `DATABASE_*` environment variables.
    ///
    /// The url is taken from `DATABASE_URL`, then `POSTGRES_URL`, then
    /// `MONGODB_URI`. Empty variables are treated as unset and a missing url
    /// yields the unconfigured backend.
    pub fn from_env() -> Result<DatabaseConfig> {
        let url = env_var("DATABASE_URL")
            .or_else(|| env_var("POSTGRES_URL"))
            .or_else(|| env_var("MONGODB_URI"));

        let mut config = DatabaseConfig {
            url,
            token: env_var("DATABASE_TOKEN"),
            wait_timeout: DEFAULT_ENV_WAIT_TIMEOUT,
            ..Default::default()
        };

        if let Some(v) = env_var("DATABASE_WAIT_TIMEOUT") {
            config.wait_timeout = parse_number("DATABASE_WAIT_TIMEOUT", &v)?;
        }

        if let Some(v) = env_var("DATABASE_QUERY_TIMEOUT") {
            config.query_timeout = Some(Duration::from_secs(parse_number(
                "DATABASE_QUERY_TIMEOUT",
                &v,
            )?));
        }

        if let Some(v) = env_var("DATABASE_POOL_SIZE") {
            config.pool_size = parse_number("DATABASE_POOL_SIZE", &v)?;
        }

        Ok(config)
    }
}

fn env_var(key: &str) -> Option<String> {
    if let Ok(v) = env::var(key) {
        if !v.is_empty() {
            return Some(v);
        }
    }

    None
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        DatabaseError::Configuration(format!("{} must be a whole number, got {:?}", key, value))
    })
}
