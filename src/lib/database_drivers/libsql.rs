use crate::config::Backend;
use crate::database_drivers::{utils, DatabaseDriver};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use libsql::params::Params;
use libsql::{Builder, Connection, Database};
use log::{debug, info};
use std::future::Future;
use std::pin::Pin;

pub struct LibSQLDriver {
    // the remote database owns the http client the connection uses
    _database: Database,
    db: Connection,
}

impl LibSQLDriver {
    pub async fn new(
        db_url: &str,
        token: Option<String>,
        wait_timeout: usize,
    ) -> Result<LibSQLDriver> {
        if db_url.starts_with("libsql://./") {
            return Err(DatabaseError::Configuration("libsql:// should only be used with remote database. Use sqlite:// protocol when running local sqlite files".to_string()));
        }

        let auth_token = if let Some(t) = token {
            t
        } else {
            info!("Token is not set, using empty string");
            "".to_string()
        };

        let database = Builder::new_remote(db_url.to_owned(), auth_token)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = database
            .connect()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        // the remote client connects lazily, ping to surface an unreachable or
        // unauthenticated store now
        utils::connect_with_retry(Backend::LibSQL, wait_timeout, || {
            db.query("SELECT 1", ())
        })
        .await?;

        info!("Connected to libsql");

        Ok(LibSQLDriver {
            _database: database,
            db,
        })
    }
}

fn to_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::None;
    }

    Params::Positional(params.iter().map(to_libsql_value).collect())
}

fn to_libsql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Int(i) => libsql::Value::Integer(*i),
        Value::Float(f) => libsql::Value::Real(*f),
        Value::Text(s) => libsql::Value::Text(s.clone()),
        Value::Bytes(b) => libsql::Value::Blob(b.clone()),
        Value::Timestamp(t) => libsql::Value::Text(t.to_rfc3339()),
        Value::Json(j) => libsql::Value::Text(j.to_string()),
    }
}

fn from_libsql_value(value: libsql::Value) -> Value {
    match value {
        libsql::Value::Null => Value::Null,
        libsql::Value::Integer(i) => Value::Int(i),
        libsql::Value::Real(f) => Value::Float(f),
        libsql::Value::Text(s) => Value::Text(s),
        libsql::Value::Blob(b) => Value::Bytes(b),
    }
}

impl DatabaseDriver for LibSQLDriver {
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        let fut = async move {
            debug!("libsql query: {}", statement);

            let mut rows = self.db.query(statement, to_params(params)).await?;

            let columns: Vec<String> = (0..rows.column_count())
                .map(|i| rows.column_name(i).unwrap_or_default().to_string())
                .collect();

            let mut records = vec![];
            while let Some(row) = rows.next().await? {
                let mut record = Record::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    let value = row.get_value(i as i32)?;
                    record.push(name.as_str(), from_libsql_value(value));
                }
                records.push(record);
            }

            Ok(records)
        };

        Box::pin(fut)
    }

    fn execute<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        let fut = async move {
            debug!("libsql execute: {}", statement);

            let affected = self.db.execute(statement, to_params(params)).await?;
            Ok(affected)
        };

        Box::pin(fut)
    }

    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let fut = async move {
            self.db.query("SELECT 1", ()).await?;
            Ok(())
        };

        Box::pin(fut)
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }

    fn backend(&self) -> Backend {
        Backend::LibSQL
    }
}
