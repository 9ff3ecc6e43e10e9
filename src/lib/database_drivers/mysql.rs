use crate::config::Backend;
use crate::database_drivers::{utils, DatabaseDriver};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use futures::TryStreamExt;
use log::{debug, info};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, MySql, MySqlConnection, Row, TypeInfo, ValueRef};
use std::future::Future;
use std::pin::Pin;

pub struct MySQLDriver {
    db: MySqlConnection,
    backend: Backend,
}

impl MySQLDriver {
    pub async fn new(db_url: &str, wait_timeout: usize) -> Result<MySQLDriver> {
        MySQLDriver::connect(Backend::MySQL, db_url, wait_timeout).await
    }

    // MariaDB speaks the same protocol and reuses this driver under its own name
    pub(crate) async fn connect(
        backend: Backend,
        db_url: &str,
        wait_timeout: usize,
    ) -> Result<MySQLDriver> {
        let db = utils::connect_with_retry(backend, wait_timeout, || {
            MySqlConnection::connect(db_url)
        })
        .await?;

        info!("Connected to {}", backend);

        Ok(MySQLDriver { db, backend })
    }
}

fn bind_values<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
            Value::Timestamp(t) => query.bind(*t),
            Value::Json(j) => query.bind(sqlx::types::Json(j.clone())),
        };
    }

    query
}

fn decode_row(row: &MySqlRow) -> Result<Record> {
    let mut record = Record::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "BOOLEAN" => Value::Bool(row.try_get(index)?),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                    Value::Int(row.try_get_unchecked::<i64, _>(index)?)
                }
                "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED"
                | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
                    let unsigned = row.try_get_unchecked::<u64, _>(index)?;
                    match i64::try_from(unsigned) {
                        Ok(i) => Value::Int(i),
                        Err(_) => Value::Text(unsigned.to_string()),
                    }
                }
                "FLOAT" => Value::Float(row.try_get::<f32, _>(index)?.into()),
                "DOUBLE" => Value::Float(row.try_get(index)?),
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" => {
                    Value::Bytes(row.try_get_unchecked(index)?)
                }
                "TIMESTAMP" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
                "DATETIME" => {
                    let naive: NaiveDateTime = row.try_get(index)?;
                    Value::Timestamp(Utc.from_utc_datetime(&naive))
                }
                "DATE" => Value::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
                "TIME" => Value::Text(row.try_get::<NaiveTime, _>(index)?.to_string()),
                "JSON" => Value::Json(row.try_get(index)?),
                // DECIMAL, ENUM, SET and the text family all arrive as strings
                _ => Value::Text(row.try_get_unchecked::<String, _>(index).map_err(|e| {
                    DatabaseError::Query(format!(
                        "column {} has unsupported type {}: {}",
                        column.name(),
                        type_name,
                        e
                    ))
                })?),
            }
        };

        record.push(column.name(), value);
    }

    Ok(record)
}

impl DatabaseDriver for MySQLDriver {
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        let fut = async move {
            debug!("{} query: {}", self.backend, statement);

            let mut rows = bind_values(sqlx::query(statement), params).fetch(&mut self.db);
            let mut records = vec![];
            while let Some(row) = rows.try_next().await? {
                records.push(decode_row(&row)?);
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
            debug!("{} execute: {}", self.backend, statement);

            let result = bind_values(sqlx::query(statement), params)
                .execute(&mut self.db)
                .await?;

            Ok(result.rows_affected())
        };

        Box::pin(fut)
    }

    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let fut = async move {
            sqlx::query("SELECT 1").execute(&mut self.db).await?;
            Ok(())
        };

        Box::pin(fut)
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            self.db.close().await?;
            Ok(())
        })
    }

    fn backend(&self) -> Backend {
        self.backend
    }
}
