use crate::config::Backend;
use crate::database_drivers::{utils, DatabaseDriver};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use futures::TryStreamExt;
use log::{debug, info};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};
use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;

pub struct SqliteDriver {
    db: SqliteConnection,
}

impl SqliteDriver {
    pub async fn new(db_url: &str) -> Result<SqliteDriver> {
        let path = utils::parse_sqlite_path(db_url);

        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(|e| {
                        DatabaseError::Connection(format!(
                            "cannot create directory for {}: {}",
                            path, e
                        ))
                    })?;
                }
            }

            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // SQlite is a local file, so there is nothing to wait for
        let db = options
            .connect()
            .await
            .map_err(|e| DatabaseError::Connection(format!("cannot open {}: {}", path, e)))?;

        info!("Opened sqlite database at {}", path);

        Ok(SqliteDriver { db })
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
            Value::Timestamp(t) => query.bind(*t),
            Value::Json(j) => query.bind(j.to_string()),
        };
    }

    query
}

// sqlite reports the storage class of each value, not the declared column type
fn decode_row(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" => Value::Int(row.try_get_unchecked(index)?),
                "REAL" => Value::Float(row.try_get_unchecked(index)?),
                "BLOB" => Value::Bytes(row.try_get_unchecked(index)?),
                _ => Value::Text(row.try_get_unchecked(index)?),
            }
        };

        record.push(column.name(), value);
    }

    Ok(record)
}

impl DatabaseDriver for SqliteDriver {
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        let fut = async move {
            debug!("sqlite query: {}", statement);

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
            debug!("sqlite execute: {}", statement);

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
        Backend::SQLite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::database_test_utils::*;

    #[tokio::test]
    async fn test_select_one() {
        let mut driver = SqliteDriver::new("sqlite::memory:").await.unwrap();
        let records = driver.query("SELECT 1", &[]).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0].columns(), &["1"]);
        assert_eq!(records[0].get_index(0), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_creates_missing_file_and_parents() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("nested/dir/app.db");
        let url = format!("sqlite://{}", path.display());

        let mut driver = SqliteDriver::new(&url).await.unwrap();
        driver.ready().await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_params_bind_positionally() {
        let mut driver = SqliteDriver::new("sqlite::memory:").await.unwrap();
        create_users_table(&mut driver).await;

        let inserted = driver
            .execute(
                "INSERT INTO users (name, age, score, avatar, active) VALUES (?, ?, ?, ?, ?)",
                &[
                    Value::from("alice"),
                    Value::from(31),
                    Value::from(9.5),
                    Value::from(vec![1u8, 2, 3]),
                    Value::from(true),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        driver
            .execute(
                "INSERT INTO users (name, age, score, avatar, active) VALUES (?, ?, ?, ?, ?)",
                &[Value::from("bob"), Value::Null, Value::Null, Value::Null, Value::from(false)],
            )
            .await
            .unwrap();

        let records = driver
            .query(
                "SELECT name, age, score, avatar, active FROM users ORDER BY name",
                &[],
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some(&Value::Text("alice".into())));
        assert_eq!(records[0].get("age"), Some(&Value::Int(31)));
        assert_eq!(records[0].get("score"), Some(&Value::Float(9.5)));
        assert_eq!(records[0].get("avatar"), Some(&Value::Bytes(vec![1, 2, 3])));
        assert_eq!(records[0].get("active"), Some(&Value::Int(1)));

        assert_eq!(records[1].get("name"), Some(&Value::Text("bob".into())));
        assert_eq!(records[1].get("age"), Some(&Value::Null));
        assert_eq!(records[1].get("score"), Some(&Value::Null));
        assert_eq!(records[1].get("avatar"), Some(&Value::Null));
        assert_eq!(records[1].get("active"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn test_filter_with_param() {
        let mut driver = SqliteDriver::new("sqlite::memory:").await.unwrap();
        create_users_table(&mut driver).await;

        for name in ["a", "b", "c"] {
            driver
                .execute("INSERT INTO users (name) VALUES (?)", &[Value::from(name)])
                .await
                .unwrap();
        }

        let records = driver
            .query("SELECT name FROM users WHERE name <> ?", &[Value::from("b")])
            .await
            .unwrap();
        let names: Vec<_> = records
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec!["a", "c"]);

        let deleted = driver.execute("DELETE FROM users", &[]).await.unwrap();
        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn test_json_param_is_stored_as_text() {
        let mut driver = SqliteDriver::new("sqlite::memory:").await.unwrap();
        let records = driver
            .query(
                "SELECT ? AS doc",
                &[Value::Json(serde_json::json!({"a": 1}))],
            )
            .await
            .unwrap();

        assert_eq!(records[0].get("doc"), Some(&Value::Text(r#"{"a":1}"#.into())));
    }

    #[tokio::test]
    async fn test_malformed_statement_is_query_error() {
        let mut driver = SqliteDriver::new("sqlite::memory:").await.unwrap();
        let err = driver.query("SELEC nothing", &[]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_query_error() {
        let mut driver = SqliteDriver::new("sqlite::memory:").await.unwrap();
        create_users_table(&mut driver).await;

        let err = driver
            .execute("INSERT INTO users (name) VALUES (?)", &[Value::Null])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)), "{:?}", err);
    }
}
