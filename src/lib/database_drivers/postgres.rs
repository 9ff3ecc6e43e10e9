use crate::config::Backend;
use crate::database_drivers::{utils, DatabaseDriver};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use futures::TryStreamExt;
use log::{debug, info};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo, PgValueFormat, PgValueRef,
};
use sqlx::query::Query;
use sqlx::types::Uuid;
use sqlx::{
    Column, Connection, Decode, Encode, PgConnection, Postgres, Row, Type, TypeInfo, ValueRef,
};
use std::future::Future;
use std::pin::Pin;

pub struct PostgresDriver {
    db: PgConnection,
}

impl PostgresDriver {
    pub async fn new(db_url: &str, wait_timeout: usize) -> Result<PostgresDriver> {
        let db = utils::connect_with_retry(Backend::Postgres, wait_timeout, || {
            PgConnection::connect(db_url)
        })
        .await?;

        info!("Connected to postgres");

        Ok(PostgresDriver { db })
    }
}

// A NULL parameter sent with oid 0, so the server infers its type from the
// statement instead of rejecting e.g. a text NULL for an integer column.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> IsNull {
        IsNull::Yes
    }
}

/// NUMERIC rendered exactly as decimal text.
struct NumericText(String);

impl<'r> Decode<'r, Postgres> for NumericText {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(NumericText(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(NumericText),
        }
    }
}

// binary NUMERIC: ndigits, weight, sign, dscale, then base 10000 digits
fn numeric_to_string(bytes: &[u8]) -> std::result::Result<String, BoxDynError> {
    let read = |at: usize| -> std::result::Result<i16, BoxDynError> {
        match bytes.get(at..at + 2) {
            Some(b) => Ok(i16::from_be_bytes([b[0], b[1]])),
            None => Err("truncated NUMERIC value".into()),
        }
    };

    let ndigits = read(0)? as usize;
    let weight = read(2)? as i64;
    let sign = read(4)? as u16;
    let dscale = read(6)? as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + i * 2).map(i64::from))
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    let digit = |i: i64| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

// ISO 8601 duration, e.g. P1Y2M3DT4.5S
fn interval_to_string(interval: &PgInterval) -> String {
    let mut out = String::from("P");
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        out.push_str(&format!("{}Y", years));
    }
    if months != 0 {
        out.push_str(&format!("{}M", months));
    }
    if interval.days != 0 {
        out.push_str(&format!("{}D", interval.days));
    }

    let micros = interval.microseconds;
    if micros != 0 || out.len() == 1 {
        let sign = if micros < 0 { "-" } else { "" };
        let (secs, frac) = (micros.abs() / 1_000_000, micros.abs() % 1_000_000);
        if frac == 0 {
            out.push_str(&format!("T{}{}S", sign, secs));
        } else {
            let frac = format!("{:06}", frac);
            out.push_str(&format!("T{}{}.{}S", sign, secs, frac.trim_end_matches('0')));
        }
    }

    out
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(UntypedNull),
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

fn decode_row(row: &PgRow) -> Result<Record> {
    let mut record = Record::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "BOOL" => Value::Bool(row.try_get(index)?),
                "INT2" => Value::Int(row.try_get::<i16, _>(index)?.into()),
                "INT4" => Value::Int(row.try_get::<i32, _>(index)?.into()),
                "INT8" => Value::Int(row.try_get(index)?),
                "FLOAT4" => Value::Float(row.try_get::<f32, _>(index)?.into()),
                "FLOAT8" => Value::Float(row.try_get(index)?),
                "BYTEA" => Value::Bytes(row.try_get(index)?),
                "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
                "TIMESTAMP" => {
                    let naive: NaiveDateTime = row.try_get(index)?;
                    Value::Timestamp(Utc.from_utc_datetime(&naive))
                }
                "JSON" | "JSONB" => Value::Json(row.try_get(index)?),
                "NUMERIC" => Value::Text(row.try_get_unchecked::<NumericText, _>(index)?.0),
                "UUID" => Value::Text(row.try_get::<Uuid, _>(index)?.to_string()),
                "DATE" => Value::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
                "TIME" => Value::Text(row.try_get::<NaiveTime, _>(index)?.to_string()),
                "INTERVAL" => Value::Text(interval_to_string(&row.try_get(index)?)),
                // text family, enums and domains over text arrive as utf-8 bytes
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

impl DatabaseDriver for PostgresDriver {
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        let fut = async move {
            debug!("postgres query: {}", statement);

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
            debug!("postgres execute: {}", statement);

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
        Backend::Postgres
    }
}
