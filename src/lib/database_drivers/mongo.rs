use crate::config::Backend;
use crate::database_drivers::{utils, DatabaseDriver};
use crate::error::{DatabaseError, Result};
use crate::value::{Record, Value};
use chrono::{TimeZone, Utc};
use log::{debug, info};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Client, Database};
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

const DEFAULT_DATABASE: &str = "test";

/// Document store driver. Statements are JSON command documents, e.g.
/// `{"find": "users", "filter": {"age": {"$gt": "$1"}}}`, run against the
/// database named in the connection url.
pub struct MongoDriver {
    db: Database,
}

impl MongoDriver {
    pub async fn new(db_url: &str, wait_timeout: usize) -> Result<MongoDriver> {
        let client = Client::with_uri_str(db_url).await?;

        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));

        // the client connects lazily, ping to surface an unreachable server now
        utils::connect_with_retry(Backend::MongoDB, wait_timeout, || {
            db.run_command(doc! { "ping": 1 }, None)
        })
        .await?;

        info!("Connected to mongodb database {}", db.name());

        Ok(MongoDriver { db })
    }

    async fn run(&self, statement: &str, params: &[Value]) -> Result<Document> {
        let command = command_document(statement, params)?;
        Ok(self.db.run_command(command, None).await?)
    }

    // drain a cursor reply, following up with getMore until the server closes it
    async fn collect_cursor(&self, reply: Document) -> Result<Option<Vec<Record>>> {
        let cursor = match reply.get_document("cursor") {
            Ok(cursor) => cursor,
            Err(_) => return Ok(None),
        };

        let mut records = batch_records(cursor, "firstBatch")?;
        let mut cursor_id = cursor.get_i64("id").unwrap_or(0);
        let collection = cursor
            .get_str("ns")
            .ok()
            .and_then(|ns| ns.split_once('.'))
            .map(|(_, collection)| collection.to_string());

        while cursor_id != 0 {
            let collection = match &collection {
                Some(c) => c.as_str(),
                None => break,
            };

            let reply = self
                .db
                .run_command(doc! { "getMore": cursor_id, "collection": collection }, None)
                .await?;
            let cursor = reply
                .get_document("cursor")
                .map_err(|e| DatabaseError::Query(format!("malformed getMore reply: {}", e)))?;

            records.extend(batch_records(cursor, "nextBatch")?);
            cursor_id = cursor.get_i64("id").unwrap_or(0);
        }

        Ok(Some(records))
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"^\$([0-9]+)$").expect("placeholder pattern is valid"))
}

/// Replaces every string that is exactly `$N` with the N-th parameter (1-based).
pub fn bind_placeholders(json: &mut serde_json::Value, params: &[Value]) -> Result<()> {
    match json {
        serde_json::Value::String(s) => {
            let position = placeholder()
                .captures(s)
                .and_then(|captures| captures[1].parse::<usize>().ok());

            if let Some(position) = position {
                let value = position
                    .checked_sub(1)
                    .and_then(|i| params.get(i))
                    .ok_or_else(|| {
                        DatabaseError::Query(format!(
                            "placeholder {} has no parameter, {} given",
                            s,
                            params.len()
                        ))
                    })?;
                *json = value.to_json();
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                bind_placeholders(item, params)?;
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                bind_placeholders(item, params)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Parses a JSON command, binds its placeholders and converts it to BSON.
/// Key order is preserved, as MongoDB reads the command name from the first key.
pub fn command_document(statement: &str, params: &[Value]) -> Result<Document> {
    let mut json: serde_json::Value = serde_json::from_str(statement)
        .map_err(|e| DatabaseError::Query(format!("invalid command document: {}", e)))?;

    bind_placeholders(&mut json, params)?;

    match bson::to_bson(&json) {
        Ok(Bson::Document(command)) => Ok(command),
        Ok(_) => Err(DatabaseError::Query(
            "command must be a JSON object".to_string(),
        )),
        Err(e) => Err(DatabaseError::Query(e.to_string())),
    }
}

fn batch_records(cursor: &Document, key: &str) -> Result<Vec<Record>> {
    let batch = cursor
        .get_array(key)
        .map_err(|e| DatabaseError::Query(format!("malformed cursor reply: {}", e)))?;

    Ok(batch
        .iter()
        .map(|item| match item {
            Bson::Document(document) => document_record(document),
            other => Record::from_iter([("value", bson_value(other))]),
        })
        .collect())
}

pub fn document_record(document: &Document) -> Record {
    document
        .iter()
        .map(|(key, value)| (key.as_str(), bson_value(value)))
        .collect()
}

pub fn bson_value(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Int((*i).into()),
        Bson::Int64(i) => Value::Int(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) => Value::Text(s.clone()),
        Bson::ObjectId(id) => Value::Text(id.to_hex()),
        Bson::Binary(binary) => Value::Bytes(binary.bytes.clone()),
        Bson::DateTime(dt) => match Utc.timestamp_millis_opt(dt.timestamp_millis()).single() {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Json(value.clone().into_relaxed_extjson()),
        },
        other => Value::Json(other.clone().into_relaxed_extjson()),
    }
}

fn affected_count(reply: &Document) -> u64 {
    match reply.get("n") {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

impl DatabaseDriver for MongoDriver {
    fn query<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>> {
        let fut = async move {
            debug!("mongodb command: {}", statement);

            let reply = self.run(statement, params).await?;
            match self.collect_cursor(reply.clone()).await? {
                Some(records) => Ok(records),
                None => Ok(vec![document_record(&reply)]),
            }
        };

        Box::pin(fut)
    }

    fn execute<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        let fut = async move {
            debug!("mongodb command: {}", statement);

            let reply = self.run(statement, params).await?;
            Ok(affected_count(&reply))
        };

        Box::pin(fut)
    }

    fn ready(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let fut = async move {
            self.db.run_command(doc! { "ping": 1 }, None).await?;
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
        Backend::MongoDB
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use serde_json::json;

    #[tokio::test]
    async fn test_malformed_uri_is_configuration_error() {
        let err = MongoDriver::new("mongodb://", 0).await.err().unwrap();
        assert!(matches!(err, DatabaseError::Configuration(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_unresolvable_srv_is_connection_error() {
        let err = MongoDriver::new("mongodb+srv://cluster.datagate.invalid/app", 0)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DatabaseError::Connection(_)), "{:?}", err);
    }

    #[test]
    fn test_command_document_keeps_key_order() {
        let command =
            command_document(r#"{"find": "users", "filter": {}, "limit": 5}"#, &[]).unwrap();
        let keys: Vec<&str> = command.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["find", "filter", "limit"]);
    }

    #[test]
    fn test_command_document_binds_placeholders() {
        let command = command_document(
            r#"{"find": "users", "filter": {"age": {"$gt": "$1"}, "name": {"$in": ["$2", "$3"]}}}"#,
            &[Value::Int(30), Value::from("alice"), Value::Null],
        )
        .unwrap();

        let filter = command.get_document("filter").unwrap();
        assert_eq!(
            filter.get_document("age").unwrap().get("$gt"),
            Some(&Bson::Int64(30))
        );
        let names = filter.get_document("name").unwrap().get_array("$in").unwrap();
        assert_eq!(names[0], Bson::String("alice".to_string()));
        assert_eq!(names[1], Bson::Null);
    }

    #[test]
    fn test_operator_strings_are_not_placeholders() {
        let mut json = json!({"$match": "$field", "x": "$$ROOT", "y": "$1a"});
        bind_placeholders(&mut json, &[]).unwrap();
        assert_eq!(json, json!({"$match": "$field", "x": "$$ROOT", "y": "$1a"}));
    }

    #[test]
    fn test_missing_parameter_is_query_error() {
        let err = command_document(r#"{"find": "users", "filter": {"a": "$2"}}"#, &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
        assert!(err.to_string().contains("$2"));

        let err = command_document(r#"{"find": "users", "filter": {"a": "$0"}}"#, &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
    }

    #[test]
    fn test_command_must_be_object() {
        assert!(matches!(
            command_document("[1, 2]", &[]),
            Err(DatabaseError::Query(_))
        ));
        assert!(matches!(
            command_document("not json", &[]),
            Err(DatabaseError::Query(_))
        ));
    }

    #[test]
    fn test_bson_value_conversions() {
        let id = ObjectId::new();
        assert_eq!(bson_value(&Bson::ObjectId(id)), Value::Text(id.to_hex()));
        assert_eq!(bson_value(&Bson::Int32(3)), Value::Int(3));
        assert_eq!(bson_value(&Bson::Double(1.5)), Value::Float(1.5));
        assert_eq!(bson_value(&Bson::Undefined), Value::Null);

        let dt = bson::DateTime::from_millis(1_700_000_000_000);
        assert_eq!(
            bson_value(&Bson::DateTime(dt)),
            Value::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );

        let nested = bson_value(&Bson::Document(doc! { "a": 1_i32 }));
        assert_eq!(nested, Value::Json(json!({"a": 1})));
    }

    #[test]
    fn test_document_record_keeps_order() {
        let record = document_record(&doc! { "_id": 1_i32, "name": "alice", "tags": ["x"] });
        assert_eq!(record.columns(), &["_id", "name", "tags"]);
        assert_eq!(record.get("name"), Some(&Value::Text("alice".into())));
        assert_eq!(record.get("tags"), Some(&Value::Json(json!(["x"]))));
    }

    #[test]
    fn test_batch_records() {
        let cursor = doc! { "id": 0_i64, "ns": "app.users", "firstBatch": [{ "a": 1_i32 }, 5_i32] };
        let records = batch_records(&cursor, "firstBatch").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("a"), Some(&Value::Int(1)));
        assert_eq!(records[1].get("value"), Some(&Value::Int(5)));

        assert!(batch_records(&cursor, "nextBatch").is_err());
    }

    #[test]
    fn test_affected_count() {
        assert_eq!(affected_count(&doc! { "n": 3_i32, "ok": 1.0 }), 3);
        assert_eq!(affected_count(&doc! { "n": 4_i64 }), 4);
        assert_eq!(affected_count(&doc! { "ok": 1.0 }), 0);
    }
}
