//! Redis backend.
//!
//! A statement is a command line such as `GET user:1` or `HSET`; parameters are
//! appended as further command arguments. Replies are shaped into rows: array and
//! set replies give one `{value}` row per element, map replies one `{key, value}`
//! row per entry, and scalar replies a single `{value}` row.

use crate::db::connection::{Connection, ConnectionMeta, ConnectionState, not_connected};
use crate::db::factory::{ConnectionFactory, ensure_kind};
use crate::db::types::encode_binary_value;
use crate::error::{ConnectionErrorKind, DbError, DbResult};
use crate::models::{BackendConfig, BackendKind, ExecResult, QueryParam, Row, RowSet, StatementKind};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Value};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Commands answered with data rather than a write acknowledgement.
const READ_COMMANDS: &[&str] = &[
    "DBSIZE", "EXISTS", "GET", "GETRANGE", "HEXISTS", "HGET", "HGETALL", "HKEYS", "HLEN",
    "HMGET", "HVALS", "INFO", "KEYS", "LINDEX", "LLEN", "LRANGE", "MGET", "PING", "PTTL",
    "RANDOMKEY", "SCAN", "SCARD", "SISMEMBER", "SMEMBERS", "STRLEN", "TIME", "TTL", "TYPE",
    "ZCARD", "ZCOUNT", "ZRANGE", "ZRANGEBYSCORE", "ZRANK", "ZREVRANGE", "ZSCORE",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct RedisFactory;

impl ConnectionFactory for RedisFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn validate(&self, config: &BackendConfig) -> DbResult<()> {
        let kind = ensure_kind(self, config)?;
        config.validate_common(kind)?;
        database_index(config)?;
        if config.charset.is_some() {
            return Err(DbError::configuration("charset is not supported for Redis"));
        }
        Ok(())
    }

    fn create_connection(&self, config: &BackendConfig) -> DbResult<Box<dyn Connection>> {
        self.validate(config)?;
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(
                config.host_trimmed().unwrap_or_default().to_string(),
                config.port_or_default(BackendKind::Redis).unwrap_or(6379),
            ),
            redis: RedisConnectionInfo {
                db: database_index(config)?,
                username: config.username.clone(),
                password: config.password.clone(),
                ..RedisConnectionInfo::default()
            },
        };
        let client = redis::Client::open(info).map_err(|e| {
            DbError::configuration(format!("Failed to create Redis client: {}", e))
        })?;
        Ok(Box::new(RedisConnection {
            meta: ConnectionMeta::new(BackendKind::Redis),
            client,
            native: None,
        }))
    }

    fn classify(&self, statement: &str) -> StatementKind {
        let command = statement.split_whitespace().next().unwrap_or_default();
        if READ_COMMANDS
            .iter()
            .any(|c| c.eq_ignore_ascii_case(command))
        {
            StatementKind::Query
        } else {
            StatementKind::Execute
        }
    }
}

/// Database index from the `database` field, 0 when absent.
fn database_index(config: &BackendConfig) -> DbResult<i64> {
    match config.database.as_deref().map(str::trim) {
        None | Some("") => Ok(0),
        Some(db) => db
            .parse::<u16>()
            .map(i64::from)
            .map_err(|_| DbError::configuration(format!("Invalid Redis database index: {:?}", db))),
    }
}

/// One session with a Redis server.
pub struct RedisConnection {
    meta: ConnectionMeta,
    client: redis::Client,
    native: Option<MultiplexedConnection>,
}

impl RedisConnection {
    async fn run(&mut self, statement: &str, params: &[QueryParam]) -> DbResult<Value> {
        if self.meta.is_broken() {
            return Err(not_connected(&self.meta));
        }
        let cmd = build_command(statement, params)?;
        debug!(
            connection_id = %self.meta.id,
            command = %statement.split_whitespace().next().unwrap_or_default(),
            args = params.len(),
            "Executing Redis command"
        );
        let result = match self.native.as_mut() {
            Some(conn) => cmd.query_async::<Value>(conn).await.map_err(DbError::from),
            None => Err(not_connected(&self.meta)),
        };
        self.meta.observe(result)
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("meta", &self.meta)
            .field("open", &self.native.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ConnectionMeta {
        &mut self.meta
    }

    fn is_connected(&self) -> bool {
        self.native.is_some()
            && matches!(
                self.meta.state(),
                ConnectionState::Connected | ConnectionState::InUse
            )
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.native.is_some() {
            return Ok(());
        }
        if self.meta.is_broken() {
            return Err(not_connected(&self.meta));
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_error)?;
        self.native = Some(conn);
        self.meta.transition(ConnectionState::Connected);
        self.meta.touch();
        debug!(connection_id = %self.meta.id, "Redis connection opened");
        Ok(())
    }

    async fn disconnect(&mut self) {
        // Dropping the multiplexed handle closes the socket.
        self.native = None;
        self.meta.transition(ConnectionState::Disconnected);
    }

    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<RowSet> {
        let reply = self.run(sql, params).await?;
        Ok(reply_to_rows(reply))
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let reply = self.run(sql, params).await?;
        let affected = match reply {
            Value::Int(n) => u64::try_from(n).unwrap_or(0),
            Value::Nil => 0,
            Value::Array(items) | Value::Set(items) => items.len() as u64,
            _ => 1,
        };
        Ok(ExecResult::new(affected, None))
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.run("PING", &[]).await.map(|_| ())
    }
}

fn build_command(statement: &str, params: &[QueryParam]) -> DbResult<redis::Cmd> {
    let mut words = statement.split_whitespace();
    let name = words
        .next()
        .ok_or_else(|| DbError::invalid_input("Redis command cannot be empty"))?;
    let mut cmd = redis::cmd(&name.to_ascii_uppercase());
    for word in words {
        cmd.arg(word);
    }
    for param in params {
        match param {
            QueryParam::Null => {
                return Err(DbError::invalid_input(
                    "Redis command arguments cannot be null",
                ));
            }
            QueryParam::Bool(v) => cmd.arg(*v),
            QueryParam::Int(v) => cmd.arg(*v),
            QueryParam::Float(v) => cmd.arg(*v),
            QueryParam::String(v) => cmd.arg(v.as_str()),
            QueryParam::Bytes(v) => cmd.arg(v.as_slice()),
        };
    }
    Ok(cmd)
}

fn connect_error(err: redis::RedisError) -> DbError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    let (kind, suggestion) = if err.kind() == redis::ErrorKind::AuthenticationFailed
        || lower.contains("noauth")
        || lower.contains("wrongpass")
    {
        (
            ConnectionErrorKind::AuthFailed,
            "Verify the Redis username and password",
        )
    } else if err.is_timeout() {
        (
            ConnectionErrorKind::Timeout,
            "Check network latency to the Redis server",
        )
    } else {
        (
            ConnectionErrorKind::Unreachable,
            "Check that the Redis server is running and accessible",
        )
    };
    DbError::connection(kind, format!("Failed to connect to Redis: {}", message), suggestion)
}

/// Convert a reply value to JSON.
fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Nil => JsonValue::Null,
        Value::Int(n) => JsonValue::Number(n.into()),
        Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s),
            Err(e) => encode_binary_value(e.as_bytes()),
        },
        Value::SimpleString(s) => JsonValue::String(s),
        Value::Okay => JsonValue::String("OK".to_string()),
        Value::Double(d) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(d.to_string())),
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::Array(items) | Value::Set(items) => {
            JsonValue::Array(items.into_iter().map(value_to_json).collect())
        }
        Value::Map(pairs) => JsonValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (json_key(value_to_json(k)), value_to_json(v)))
                .collect(),
        ),
        Value::VerbatimString { text, .. } => JsonValue::String(text),
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn json_key(key: JsonValue) -> String {
    match key {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

fn single_column_row(column: &str, value: JsonValue) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), value);
    row
}

/// Shape a reply into rows.
fn reply_to_rows(reply: Value) -> RowSet {
    match reply {
        Value::Nil => RowSet::empty(),
        Value::Array(items) | Value::Set(items) => RowSet::new(
            vec!["value".to_string()],
            items
                .into_iter()
                .map(|v| single_column_row("value", value_to_json(v)))
                .collect(),
            false,
        ),
        Value::Map(pairs) => RowSet::new(
            vec!["key".to_string(), "value".to_string()],
            pairs
                .into_iter()
                .map(|(k, v)| {
                    let mut row = single_column_row("key", JsonValue::String(json_key(value_to_json(k))));
                    row.insert("value".to_string(), value_to_json(v));
                    row
                })
                .collect(),
            false,
        ),
        scalar => RowSet::new(
            vec!["value".to_string()],
            vec![single_column_row("value", value_to_json(scalar))],
            false,
        ),
    }
}
