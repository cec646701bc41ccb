//! MongoDB backend.
//!
//! A statement is a database command as a JSON document, e.g.
//! `{"find": "users", "filter": {"age": {"$gt": "?"}}}`. Each string value that
//! is exactly `"?"` is a placeholder, replaced in document order by the next
//! parameter before the document is converted to BSON. Placeholders are bound as
//! values, never spliced into the command text.
//!
//! Cursor replies (`find`, `aggregate`, `listCollections`, ...) give one row per
//! document of the first batch; any other reply is a single row.

use crate::db::connection::{Connection, ConnectionMeta, ConnectionState, not_connected};
use crate::db::factory::{ConnectionFactory, ensure_kind};
use crate::error::{ConnectionErrorKind, DbError, DbResult, QueryErrorKind};
use crate::models::{BackendConfig, BackendKind, ExecResult, QueryParam, Row, RowSet, StatementKind};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use mongodb::bson::{Bson, Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::Client;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Placeholder value bound to the next parameter.
const PLACEHOLDER: &str = "?";

/// Commands that answer with data rather than a write summary.
const READ_COMMANDS: &[&str] = &[
    "aggregate", "buildInfo", "collStats", "count", "dbStats", "distinct", "explain", "find",
    "hello", "isMaster", "listCollections", "listDatabases", "listIndexes", "ping",
    "serverStatus",
];

/// Characters MongoDB forbids in database names.
const FORBIDDEN_DB_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0'];

#[derive(Debug, Clone, Copy, Default)]
pub struct MongoFactory;

impl ConnectionFactory for MongoFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Mongo
    }

    fn validate(&self, config: &BackendConfig) -> DbResult<()> {
        let kind = ensure_kind(self, config)?;
        config.validate_common(kind)?;
        database_name(config)?;
        if config.charset.is_some() {
            return Err(DbError::configuration("charset is not supported for MongoDB"));
        }
        Ok(())
    }

    fn create_connection(&self, config: &BackendConfig) -> DbResult<Box<dyn Connection>> {
        self.validate(config)?;
        let database = database_name(config)?.to_string();

        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: config.host_trimmed().unwrap_or_default().to_string(),
            port: config.port_or_default(BackendKind::Mongo),
        }];
        if config.username.is_some() {
            let mut credential = Credential::default();
            credential.username = config.username.clone();
            credential.password = config.password.clone();
            credential.source = Some(database.clone());
            options.credential = Some(credential);
        }
        // One logical connection is one socket; sharing is the pool's job.
        options.max_pool_size = Some(1);
        options.min_pool_size = Some(0);
        options.connect_timeout = Some(config.pool.connect_timeout_or_default());
        options.server_selection_timeout = Some(config.pool.connect_timeout_or_default());
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        Ok(Box::new(MongoConnection {
            meta: ConnectionMeta::new(BackendKind::Mongo),
            options,
            database,
            client: None,
        }))
    }

    fn classify(&self, statement: &str) -> StatementKind {
        let command = serde_json::from_str::<JsonValue>(statement)
            .ok()
            .and_then(|v| match v {
                JsonValue::Object(map) => map.keys().next().cloned(),
                _ => None,
            })
            .unwrap_or_default();
        if READ_COMMANDS
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&command))
        {
            StatementKind::Query
        } else {
            StatementKind::Execute
        }
    }
}

/// The database commands run against. Required, and must be a legal name.
fn database_name(config: &BackendConfig) -> DbResult<&str> {
    let name = config
        .database
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| DbError::configuration("MongoDB requires a database name"))?;
    if name.len() > 64 || name.contains(FORBIDDEN_DB_CHARS) {
        return Err(DbError::configuration(format!(
            "Invalid MongoDB database name: {:?}",
            name
        )));
    }
    Ok(name)
}

/// One session with a MongoDB deployment.
pub struct MongoConnection {
    meta: ConnectionMeta,
    options: ClientOptions,
    database: String,
    client: Option<Client>,
}

impl MongoConnection {
    async fn run(&mut self, statement: &str, params: &[QueryParam]) -> DbResult<Document> {
        if self.meta.is_broken() {
            return Err(not_connected(&self.meta));
        }
        let command = build_command(statement, params)?;
        debug!(
            connection_id = %self.meta.id,
            command = command.keys().next().map(String::as_str).unwrap_or_default(),
            args = params.len(),
            "Executing MongoDB command"
        );
        let result = match &self.client {
            Some(client) => client
                .database(&self.database)
                .run_command(command)
                .await
                .map_err(DbError::from),
            None => Err(not_connected(&self.meta)),
        };
        self.meta.observe(result)
    }

    async fn fetch(
        &mut self,
        statement: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<RowSet> {
        let reply = self.run(statement, params).await?;
        let (rows, open_cursor) = reply_to_rows(reply, max_rows);
        if let (Some((collection, id)), Some(client)) = (open_cursor, &self.client) {
            let kill = doc! { "killCursors": collection, "cursors": [id] };
            if let Err(e) = client.database(&self.database).run_command(kill).await {
                debug!(connection_id = %self.meta.id, error = %e, "Failed to kill cursor");
            }
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConnection")
            .field("meta", &self.meta)
            .field("database", &self.database)
            .field("open", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for MongoConnection {
    fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ConnectionMeta {
        &mut self.meta
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
            && matches!(
                self.meta.state(),
                ConnectionState::Connected | ConnectionState::InUse
            )
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        if self.meta.is_broken() {
            return Err(not_connected(&self.meta));
        }
        let client = Client::with_options(self.options.clone()).map_err(connect_error)?;
        // The driver connects lazily; a ping proves the server is reachable and
        // the credentials are accepted.
        if let Err(e) = client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
        {
            client.shutdown().await;
            return Err(connect_error(e));
        }

        self.client = Some(client);
        self.meta.transition(ConnectionState::Connected);
        self.meta.touch();
        debug!(connection_id = %self.meta.id, database = %self.database, "MongoDB connection opened");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
        self.meta.transition(ConnectionState::Disconnected);
    }

    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<RowSet> {
        self.fetch(sql, params, None).await
    }

    async fn query_limited(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        max_rows: usize,
    ) -> DbResult<RowSet> {
        self.fetch(sql, params, Some(max_rows)).await
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let reply = self.run(sql, params).await?;
        write_summary(&reply)
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.run(r#"{"ping": 1}"#, &[]).await.map(|_| ())
    }
}

/// Parse the command document and bind its placeholders.
fn build_command(statement: &str, params: &[QueryParam]) -> DbResult<Document> {
    let mut value: JsonValue = serde_json::from_str(statement).map_err(|e| {
        DbError::invalid_input(format!("MongoDB command must be a JSON document: {}", e))
    })?;
    if !value.is_object() {
        return Err(DbError::invalid_input(
            "MongoDB command must be a JSON object",
        ));
    }

    let mut remaining = params.iter();
    bind_placeholders(&mut value, &mut remaining)?;
    let unused = remaining.len();
    if unused > 0 {
        return Err(DbError::invalid_input(format!(
            "{} parameter(s) given without a matching \"?\" placeholder",
            unused
        )));
    }

    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(DbError::invalid_input("MongoDB command must be a JSON object")),
        Err(e) => Err(DbError::invalid_input(format!("Invalid extended JSON: {}", e))),
    }
}

fn bind_placeholders(
    value: &mut JsonValue,
    params: &mut std::slice::Iter<'_, QueryParam>,
) -> DbResult<()> {
    if value.as_str() == Some(PLACEHOLDER) {
        let param = params.next().ok_or_else(|| {
            DbError::invalid_input("More \"?\" placeholders than parameters")
        })?;
        *value = param_to_json(param)?;
        return Ok(());
    }
    match value {
        JsonValue::Array(items) => {
            for item in items {
                bind_placeholders(item, params)?;
            }
        }
        JsonValue::Object(map) => {
            for item in map.values_mut() {
                bind_placeholders(item, params)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Parameter as extended JSON, so bytes become BSON binary.
fn param_to_json(param: &QueryParam) -> DbResult<JsonValue> {
    Ok(match param {
        QueryParam::Null => JsonValue::Null,
        QueryParam::Bool(v) => JsonValue::Bool(*v),
        QueryParam::Int(v) => JsonValue::from(*v),
        QueryParam::Float(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .ok_or_else(|| DbError::invalid_input("NaN and infinity cannot be bound"))?,
        QueryParam::String(v) => JsonValue::String(v.clone()),
        QueryParam::Bytes(v) => serde_json::json!({
            "$binary": { "base64": STANDARD.encode(v), "subType": "00" }
        }),
    })
}

fn document_to_row(document: Document) -> Row {
    match Bson::Document(document).into_relaxed_extjson() {
        JsonValue::Object(map) => map,
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

/// Shape a command reply into rows.
///
/// Returns the cursor to close when the server still holds more results.
fn reply_to_rows(mut reply: Document, max_rows: Option<usize>) -> (RowSet, Option<(String, i64)>) {
    let Ok(cursor) = reply.get_document_mut("cursor").map(std::mem::take) else {
        let row = document_to_row(reply);
        let columns = row.keys().cloned().collect();
        return (RowSet::new(columns, vec![row], false), None);
    };

    let cursor_id = cursor.get("id").and_then(bson_to_i64).unwrap_or(0);
    let batch = cursor
        .get_array("firstBatch")
        .or_else(|_| cursor.get_array("nextBatch"))
        .cloned()
        .unwrap_or_default();

    let limit = max_rows.unwrap_or(batch.len());
    let truncated = cursor_id != 0 || batch.len() > limit;
    let rows: Vec<Row> = batch
        .into_iter()
        .take(limit)
        .map(|item| match item {
            Bson::Document(d) => document_to_row(d),
            other => {
                let mut row = Row::new();
                row.insert("value".to_string(), other.into_relaxed_extjson());
                row
            }
        })
        .collect();

    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let open_cursor = (cursor_id != 0).then(|| {
        let namespace = cursor.get_str("ns").unwrap_or_default();
        let collection = namespace
            .split_once('.')
            .map(|(_, coll)| coll)
            .unwrap_or(namespace)
            .to_string();
        (collection, cursor_id)
    });
    (RowSet::new(columns, rows, truncated), open_cursor)
}

/// Affected count of a write command, or its first write error.
fn write_summary(reply: &Document) -> DbResult<ExecResult> {
    if let Ok(errors) = reply.get_array("writeErrors") {
        if let Some(Bson::Document(first)) = errors.first() {
            let message = first.get_str("errmsg").unwrap_or("write error").to_string();
            let code = first.get("code").and_then(bson_to_i64).map(|c| c.to_string());
            return Err(DbError::query(QueryErrorKind::SyntaxOrConstraint, message, code));
        }
    }
    if let Ok(concern) = reply.get_document("writeConcernError") {
        let message = concern.get_str("errmsg").unwrap_or("write concern error").to_string();
        let code = concern.get("code").and_then(bson_to_i64).map(|c| c.to_string());
        return Err(DbError::query(QueryErrorKind::SyntaxOrConstraint, message, code));
    }

    let affected = reply
        .get("nModified")
        .or_else(|| reply.get("n"))
        .and_then(bson_to_i64)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    Ok(ExecResult::new(affected, None))
}

fn bson_to_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

/// Server codes for AuthenticationFailed and Unauthorized.
const AUTH_ERROR_CODES: &[i32] = &[13, 18];

fn connect_error(err: mongodb::error::Error) -> DbError {
    let message = err.to_string();
    let (kind, suggestion) = match &*err.kind {
        ErrorKind::Authentication { .. } => (
            ConnectionErrorKind::AuthFailed,
            "Verify the MongoDB username, password and database",
        ),
        ErrorKind::Command(cmd) if AUTH_ERROR_CODES.contains(&cmd.code) => (
            ConnectionErrorKind::AuthFailed,
            "Verify the MongoDB username, password and database",
        ),
        _ if message.to_lowercase().contains("timed out") => (
            ConnectionErrorKind::Timeout,
            "Check network latency to the MongoDB server",
        ),
        _ => (
            ConnectionErrorKind::Unreachable,
            "Check that the MongoDB server is running and accessible",
        ),
    };
    DbError::connection(kind, format!("Failed to connect to MongoDB: {}", message), suggestion)
}
