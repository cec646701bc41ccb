//! SQL backends (MySQL, PostgreSQL, SQLite) on top of sqlx.
//!
//! # Architecture
//!
//! [`SqlFactory`] validates configuration and builds [`SqlConnection`]s. A
//! connection holds one native sqlx connection; statement execution lives in the
//! per-backend submodules:
//! - `mysql`: MySQL-specific fetch and execute
//! - `postgres`: PostgreSQL-specific fetch and execute
//! - `sqlite`: SQLite-specific fetch and execute
//!
//! The submodules are intentionally parallel to make differences obvious.

use crate::db::connection::{Connection, ConnectionMeta, ConnectionState, not_connected};
use crate::db::factory::{ConnectionFactory, ensure_kind};
use crate::db::types::RowToJson;
use crate::error::{ConnectionErrorKind, DbError, DbResult};
use crate::models::{BackendConfig, BackendKind, ExecResult, QueryParam, RowSet};
use async_trait::async_trait;
use futures_util::StreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection as _};
use std::str::FromStr;
use tracing::debug;

const DEFAULT_MYSQL_CHARSET: &str = "utf8mb4";

/// Connection options for one SQL backend.
#[derive(Debug, Clone)]
enum SqlConnectOptions {
    MySql(MySqlConnectOptions),
    Postgres(PgConnectOptions),
    Sqlite(SqliteConnectOptions),
}

/// Backend-specific native connection.
enum NativeConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl NativeConnection {
    async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            NativeConnection::MySql(c) => c.close().await,
            NativeConnection::Postgres(c) => c.close().await,
            NativeConnection::Sqlite(c) => c.close().await,
        }
    }

    async fn ping(&mut self) -> Result<(), sqlx::Error> {
        match self {
            NativeConnection::MySql(c) => c.ping().await,
            NativeConnection::Postgres(c) => c.ping().await,
            NativeConnection::Sqlite(c) => c.ping().await,
        }
    }
}

/// Factory for one of the SQL backends.
#[derive(Debug, Clone, Copy)]
pub struct SqlFactory {
    kind: BackendKind,
}

impl SqlFactory {
    pub fn mysql() -> Self {
        Self {
            kind: BackendKind::MySql,
        }
    }

    pub fn postgres() -> Self {
        Self {
            kind: BackendKind::Postgres,
        }
    }

    pub fn sqlite() -> Self {
        Self {
            kind: BackendKind::Sqlite,
        }
    }

    fn connect_options(&self, config: &BackendConfig) -> DbResult<SqlConnectOptions> {
        let port = config.port_or_default(self.kind).unwrap_or_default();
        match self.kind {
            BackendKind::MySql => {
                let mut options = MySqlConnectOptions::new()
                    .host(config.host_trimmed().unwrap_or_default())
                    .port(port)
                    .charset(config.charset.as_deref().unwrap_or(DEFAULT_MYSQL_CHARSET));
                if let Some(user) = &config.username {
                    options = options.username(user);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                if let Some(db) = &config.database {
                    options = options.database(db);
                }
                Ok(SqlConnectOptions::MySql(options))
            }
            BackendKind::Postgres => {
                let mut options = PgConnectOptions::new()
                    .host(config.host_trimmed().unwrap_or_default())
                    .port(port);
                if let Some(user) = &config.username {
                    options = options.username(user);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                if let Some(db) = &config.database {
                    options = options.database(db);
                }
                Ok(SqlConnectOptions::Postgres(options))
            }
            BackendKind::Sqlite => {
                let path = config.database.as_deref().unwrap_or_default();
                let options = if path == ":memory:" {
                    SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                        DbError::configuration(format!("Invalid SQLite options: {}", e))
                    })?
                } else {
                    SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true)
                };
                Ok(SqlConnectOptions::Sqlite(options))
            }
            other => Err(DbError::unsupported_backend(other.as_str())),
        }
    }
}

impl ConnectionFactory for SqlFactory {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn validate(&self, config: &BackendConfig) -> DbResult<()> {
        let kind = ensure_kind(self, config)?;
        config.validate_common(kind)?;

        if kind == BackendKind::Sqlite {
            let path = config.database.as_deref().map(str::trim).unwrap_or_default();
            if path.is_empty() {
                return Err(DbError::configuration(
                    "SQLite requires a database file path or :memory:",
                ));
            }
        }
        if config.charset.is_some() && kind != BackendKind::MySql {
            return Err(DbError::configuration(format!(
                "charset is only supported for MySQL, not {}",
                kind.display_name()
            )));
        }
        Ok(())
    }

    fn create_connection(&self, config: &BackendConfig) -> DbResult<Box<dyn Connection>> {
        self.validate(config)?;
        let options = self.connect_options(config)?;
        Ok(Box::new(SqlConnection {
            meta: ConnectionMeta::new(self.kind),
            options,
            native: None,
        }))
    }
}

/// One session with a SQL backend.
pub struct SqlConnection {
    meta: ConnectionMeta,
    options: SqlConnectOptions,
    native: Option<NativeConnection>,
}

impl SqlConnection {
    fn native(&mut self) -> DbResult<&mut NativeConnection> {
        if self.meta.is_broken() {
            return Err(not_connected(&self.meta));
        }
        match self.native.as_mut() {
            Some(native) => Ok(native),
            None => Err(not_connected(&self.meta)),
        }
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<RowSet> {
        debug!(
            connection_id = %self.meta.id,
            sql = %sql,
            params = params.len(),
            "Executing query"
        );
        let result = match self.native()? {
            NativeConnection::MySql(c) => {
                mysql::fetch_rows(c, sql, params, max_rows).await.map(into_row_set)
            }
            NativeConnection::Postgres(c) => {
                postgres::fetch_rows(c, sql, params, max_rows).await.map(into_row_set)
            }
            NativeConnection::Sqlite(c) => {
                sqlite::fetch_rows(c, sql, params, max_rows).await.map(into_row_set)
            }
        };
        self.meta.observe(result)
    }
}

impl std::fmt::Debug for SqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConnection")
            .field("meta", &self.meta)
            .field("open", &self.native.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for SqlConnection {
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
        let backend = self.meta.backend;
        let native = match &self.options {
            SqlConnectOptions::MySql(o) => o.connect().await.map(NativeConnection::MySql),
            SqlConnectOptions::Postgres(o) => o.connect().await.map(NativeConnection::Postgres),
            SqlConnectOptions::Sqlite(o) => o.connect().await.map(NativeConnection::Sqlite),
        }
        .map_err(|e| connect_error(backend, e))?;

        self.native = Some(native);
        self.meta.transition(ConnectionState::Connected);
        self.meta.touch();
        debug!(connection_id = %self.meta.id, backend = %backend, "Connection opened");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(native) = self.native.take() {
            if let Err(e) = native.close().await {
                debug!(connection_id = %self.meta.id, error = %e, "Error while closing connection");
            }
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
        debug!(
            connection_id = %self.meta.id,
            sql = %sql,
            params = params.len(),
            "Executing statement"
        );
        let result = match self.native()? {
            NativeConnection::MySql(c) => mysql::execute(c, sql, params).await,
            NativeConnection::Postgres(c) => postgres::execute(c, sql, params).await,
            NativeConnection::Sqlite(c) => sqlite::execute(c, sql, params).await,
        };
        self.meta.observe(result)
    }

    async fn ping(&mut self) -> DbResult<()> {
        let result = self.native()?.ping().await.map_err(DbError::from);
        self.meta.observe(result)
    }
}

/// Turn fetched rows (one more than the cap, when capped) into a row set.
fn into_row_set<R: RowToJson>((rows, max_rows): (Vec<R>, Option<usize>)) -> RowSet {
    let Some(first) = rows.first() else {
        return RowSet::empty();
    };
    let columns = first.column_names();
    let truncated = max_rows.is_some_and(|max| rows.len() > max);
    let keep = max_rows.unwrap_or(rows.len()).min(rows.len());
    let json_rows = rows.iter().take(keep).map(|r| r.to_json_map()).collect();
    RowSet::new(columns, json_rows, truncated)
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

/// Whether a statement can set the last insert id.
fn is_insert(sql: &str) -> bool {
    crate::models::query::leading_keyword(sql).is_some_and(|kw| {
        kw.eq_ignore_ascii_case("INSERT") || kw.eq_ignore_ascii_case("REPLACE")
    })
}

/// Classify a failure to establish a session.
pub fn connect_error(backend: BackendKind, error: sqlx::Error) -> DbError {
    let kind = match &error {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // invalid_password / invalid_authorization_specification (MySQL 1045 maps to 28000)
            Some("28P01") | Some("28000") => ConnectionErrorKind::AuthFailed,
            _ => classify_by_message(&error),
        },
        sqlx::Error::PoolTimedOut => ConnectionErrorKind::Timeout,
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            ConnectionErrorKind::Timeout
        }
        _ => classify_by_message(&error),
    };
    DbError::connection(
        kind,
        format!("Failed to connect to {}: {}", backend.display_name(), error),
        connection_suggestion(backend, &error),
    )
}

fn classify_by_message(error: &sqlx::Error) -> ConnectionErrorKind {
    let message = error.to_string().to_lowercase();
    if message.contains("authentication")
        || message.contains("password")
        || message.contains("access denied")
    {
        ConnectionErrorKind::AuthFailed
    } else if message.contains("timed out") {
        ConnectionErrorKind::Timeout
    } else {
        ConnectionErrorKind::Unreachable
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(backend: BackendKind, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            backend.display_name()
        );
    }

    if error_str.contains("authentication")
        || error_str.contains("password")
        || error_str.contains("access denied")
    {
        return "Verify the username and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match backend {
        BackendKind::Sqlite => {
            "Verify the file path exists and its directory is writable".to_string()
        }
        _ => format!(
            "Verify host, port ({}) and database name",
            backend.default_port().unwrap_or_default()
        ),
    }
}

// =============================================================================
// Backend-Specific Implementations
// =============================================================================
//
// Without parameters the statement is sent as raw SQL: some statements (e.g.
// CREATE PROCEDURE) cannot be prepared.

mod mysql {
    use super::*;
    use sqlx::mysql::{MySqlArguments, MySqlRow};

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<(Vec<MySqlRow>, Option<usize>)> {
        let fetch_limit = max_rows.map_or(usize::MAX, |m| m.saturating_add(1));
        let results = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch(sql).take(fetch_limit).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch(&mut *conn).take(fetch_limit).collect::<Vec<_>>().await
        };
        Ok((collect_rows(results)?, max_rows))
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        let last_insert_id = Some(result.last_insert_id())
            .filter(|id| *id > 0)
            .and_then(|id| i64::try_from(id).ok());
        Ok(ExecResult::new(result.rows_affected(), last_insert_id))
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::postgres::{PgArguments, PgRow};

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<(Vec<PgRow>, Option<usize>)> {
        let fetch_limit = max_rows.map_or(usize::MAX, |m| m.saturating_add(1));
        let results = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch(sql).take(fetch_limit).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch(&mut *conn).take(fetch_limit).collect::<Vec<_>>().await
        };
        Ok((collect_rows(results)?, max_rows))
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        // PostgreSQL has no session-wide last insert id; use RETURNING instead.
        Ok(ExecResult::new(result.rows_affected(), None))
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::sqlite::{SqliteArguments, SqliteRow};

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<(Vec<SqliteRow>, Option<usize>)> {
        let fetch_limit = max_rows.map_or(usize::MAX, |m| m.saturating_add(1));
        let results = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch(sql).take(fetch_limit).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch(&mut *conn).take(fetch_limit).collect::<Vec<_>>().await
        };
        Ok((collect_rows(results)?, max_rows))
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        // last_insert_rowid() keeps its value across non-insert statements
        let last_insert_id = Some(result.last_insert_rowid())
            .filter(|id| *id > 0 && result.rows_affected() > 0 && is_insert(sql));
        Ok(ExecResult::new(result.rows_affected(), last_insert_id))
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryErrorKind;

    #[test]
    fn test_validate_sqlite_requires_path() {
        let factory = SqlFactory::sqlite();
        assert!(factory.validate(&BackendConfig::new("sqlite")).is_err());
        assert!(factory.validate(&BackendConfig::sqlite("  ")).is_err());
        assert!(factory.validate(&BackendConfig::sqlite(":memory:")).is_ok());
    }

    #[test]
    fn test_validate_network_backends() {
        let factory = SqlFactory::postgres();
        let missing_host = BackendConfig::new("postgres").with_database("app");
        assert!(matches!(
            factory.validate(&missing_host),
            Err(DbError::Configuration { .. })
        ));

        let ok = BackendConfig::new("postgresql")
            .with_host("localhost")
            .with_database("app")
            .with_credentials("app", "pw");
        assert!(factory.validate(&ok).is_ok());
    }

    #[test]
    fn test_validate_charset_only_for_mysql() {
        let mut config = BackendConfig::new("postgres").with_host("localhost");
        config.charset = Some("latin1".to_string());
        assert!(SqlFactory::postgres().validate(&config).is_err());

        let mut config = BackendConfig::new("mysql").with_host("localhost");
        config.charset = Some("latin1".to_string());
        assert!(SqlFactory::mysql().validate(&config).is_ok());
    }

    #[test]
    fn test_create_connection_starts_disconnected() {
        let conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        assert_eq!(conn.backend(), BackendKind::Sqlite);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_query_before_connect_fails() {
        let mut conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Query {
                kind: QueryErrorKind::ConnectionLost,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_never_connected_is_safe() {
        let mut conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        conn.disconnect().await;
        conn.disconnect().await;
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_sqlite_select_one() {
        let mut conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        let mut rows = conn.query("SELECT 1 AS one", &[]).await.unwrap();
        assert_eq!(rows.columns(), ["one".to_string()]);
        let row = rows.next().unwrap();
        assert_eq!(row["one"], serde_json::json!(1));
        assert!(rows.next().is_none());

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_sqlite_insert_reports_last_id() {
        let mut conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        conn.connect().await.unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();

        let inserted = conn
            .execute("INSERT INTO t (name) VALUES (?)", &[QueryParam::from("a")])
            .await
            .unwrap();
        assert_eq!(inserted, ExecResult::new(1, Some(1)));

        let updated = conn
            .execute("UPDATE t SET name = ?", &[QueryParam::from("b")])
            .await
            .unwrap();
        assert_eq!(updated, ExecResult::new(1, None));
    }

    #[tokio::test]
    async fn test_sqlite_syntax_error_keeps_connection() {
        let mut conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        conn.connect().await.unwrap();
        let err = conn.query("SELEC 1", &[]).await.unwrap_err();
        assert!(!err.is_connection_fatal());
        assert!(!conn.is_broken());
        assert!(conn.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_query_limited_marks_truncation() {
        let mut conn = SqlFactory::sqlite()
            .create_connection(&BackendConfig::sqlite(":memory:"))
            .unwrap();
        conn.connect().await.unwrap();
        let rows = conn
            .query_limited("SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3", &[], 2)
            .await
            .unwrap();
        assert!(rows.is_truncated());
        assert_eq!(rows.remaining(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_postgres_classified() {
        let config = BackendConfig::new("postgres")
            .with_host("127.0.0.1")
            .with_port(1)
            .with_database("none");
        let mut conn = SqlFactory::postgres().create_connection(&config).unwrap();
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Connection {
                kind: ConnectionErrorKind::Unreachable,
                ..
            }
        ));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("insert into t values (1)"));
        assert!(is_insert("  REPLACE INTO t VALUES (1)"));
        assert!(!is_insert("UPDATE t SET a = 1"));
    }
}
