//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors (sqlx, mongodb, redis) are classified into a small taxonomy so callers never
//! see raw driver exceptions: configuration, unsupported backend, connection, pool
//! and query failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a connection could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    Unreachable,
    AuthFailed,
    Timeout,
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

/// Why the pool refused to hand out a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolErrorKind {
    /// Every connection is checked out and the acquire timeout elapsed.
    Exhausted,
    /// The pool is draining or closed.
    Closed,
    /// The caller cancelled while waiting.
    Cancelled,
}

impl std::fmt::Display for PoolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::Closed => write!(f, "closed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a statement failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// Rejected by the server (syntax, constraint, missing object).
    SyntaxOrConstraint,
    /// The session died mid-statement. The connection must be discarded.
    ConnectionLost,
    /// The statement exceeded its timeout. The session state is unknown.
    Timeout,
}

impl QueryErrorKind {
    /// Whether the connection that produced this error must be discarded.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::Timeout)
    }
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyntaxOrConstraint => write!(f, "rejected"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unsupported backend: {kind}")]
    UnsupportedBackend { kind: String },

    #[error("Connection {kind}: {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
        suggestion: String,
    },

    #[error("Pool {kind}: {message}")]
    Pool { kind: PoolErrorKind, message: String },

    #[error("Query {kind}: {message}")]
    Query {
        kind: QueryErrorKind,
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported backend error.
    pub fn unsupported_backend(kind: impl Into<String>) -> Self {
        Self::UnsupportedBackend { kind: kind.into() }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        kind: ConnectionErrorKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            kind,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool error.
    pub fn pool(kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Self::Pool {
            kind,
            message: message.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        kind: QueryErrorKind,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Query {
            kind,
            message: message.into(),
            sql_state,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Configuration { .. } => Some("Fix the backend configuration and retry"),
            Self::Pool {
                kind: PoolErrorKind::Exhausted,
                ..
            } => Some("Retry with backoff or raise the pool's max_size"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Configuration and unsupported-backend errors are fatal. Pool exhaustion and
    /// connection failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Pool { kind, .. } => *kind == PoolErrorKind::Exhausted,
            Self::Query { kind, .. } => kind.poisons_connection(),
            _ => false,
        }
    }

    /// Whether the connection that produced this error must be discarded.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Query { kind, .. } if kind.poisons_connection())
    }

    /// Stable machine-readable category name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::UnsupportedBackend { .. } => "unsupported_backend",
            Self::Connection { kind, .. } => match kind {
                ConnectionErrorKind::Unreachable => "connection_unreachable",
                ConnectionErrorKind::AuthFailed => "connection_auth_failed",
                ConnectionErrorKind::Timeout => "connection_timeout",
            },
            Self::Pool { kind, .. } => match kind {
                PoolErrorKind::Exhausted => "pool_exhausted",
                PoolErrorKind::Closed => "pool_closed",
                PoolErrorKind::Cancelled => "pool_cancelled",
            },
            Self::Query { kind, .. } => match kind {
                QueryErrorKind::SyntaxOrConstraint => "query_rejected",
                QueryErrorKind::ConnectionLost => "query_connection_lost",
                QueryErrorKind::Timeout => "query_timeout",
            },
            Self::InvalidInput { .. } => "invalid_input",
            Self::Internal { .. } => "internal",
        }
    }

    /// Build the structured body surfaced to callers.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            Self::Query {
                message,
                sql_state: Some(code),
                ..
            } => format!("{} (SQLSTATE: {})", message, code),
            _ => self.to_string(),
        };
        ErrorBody {
            kind: self.kind_name().to_string(),
            message,
            suggestion: self.suggestion().map(String::from),
        }
    }
}

/// Structured `{kind, message}` error surfaced to collaborating layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl From<&DbError> for ErrorBody {
    fn from(err: &DbError) -> Self {
        err.to_body()
    }
}

/// Convert sqlx errors raised while running a statement.
///
/// Failures during connection establishment go through
/// [`crate::db::sql::connect_error`] instead, which knows the backend.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(QueryErrorKind::SyntaxOrConstraint, db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::query(
                QueryErrorKind::SyntaxOrConstraint,
                "No rows returned",
                None,
            ),
            sqlx::Error::PoolTimedOut => {
                DbError::pool(PoolErrorKind::Exhausted, "driver pool timed out")
            }
            sqlx::Error::PoolClosed => DbError::pool(PoolErrorKind::Closed, "driver pool closed"),
            sqlx::Error::Io(io_err) => DbError::query(
                QueryErrorKind::ConnectionLost,
                format!("I/O error: {}", io_err),
                None,
            ),
            sqlx::Error::Tls(tls_err) => DbError::query(
                QueryErrorKind::ConnectionLost,
                format!("TLS error: {}", tls_err),
                None,
            ),
            sqlx::Error::Protocol(msg) => DbError::query(
                QueryErrorKind::ConnectionLost,
                format!("Protocol error: {}", msg),
                None,
            ),
            sqlx::Error::WorkerCrashed => DbError::query(
                QueryErrorKind::ConnectionLost,
                "Database worker crashed",
                None,
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::query(
                QueryErrorKind::SyntaxOrConstraint,
                format!("Type not found: {}", type_name),
                None,
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::query(
                QueryErrorKind::SyntaxOrConstraint,
                format!("Column not found: {}", col),
                None,
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert redis errors raised while running a command.
impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            DbError::query(QueryErrorKind::Timeout, err.to_string(), None)
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
        {
            DbError::query(QueryErrorKind::ConnectionLost, err.to_string(), None)
        } else {
            let code = err.code().map(String::from);
            DbError::query(QueryErrorKind::SyntaxOrConstraint, err.to_string(), code)
        }
    }
}

/// Convert MongoDB driver errors raised while running a command.
impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match &*err.kind {
            ErrorKind::Command(cmd) => DbError::query(
                QueryErrorKind::SyntaxOrConstraint,
                cmd.message.clone(),
                Some(cmd.code.to_string()),
            ),
            ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::ServerSelection { .. } => {
                DbError::query(QueryErrorKind::ConnectionLost, err.to_string(), None)
            }
            ErrorKind::InvalidArgument { message, .. } => DbError::invalid_input(message.clone()),
            _ => DbError::query(QueryErrorKind::SyntaxOrConstraint, err.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection(
            ConnectionErrorKind::Unreachable,
            "Failed to connect",
            "Check host",
        );
        assert!(err.to_string().contains("Connection unreachable"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection(
            ConnectionErrorKind::AuthFailed,
            "bad password",
            "Check credentials",
        );
        assert_eq!(err.suggestion(), Some("Check credentials"));
        assert!(DbError::internal("x").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::pool(PoolErrorKind::Exhausted, "busy").is_retryable());
        assert!(!DbError::pool(PoolErrorKind::Closed, "closed").is_retryable());
        assert!(
            DbError::connection(ConnectionErrorKind::Timeout, "err", "sugg").is_retryable()
        );
        assert!(!DbError::configuration("missing host").is_retryable());
        assert!(!DbError::unsupported_backend("nosuch").is_retryable());
    }

    #[test]
    fn test_connection_fatal_only_for_lost_or_timeout() {
        assert!(DbError::query(QueryErrorKind::ConnectionLost, "eof", None).is_connection_fatal());
        assert!(DbError::query(QueryErrorKind::Timeout, "slow", None).is_connection_fatal());
        assert!(
            !DbError::query(QueryErrorKind::SyntaxOrConstraint, "syntax", None)
                .is_connection_fatal()
        );
        assert!(!DbError::pool(PoolErrorKind::Exhausted, "busy").is_connection_fatal());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            DbError::unsupported_backend("nosuch").kind_name(),
            "unsupported_backend"
        );
        assert_eq!(
            DbError::pool(PoolErrorKind::Exhausted, "busy").kind_name(),
            "pool_exhausted"
        );
        assert_eq!(
            DbError::query(QueryErrorKind::ConnectionLost, "eof", None).kind_name(),
            "query_connection_lost"
        );
    }

    #[test]
    fn test_body_includes_sql_state() {
        let err = DbError::query(
            QueryErrorKind::SyntaxOrConstraint,
            "syntax error",
            Some("42601".to_string()),
        );
        let body = err.to_body();
        assert_eq!(body.kind, "query_rejected");
        assert!(body.message.contains("42601"));
    }

    #[test]
    fn test_body_serializes_without_empty_suggestion() {
        let body = DbError::internal("boom").to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "internal");
        assert!(json.get("suggestion").is_none());
    }

    #[test]
    fn test_sqlx_io_error_is_connection_lost() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err = DbError::from(sqlx::Error::Io(io));
        assert!(matches!(
            err,
            DbError::Query {
                kind: QueryErrorKind::ConnectionLost,
                ..
            }
        ));
    }

    #[test]
    fn test_sqlx_row_not_found_is_rejected() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_connection_fatal());
    }
}
