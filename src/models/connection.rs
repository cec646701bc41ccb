//! Connection-related data models.
//!
//! This module defines the backend identifier and the configuration record a
//! connection factory consumes.

use crate::config::PoolOptions;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported backend kinds.
///
/// The set is closed: an identifier that does not parse into one of these
/// variants is rejected before any registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Includes MariaDB
    MySql,
    Postgres,
    Sqlite,
    Mongo,
    Redis,
}

impl BackendKind {
    /// All known kinds, in declaration order.
    pub const ALL: [BackendKind; 5] = [
        Self::MySql,
        Self::Postgres,
        Self::Sqlite,
        Self::Mongo,
        Self::Redis,
    ];

    /// Parse the backend kind from a connection URL scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let scheme = connection_string.split(':').next()?;
        scheme.parse().ok()
    }

    /// Canonical lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Mongo => "mongo",
            Self::Redis => "redis",
        }
    }

    /// Get the display name for this backend kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
            Self::Mongo => "MongoDB",
            Self::Redis => "Redis",
        }
    }

    /// Get the default port for this backend kind.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
            Self::Mongo => Some(27017),
            Self::Redis => Some(6379),
        }
    }

    /// Whether statements for this backend are SQL.
    pub fn is_sql(&self) -> bool {
        matches!(self, Self::MySql | Self::Postgres | Self::Sqlite)
    }

    /// Whether connections need a network host.
    pub fn requires_host(&self) -> bool {
        !matches!(self, Self::Sqlite)
    }
}

impl FromStr for BackendKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "redis" => Ok(Self::Redis),
            _ => Err(DbError::unsupported_backend(s)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Configuration record for one backend.
///
/// This is what a [`ConnectionFactory`](crate::db::ConnectionFactory) validates and
/// builds connections from. The password is never serialized and never appears in
/// `Debug` or `Display` output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend identifier, e.g. "mysql", "postgres", "sqlite", "redis"
    pub kind: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, SQLite file path, or Redis database index
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// MySQL only. Default: utf8mb4
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub pool: PoolOptions,
}

impl BackendConfig {
    /// Create an empty configuration for the given backend identifier.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Create a SQLite configuration for a file path or `:memory:`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new("sqlite").with_database(path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Resolve the backend kind named by this configuration.
    pub fn backend_kind(&self) -> DbResult<BackendKind> {
        self.kind.parse()
    }

    /// Host with surrounding whitespace removed, `None` when missing or blank.
    pub fn host_trimmed(&self) -> Option<&str> {
        self.host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// Get the port, falling back to the backend's default.
    pub fn port_or_default(&self, kind: BackendKind) -> Option<u16> {
        self.port.or_else(|| kind.default_port())
    }

    /// Check the fields every backend shares.
    ///
    /// Backend-specific rules live in each factory's `validate`.
    pub fn validate_common(&self, kind: BackendKind) -> DbResult<()> {
        if kind.requires_host() && self.host_trimmed().is_none() {
            return Err(DbError::configuration(format!(
                "{} requires a host",
                kind.display_name()
            )));
        }
        if self.port == Some(0) {
            return Err(DbError::configuration("port must be between 1 and 65535"));
        }
        if self.password.is_some() && self.username.is_none() && kind != BackendKind::Redis {
            return Err(DbError::configuration(
                "password given without a username",
            ));
        }
        self.pool.validate().map_err(DbError::configuration)
    }

    /// Display-safe description of the target (credentials omitted).
    pub fn describe(&self) -> String {
        let user = self
            .username
            .as_deref()
            .map(|u| format!("{}:****@", u))
            .unwrap_or_default();
        let host = self.host_trimmed().unwrap_or("");
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();
        let db = self.database.as_deref().unwrap_or("");
        format!("{}://{}{}{}/{}", self.kind, user, host, port, db)
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("charset", &self.charset)
            .field("pool", &self.pool)
            .finish()
    }
}

impl std::fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}
