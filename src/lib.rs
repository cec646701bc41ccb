//! multidb-pool library.
//!
//! A database access layer for MySQL, PostgreSQL, SQLite, MongoDB and Redis: a backend
//! identifier selects a connection factory at runtime, and a bounded pool shares
//! that backend's connections across concurrent callers.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::Config;
pub use db::{ConnectionPool, FactoryRegistry, PooledConnection};
pub use error::{DbError, DbResult, ErrorBody};
pub use models::{BackendConfig, BackendKind, QueryOutcome, QueryParam, QueryRequest};
pub use service::{QueryService, ServiceOptions};
