//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{BackendConfig, BackendKind};
pub use query::{
    DEFAULT_MAX_ROWS, ExecResult, MAX_ROW_LIMIT, QueryOutcome, QueryParam, QueryRequest, Row,
    RowSet, StatementKind,
};
