//! Database abstraction layer.
//!
//! This module provides:
//! - The [`Connection`] trait and its state machine
//! - Connection factories per backend and the [`FactoryRegistry`]
//! - The bounded [`ConnectionPool`] and the [`PoolManager`] that caches pools
//! - Row decoding into JSON

pub mod connection;
pub mod factory;
pub mod mongo;
pub mod pool;
pub mod pool_manager;
pub mod redis;
pub mod sql;
pub mod types;

pub use connection::{Connection, ConnectionMeta, ConnectionState};
pub use factory::{ConnectionFactory, FactoryRegistry, RegistryBuilder};
pub use mongo::{MongoConnection, MongoFactory};
pub use pool::{
    ConnectionPool, PoolConfig, PoolPhase, PoolStatus, PooledConnection, ReleaseOutcome,
};
pub use pool_manager::{PoolKey, PoolManager};
pub use redis::{RedisConnection, RedisFactory};
pub use sql::{SqlConnection, SqlFactory};
