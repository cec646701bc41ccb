//! Connection factories and the backend registry.
//!
//! Each backend provides one [`ConnectionFactory`]. The [`FactoryRegistry`] maps
//! backend kinds to factories; it is assembled once through [`RegistryBuilder`]
//! and is read-only afterwards, so lookups need no locking.

use crate::db::connection::Connection;
use crate::db::mongo::MongoFactory;
use crate::db::redis::RedisFactory;
use crate::db::sql::SqlFactory;
use crate::error::{DbError, DbResult};
use crate::models::{BackendConfig, BackendKind, StatementKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds unconnected connections for exactly one backend kind.
///
/// Factories are stateless and own no connections.
pub trait ConnectionFactory: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Reject a configuration before any network attempt.
    fn validate(&self, config: &BackendConfig) -> DbResult<()>;

    /// Build a connection in the `Disconnected` state.
    fn create_connection(&self, config: &BackendConfig) -> DbResult<Box<dyn Connection>>;

    /// Decide whether a statement produces rows.
    fn classify(&self, statement: &str) -> StatementKind {
        StatementKind::classify_sql(statement)
    }
}

/// Check that a configuration names the factory's own backend.
pub fn ensure_kind(factory: &dyn ConnectionFactory, config: &BackendConfig) -> DbResult<BackendKind> {
    let kind = config.backend_kind()?;
    if kind != factory.kind() {
        return Err(DbError::configuration(format!(
            "{} configuration passed to the {} factory",
            kind.display_name(),
            factory.kind().display_name()
        )));
    }
    Ok(kind)
}

/// Immutable mapping from backend kind to factory.
#[derive(Debug, Clone, Default)]
pub struct FactoryRegistry {
    factories: Arc<BTreeMap<BackendKind, Arc<dyn ConnectionFactory>>>,
}

impl FactoryRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with every backend this crate ships a driver for.
    pub fn with_default_backends() -> Self {
        Self::builder()
            .register(SqlFactory::mysql())
            .register(SqlFactory::postgres())
            .register(SqlFactory::sqlite())
            .register(MongoFactory)
            .register(RedisFactory)
            .build()
    }

    /// Look up a factory by backend identifier, e.g. `"postgres"` or `"mariadb"`.
    pub fn resolve(&self, kind: &str) -> DbResult<Arc<dyn ConnectionFactory>> {
        let parsed: BackendKind = kind.parse()?;
        self.factories
            .get(&parsed)
            .cloned()
            .ok_or_else(|| DbError::unsupported_backend(kind.trim()))
    }

    pub fn get(&self, kind: BackendKind) -> DbResult<Arc<dyn ConnectionFactory>> {
        self.factories
            .get(&kind)
            .cloned()
            .ok_or_else(|| DbError::unsupported_backend(kind.as_str()))
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds, in declaration order.
    pub fn backends(&self) -> Vec<BackendKind> {
        self.factories.keys().copied().collect()
    }
}

/// Collects factories before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    factories: BTreeMap<BackendKind, Arc<dyn ConnectionFactory>>,
}

impl RegistryBuilder {
    /// Register a factory. A later registration for the same kind replaces the earlier one.
    pub fn register(self, factory: impl ConnectionFactory + 'static) -> Self {
        self.register_arc(Arc::new(factory))
    }

    pub fn register_arc(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        let kind = factory.kind();
        if self.factories.insert(kind, factory).is_some() {
            debug!(backend = %kind, "Replaced previously registered factory");
        }
        self
    }

    pub fn build(self) -> FactoryRegistry {
        FactoryRegistry {
            factories: Arc::new(self.factories),
        }
    }
}
