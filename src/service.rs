//! Query service.
//!
//! The entry point for running statements: resolves the backend's factory, finds
//! or creates the pool for the configuration, checks out a connection, routes the
//! statement and always hands the connection back.

use crate::config::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_SHUTDOWN_GRACE_SECS};
use crate::db::{
    ConnectionFactory, ConnectionPool, FactoryRegistry, PoolKey, PoolManager, PoolStatus,
    PooledConnection,
};
use crate::error::{DbError, DbResult, QueryErrorKind};
use crate::models::{
    BackendConfig, DEFAULT_MAX_ROWS, MAX_ROW_LIMIT, QueryOutcome, QueryParam, QueryRequest,
    StatementKind,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Per-service execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub query_timeout: Duration,
    /// Rows beyond this are dropped and the result is marked truncated.
    pub max_rows: usize,
    /// How long `shutdown` waits for checked-out connections.
    pub shutdown_grace: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            max_rows: DEFAULT_MAX_ROWS,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

#[derive(Debug)]
pub struct QueryService {
    registry: FactoryRegistry,
    pools: PoolManager,
    options: ServiceOptions,
}

impl QueryService {
    pub fn new(registry: FactoryRegistry, options: ServiceOptions) -> Self {
        Self {
            registry,
            pools: PoolManager::new(),
            options: ServiceOptions {
                max_rows: options.max_rows.clamp(1, MAX_ROW_LIMIT),
                ..options
            },
        }
    }

    /// Service with every built-in backend and default limits.
    pub fn with_default_backends() -> Self {
        Self::new(
            FactoryRegistry::with_default_backends(),
            ServiceOptions::default(),
        )
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Run a statement, routing it by its leading keyword (Redis command name, MongoDB command).
    pub async fn execute(
        &self,
        kind: &str,
        config: &BackendConfig,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryOutcome> {
        self.run(kind, config, sql, params, None).await
    }

    /// Run a statement as a row-producing query regardless of its keyword.
    pub async fn query(
        &self,
        kind: &str,
        config: &BackendConfig,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryOutcome> {
        self.run(kind, config, sql, params, Some(StatementKind::Query))
            .await
    }

    /// Run a statement for its affected-row count regardless of its keyword.
    pub async fn execute_statement(
        &self,
        kind: &str,
        config: &BackendConfig,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryOutcome> {
        self.run(kind, config, sql, params, Some(StatementKind::Execute))
            .await
    }

    /// Run a request record against the backend named by `config.kind`.
    pub async fn execute_request(
        &self,
        config: &BackendConfig,
        request: &QueryRequest,
    ) -> DbResult<QueryOutcome> {
        self.run(&config.kind, config, &request.sql, &request.params, None)
            .await
    }

    /// Resolve, validate and fetch the pool for a configuration.
    pub async fn pool_for(
        &self,
        kind: &str,
        config: &BackendConfig,
    ) -> DbResult<(Arc<dyn ConnectionFactory>, ConnectionPool)> {
        let factory = self.registry.resolve(kind)?;
        factory.validate(config)?;
        let pool = self.pools.get_or_create(&factory, config).await?;
        Ok((factory, pool))
    }

    /// Status of every pool the service has created.
    pub async fn pool_status(&self) -> Vec<(PoolKey, PoolStatus)> {
        self.pools.statuses().await
    }

    /// Close every pool, waiting up to the configured grace period for
    /// checked-out connections.
    pub async fn shutdown(&self) {
        self.pools.shutdown_all(self.options.shutdown_grace).await;
    }

    async fn run(
        &self,
        kind: &str,
        config: &BackendConfig,
        sql: &str,
        params: &[QueryParam],
        route: Option<StatementKind>,
    ) -> DbResult<QueryOutcome> {
        if sql.trim().is_empty() {
            return Err(DbError::invalid_input("Statement cannot be empty"));
        }

        let (factory, pool) = self.pool_for(kind, config).await?;
        let route = route.unwrap_or_else(|| factory.classify(sql));
        let started = Instant::now();

        let mut conn = pool.acquire().await?;
        let result = self.run_on(&mut conn, route, sql, params).await;
        let healthy = !conn.is_broken();
        let outcome = conn.release(healthy).await;

        debug!(
            backend = %pool.backend(),
            ?route,
            ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Statement finished"
        );
        result
    }

    async fn run_on(
        &self,
        conn: &mut PooledConnection,
        route: StatementKind,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryOutcome> {
        let limit = self.options.query_timeout;
        let finished = match route {
            StatementKind::Query => timeout(
                limit,
                conn.query_limited(sql, params, self.options.max_rows),
            )
            .await
            .map(|r| r.map(QueryOutcome::Rows)),
            StatementKind::Execute => timeout(limit, conn.execute(sql, params))
                .await
                .map(|r| r.map(QueryOutcome::Exec)),
        };

        match finished {
            Ok(result) => conn.meta_mut().observe(result),
            Err(_) => {
                warn!(
                    connection_id = %conn.id(),
                    timeout_ms = limit.as_millis() as u64,
                    "Statement timed out; discarding connection"
                );
                conn.meta_mut().mark_broken();
                Err(DbError::query(
                    QueryErrorKind::Timeout,
                    format!("Statement exceeded {}ms", limit.as_millis()),
                    None,
                ))
            }
        }
    }
}
