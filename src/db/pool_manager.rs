//! One lazily created [`ConnectionPool`] per distinct backend configuration.
//!
//! # Design Decisions
//!
//! - **`OnceCell` per pool key**: concurrent first requests for the same target
//!   share one pool instead of racing to build several
//! - **Pool options are not part of the key**: the first caller's options configure
//!   the pool; later callers with different options reuse it
//! - **Drain under lock, shut down outside it**: `shutdown_all` never awaits while
//!   holding the map lock
//! - **No pool outlives shutdown**: `closed` is checked again under the write lock
//!   and after initialization, so a creation racing `shutdown_all` either lands in
//!   the drained map or is closed before it is returned

use crate::db::factory::ConnectionFactory;
use crate::db::pool::{ConnectionPool, PoolStatus};
use crate::error::{DbError, DbResult, PoolErrorKind};
use crate::models::{BackendConfig, BackendKind};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

/// Identity of a pool: backend kind plus the canonical connection target.
///
/// Hosts compare case-insensitively and a missing port equals the backend's
/// default port.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    kind: BackendKind,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    charset: Option<String>,
}

impl PoolKey {
    pub fn new(kind: BackendKind, config: &BackendConfig) -> Self {
        Self {
            kind,
            host: config.host_trimmed().map(str::to_ascii_lowercase),
            port: config.port_or_default(kind),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            charset: config.charset.as_deref().map(str::to_ascii_lowercase),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://", self.kind.as_str())?;
        if let Some(user) = &self.username {
            write!(f, "{}@", user)?;
        }
        if let Some(host) = &self.host {
            write!(f, "{}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "/{}", self.database.as_deref().unwrap_or(""))
    }
}

impl std::fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoolKey({})", self)
    }
}

/// Registry of live pools keyed by [`PoolKey`].
#[derive(Default)]
pub struct PoolManager {
    pools: RwLock<HashMap<PoolKey, Arc<OnceCell<ConnectionPool>>>>,
    closed: AtomicBool,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool for `config`, creating it on first use.
    pub async fn get_or_create(
        &self,
        factory: &Arc<dyn ConnectionFactory>,
        config: &BackendConfig,
    ) -> DbResult<ConnectionPool> {
        if self.is_closed() {
            return Err(manager_closed());
        }

        let key = PoolKey::new(factory.kind(), config);
        let cell = {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(&key) {
                Arc::clone(cell)
            } else {
                drop(pools);
                let mut pools = self.pools.write().await;
                if self.is_closed() {
                    return Err(manager_closed());
                }
                Arc::clone(
                    pools
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(OnceCell::new())),
                )
            }
        };

        let pool = cell
            .get_or_try_init(|| async {
                debug!(pool = %key, "Creating connection pool");
                let pool = ConnectionPool::from_backend_config(Arc::clone(factory), config.clone())?;
                if pool.config().min_idle > 0 {
                    pool.warm_up().await?;
                }
                Ok::<_, DbError>(pool)
            })
            .await?;

        if self.is_closed() {
            // The map may have been drained before this pool existed.
            pool.shutdown(Duration::ZERO).await;
            return Err(manager_closed());
        }
        Ok(pool.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of initialized pools.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Snapshot of every initialized pool.
    pub async fn statuses(&self) -> Vec<(PoolKey, PoolStatus)> {
        let pools = self.pools.read().await;
        let mut statuses: Vec<_> = pools
            .iter()
            .filter_map(|(key, cell)| cell.get().map(|pool| (key.clone(), pool.status())))
            .collect();
        statuses.sort_by_key(|(key, _)| key.to_string());
        statuses
    }

    /// Shut every pool down concurrently. Later `get_or_create` calls fail with
    /// `Pool{Closed}`.
    pub async fn shutdown_all(&self, grace: Duration) {
        self.closed.store(true, Ordering::Release);

        let pools: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools
                .drain()
                .filter_map(|(key, cell)| cell.get().cloned().map(|pool| (key, pool)))
                .collect()
        };

        info!(count = pools.len(), "Shutting down connection pools");
        join_all(pools.iter().map(|(key, pool)| async move {
            debug!(pool = %key, "Closing connection pool");
            pool.shutdown(grace).await;
        }))
        .await;
    }
}

fn manager_closed() -> DbError {
    DbError::pool(PoolErrorKind::Closed, "Pool manager has been shut down")
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
