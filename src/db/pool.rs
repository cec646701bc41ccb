//! Bounded connection pool.
//!
//! One [`ConnectionPool`] serves connections built by one factory for one backend
//! configuration.
//!
//! # Design Decisions
//!
//! - **Fair `Semaphore` with `max_size` permits**: waiters are served in arrival
//!   order, and a caller holding a permit is guaranteed either an idle connection
//!   or room to create one
//! - **`std::sync::Mutex` for bookkeeping**: the idle queue, the checked-out set
//!   and `current_size` change together; the lock is never held across an await
//! - **RAII guards**: [`PooledConnection`] returns its connection on drop, and an
//!   internal slot guard undoes a size reservation if an acquire is abandoned
//!   mid-connect
//! - **Weak reference in the eviction task**: the task exits once the pool is dropped
//!
//! # Invariants
//!
//! - `current_size <= max_size`
//! - every connection is idle, checked out, or destroyed, never two at once
//! - a permit is released only after the bookkeeping it protects is updated

use crate::config::PoolOptions;
use crate::db::connection::{Connection, ConnectionState};
use crate::db::factory::ConnectionFactory;
use crate::error::{ConnectionErrorKind, DbError, DbResult, PoolErrorKind};
use crate::models::{BackendConfig, BackendKind};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runtime pool configuration, resolved from [`PoolOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
    pub connect_timeout: Duration,
    pub eviction_interval: Duration,
    pub test_before_acquire: bool,
}

impl PoolConfig {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_test_before_acquire(mut self, test: bool) -> Self {
        self.test_before_acquire = test;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolOptions::default().to_pool_config(BackendKind::Postgres)
    }
}

/// Pool lifecycle as reported by [`ConnectionPool::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// No connections yet.
    Empty,
    /// Below `min_idle`.
    Warming,
    /// Serving acquire and release.
    Steady,
    /// Shutdown in progress.
    Draining,
    Closed,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub backend: BackendKind,
    pub phase: PoolPhase,
    pub max_size: u32,
    pub current_size: u32,
    pub idle: u32,
    pub in_use: u32,
}

/// What happened to a connection handed back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Back in the idle set.
    Returned,
    /// Disconnected and removed; `current_size` shrank by one.
    Discarded,
    /// The pool was not tracking this connection. It was disconnected and nothing
    /// else changed.
    Untracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Draining,
    Closed,
}

struct PoolState {
    lifecycle: Lifecycle,
    idle: VecDeque<Box<dyn Connection>>,
    checked_out: HashSet<Uuid>,
    current_size: u32,
}

impl PoolState {
    /// Pull out idle connections that must not be handed out again.
    fn take_expired(&mut self, config: &PoolConfig) -> Vec<Box<dyn Connection>> {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.idle.len());
        for conn in self.idle.drain(..) {
            match expiry_reason(conn.as_ref(), config) {
                Some(reason) => {
                    debug!(connection_id = %conn.id(), reason, "Evicting idle connection");
                    expired.push(conn);
                }
                None => kept.push_back(conn),
            }
        }
        self.idle = kept;
        self.current_size = self.current_size.saturating_sub(expired.len() as u32);
        expired
    }

    fn phase(&self, config: &PoolConfig) -> PoolPhase {
        match self.lifecycle {
            Lifecycle::Draining => PoolPhase::Draining,
            Lifecycle::Closed => PoolPhase::Closed,
            Lifecycle::Open if self.current_size == 0 => PoolPhase::Empty,
            Lifecycle::Open if self.current_size < config.min_idle => PoolPhase::Warming,
            Lifecycle::Open => PoolPhase::Steady,
        }
    }
}

fn expiry_reason(conn: &dyn Connection, config: &PoolConfig) -> Option<&'static str> {
    if conn.is_broken() {
        Some("broken")
    } else if !conn.is_connected() {
        Some("disconnected")
    } else if conn.meta().age() >= config.max_lifetime {
        Some("max_lifetime")
    } else if conn.meta().idle_for() >= config.idle_timeout {
        Some("idle_timeout")
    } else {
        None
    }
}

struct PoolInner {
    backend: BackendKind,
    factory: Arc<dyn ConnectionFactory>,
    backend_config: BackendConfig,
    config: PoolConfig,
    state: Mutex<PoolState>,
    semaphore: Arc<Semaphore>,
    /// Signalled on every release; shutdown waits on it.
    released: Notify,
}

/// A bounded pool of connections for one backend configuration.
///
/// Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.inner.backend)
            .field("target", &self.inner.backend_config.describe())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create a pool. No connection is opened until the first acquire or
    /// [`warm_up`](Self::warm_up).
    ///
    /// Must be called within a tokio runtime for background eviction to run;
    /// otherwise eviction happens lazily on acquire only.
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        backend_config: BackendConfig,
        config: PoolConfig,
    ) -> DbResult<Self> {
        factory.validate(&backend_config)?;
        if config.max_size == 0 {
            return Err(DbError::configuration("max_size must be greater than 0"));
        }
        if config.eviction_interval.is_zero() {
            return Err(DbError::configuration(
                "eviction_interval must be greater than 0",
            ));
        }

        let inner = Arc::new(PoolInner {
            backend: factory.kind(),
            factory,
            backend_config,
            config: PoolConfig {
                min_idle: config.min_idle.min(config.max_size),
                ..config
            },
            state: Mutex::new(PoolState {
                lifecycle: Lifecycle::Open,
                idle: VecDeque::with_capacity(config.max_size as usize),
                checked_out: HashSet::new(),
                current_size: 0,
            }),
            semaphore: Arc::new(Semaphore::new(config.max_size as usize)),
            released: Notify::new(),
        });
        spawn_maintenance_task(&inner);

        debug!(
            backend = %inner.backend,
            target = %inner.backend_config.describe(),
            max_size = inner.config.max_size,
            "Created connection pool"
        );
        Ok(Self { inner })
    }

    /// Create a pool configured by the record's own `pool` options.
    pub fn from_backend_config(
        factory: Arc<dyn ConnectionFactory>,
        backend_config: BackendConfig,
    ) -> DbResult<Self> {
        let config = backend_config.pool.to_pool_config(factory.kind());
        Self::new(factory, backend_config, config)
    }

    pub fn backend(&self) -> BackendKind {
        self.inner.backend
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.inner.factory
    }

    /// Acquire with the configured acquire timeout.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    pub async fn acquire_timeout(&self, timeout: Duration) -> DbResult<PooledConnection> {
        self.acquire_with_cancel(timeout, std::future::pending::<()>())
            .await
    }

    /// Acquire, giving up when `timeout` elapses or `cancel` completes.
    ///
    /// A cancelled or timed-out caller leaves the wait queue holding nothing.
    pub async fn acquire_with_cancel<C>(
        &self,
        timeout: Duration,
        cancel: C,
    ) -> DbResult<PooledConnection>
    where
        C: Future<Output = ()>,
    {
        self.inner.ensure_open()?;
        let started = Instant::now();

        let permit = tokio::select! {
            biased;
            _ = cancel => {
                debug!(backend = %self.inner.backend, "Acquire cancelled while waiting");
                return Err(DbError::pool(
                    PoolErrorKind::Cancelled,
                    "Acquire cancelled while waiting for a connection",
                ));
            }
            acquired = tokio::time::timeout(
                timeout,
                Arc::clone(&self.inner.semaphore).acquire_owned(),
            ) => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(closed_error()),
                Err(_) => {
                    warn!(
                        backend = %self.inner.backend,
                        max_size = self.inner.config.max_size,
                        timeout_ms = timeout.as_millis() as u64,
                        "Connection pool exhausted"
                    );
                    return Err(DbError::pool(
                        PoolErrorKind::Exhausted,
                        format!(
                            "No connection available within {}ms (max_size {})",
                            timeout.as_millis(),
                            self.inner.config.max_size
                        ),
                    ));
                }
            },
        };

        let conn = self.inner.checkout(permit).await?;
        debug!(
            connection_id = %conn.id(),
            waited_ms = started.elapsed().as_millis() as u64,
            "Connection acquired"
        );
        Ok(conn)
    }

    /// Hand back a connection obtained through [`PooledConnection::detach`].
    ///
    /// A connection this pool is not tracking (never detached from it, or already
    /// returned) is disconnected and reported as [`ReleaseOutcome::Untracked`]
    /// without touching the pool's counts.
    pub async fn release(&self, conn: Box<dyn Connection>, healthy: bool) -> ReleaseOutcome {
        let (outcome, discard) = self.inner.check_in(conn, healthy);
        if let Some(mut conn) = discard {
            conn.disconnect().await;
        }
        if outcome != ReleaseOutcome::Untracked {
            // The detached connection's permit was forgotten.
            self.inner.semaphore.add_permits(1);
            self.inner.released.notify_waiters();
        }
        outcome
    }

    /// Create connections until `min_idle` is reached. Returns how many were created.
    pub async fn warm_up(&self) -> DbResult<u32> {
        self.inner.warm_up().await
    }

    /// Disconnect idle connections past their idle timeout or max lifetime.
    /// Returns how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        self.inner.evict_expired().await
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock_state();
        PoolStatus {
            backend: self.inner.backend,
            phase: state.phase(&self.inner.config),
            max_size: self.inner.config.max_size,
            current_size: state.current_size,
            idle: state.idle.len() as u32,
            in_use: state.checked_out.len() as u32,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().lifecycle != Lifecycle::Open
    }

    /// Stop serving and close every connection.
    ///
    /// New and waiting acquires fail with `Pool{Closed}`. Checked-out connections
    /// get up to `grace` to come back; any returned later are disconnected on
    /// release instead of being pooled.
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut state = self.inner.lock_state();
            if state.lifecycle != Lifecycle::Open {
                return;
            }
            state.lifecycle = Lifecycle::Draining;
        }
        self.inner.semaphore.close();
        info!(backend = %self.inner.backend, "Draining connection pool");

        let drained = tokio::time::timeout(grace, async {
            loop {
                let notified = self.inner.released.notified();
                let empty = self.inner.lock_state().checked_out.is_empty();
                if empty {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        let (idle, still_checked_out) = {
            let mut state = self.inner.lock_state();
            state.lifecycle = Lifecycle::Closed;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.current_size = state.current_size.saturating_sub(idle.len() as u32);
            (idle, state.checked_out.len())
        };
        for mut conn in idle {
            conn.disconnect().await;
        }

        if !drained {
            warn!(
                backend = %self.inner.backend,
                still_checked_out,
                "Shutdown grace period elapsed; remaining connections close when released"
            );
        }
        info!(backend = %self.inner.backend, "Connection pool closed");
    }
}

enum Candidate {
    Idle(Box<dyn Connection>),
    Create,
    Saturated,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> DbResult<()> {
        let lifecycle = self.lock_state().lifecycle;
        if lifecycle == Lifecycle::Open {
            Ok(())
        } else {
            Err(closed_error())
        }
    }

    /// Turn a permit into a checked-out connection.
    async fn checkout(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> DbResult<PooledConnection> {
        let mut slot = Slot::new(Arc::clone(self), permit);
        loop {
            let (candidate, expired) = {
                let mut state = self.lock_state();
                if state.lifecycle != Lifecycle::Open {
                    return Err(closed_error());
                }
                let expired = state.take_expired(&self.config);
                let candidate = match state.idle.pop_back() {
                    Some(conn) => Candidate::Idle(conn),
                    None if state.current_size < self.config.max_size => {
                        state.current_size += 1;
                        Candidate::Create
                    }
                    None => Candidate::Saturated,
                };
                if !matches!(candidate, Candidate::Saturated) {
                    slot.reserved = true;
                }
                (candidate, expired)
            };
            destroy_all(expired).await;

            match candidate {
                Candidate::Idle(mut conn) => {
                    if self.config.test_before_acquire {
                        if let Err(e) = conn.ping().await {
                            debug!(connection_id = %conn.id(), error = %e, "Idle connection failed ping");
                            conn.meta_mut().mark_broken();
                            conn.disconnect().await;
                            slot.unreserve();
                            continue;
                        }
                    }
                    return self.hand_out(slot, conn).await;
                }
                Candidate::Create => {
                    let conn = self.open_connection().await?;
                    return self.hand_out(slot, conn).await;
                }
                Candidate::Saturated => {
                    // Unreachable while the permit invariant holds.
                    return Err(DbError::internal(
                        "Pool saturated although a permit was held",
                    ));
                }
            }
        }
    }

    async fn hand_out(
        self: &Arc<Self>,
        mut slot: Slot,
        mut conn: Box<dyn Connection>,
    ) -> DbResult<PooledConnection> {
        let open = {
            let mut state = self.lock_state();
            if state.lifecycle == Lifecycle::Open {
                state.checked_out.insert(conn.id());
                slot.reserved = false;
                true
            } else {
                false
            }
        };
        if !open {
            conn.disconnect().await;
            return Err(closed_error());
        }

        conn.meta_mut().transition(ConnectionState::InUse);
        conn.meta_mut().touch();
        Ok(PooledConnection {
            conn: Some(conn),
            permit: slot.permit.take(),
            pool: Arc::clone(self),
        })
    }

    /// Build and connect a new connection within the connect timeout.
    async fn open_connection(&self) -> DbResult<Box<dyn Connection>> {
        let mut conn = self.factory.create_connection(&self.backend_config)?;
        match tokio::time::timeout(self.config.connect_timeout, conn.connect()).await {
            Ok(Ok(())) => {
                debug!(
                    connection_id = %conn.id(),
                    backend = %self.backend,
                    "Opened new pooled connection"
                );
                Ok(conn)
            }
            Ok(Err(e)) => {
                warn!(backend = %self.backend, error = %e, "Failed to open connection");
                conn.disconnect().await;
                Err(e)
            }
            Err(_) => {
                warn!(
                    backend = %self.backend,
                    timeout_ms = self.config.connect_timeout.as_millis() as u64,
                    "Connection attempt timed out"
                );
                conn.disconnect().await;
                Err(DbError::connection(
                    ConnectionErrorKind::Timeout,
                    format!(
                        "Connecting to {} took longer than {}ms",
                        self.backend_config.describe(),
                        self.config.connect_timeout.as_millis()
                    ),
                    "Check that the server is reachable or raise connect_timeout_ms",
                ))
            }
        }
    }

    /// Update bookkeeping for a returned connection.
    ///
    /// Returns the connection back when the caller must disconnect it.
    fn check_in(
        &self,
        mut conn: Box<dyn Connection>,
        healthy: bool,
    ) -> (ReleaseOutcome, Option<Box<dyn Connection>>) {
        let id = conn.id();
        let mut state = self.lock_state();

        if !state.checked_out.remove(&id) {
            drop(state);
            warn!(
                connection_id = %id,
                backend = %self.backend,
                "Released a connection this pool is not tracking; discarding it"
            );
            return (ReleaseOutcome::Untracked, Some(conn));
        }

        let discard_reason = if !healthy {
            Some("unhealthy")
        } else if conn.is_broken() {
            Some("broken")
        } else if !conn.is_connected() {
            Some("disconnected")
        } else if state.lifecycle != Lifecycle::Open {
            Some("pool closing")
        } else if conn.meta().age() >= self.config.max_lifetime {
            Some("max_lifetime")
        } else {
            None
        };

        match discard_reason {
            Some(reason) => {
                state.current_size = state.current_size.saturating_sub(1);
                drop(state);
                debug!(connection_id = %id, reason, "Discarding released connection");
                (ReleaseOutcome::Discarded, Some(conn))
            }
            None => {
                conn.meta_mut().transition(ConnectionState::Connected);
                conn.meta_mut().touch();
                state.idle.push_back(conn);
                (ReleaseOutcome::Returned, None)
            }
        }
    }

    async fn evict_expired(&self) -> usize {
        let expired = self.lock_state().take_expired(&self.config);
        let count = expired.len();
        destroy_all(expired).await;
        count
    }

    async fn warm_up(self: &Arc<Self>) -> DbResult<u32> {
        let mut created = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            let mut slot = Slot::new(Arc::clone(self), permit);
            {
                let mut state = self.lock_state();
                if state.lifecycle != Lifecycle::Open
                    || state.current_size >= self.config.min_idle
                    || state.current_size >= self.config.max_size
                {
                    break;
                }
                state.current_size += 1;
                slot.reserved = true;
            }

            let mut conn = self.open_connection().await?;
            conn.meta_mut().touch();
            let rejected = {
                let mut state = self.lock_state();
                if state.lifecycle == Lifecycle::Open {
                    state.idle.push_back(conn);
                    slot.reserved = false;
                    None
                } else {
                    Some(conn)
                }
            };
            if let Some(mut conn) = rejected {
                conn.disconnect().await;
                break;
            }
            created += 1;
        }

        if created > 0 {
            debug!(backend = %self.backend, created, "Warmed up connection pool");
        }
        Ok(created)
    }
}

fn closed_error() -> DbError {
    DbError::pool(PoolErrorKind::Closed, "Connection pool is closed")
}

async fn destroy_all(conns: Vec<Box<dyn Connection>>) {
    for mut conn in conns {
        conn.disconnect().await;
    }
}

/// A permit plus an optional size reservation for a connection being set up.
///
/// Dropping a reserved slot gives the reservation back before the permit is
/// released, so an abandoned acquire never leaks capacity.
struct Slot {
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
    reserved: bool,
}

impl Slot {
    fn new(pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            permit: Some(permit),
            reserved: false,
        }
    }

    fn unreserve(&mut self) {
        if self.reserved {
            self.reserved = false;
            let mut state = self.pool.lock_state();
            state.current_size = state.current_size.saturating_sub(1);
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.unreserve();
    }
}

/// Background eviction. Holds only a weak reference between runs.
fn spawn_maintenance_task(pool: &Arc<PoolInner>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("No tokio runtime; idle connections are evicted lazily on acquire");
        return;
    };
    let weak_pool = Arc::downgrade(pool);
    let period = pool.config.eviction_interval;

    handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(pool) = weak_pool.upgrade() else {
                debug!("Connection pool dropped, eviction task exiting");
                return;
            };
            let open = pool.lock_state().lifecycle == Lifecycle::Open;
            if !open {
                return;
            }

            let evicted = pool.evict_expired().await;
            if evicted > 0 {
                debug!(backend = %pool.backend, evicted, "Evicted idle connections");
            }
            if let Err(e) = pool.warm_up().await {
                warn!(backend = %pool.backend, error = %e, "Failed to replenish idle connections");
            }
        }
    });
}

/// A checked-out connection.
///
/// Dereferences to the connection. Return it with [`release`](Self::release); if
/// dropped instead, it is returned automatically, healthy unless the connection
/// marked itself broken.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

const RELEASED: &str = "pooled connection used after release";

impl PooledConnection {
    /// Return the connection. An unhealthy connection is disconnected and its slot
    /// freed for a replacement.
    pub async fn release(mut self, healthy: bool) -> ReleaseOutcome {
        let Some(conn) = self.conn.take() else {
            return ReleaseOutcome::Untracked;
        };
        let (outcome, discard) = self.pool.check_in(conn, healthy);
        if let Some(mut conn) = discard {
            conn.disconnect().await;
        }
        self.pool.released.notify_waiters();
        drop(self.permit.take());
        outcome
    }

    /// Take the connection out of the guard without returning it.
    ///
    /// The pool keeps counting it as checked out until it is handed back through
    /// [`ConnectionPool::release`].
    pub fn detach(mut self) -> Box<dyn Connection> {
        if let Some(permit) = self.permit.take() {
            permit.forget();
        }
        self.conn.take().expect(RELEASED)
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect(RELEASED)
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect(RELEASED)
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.conn)
            .field("backend", &self.pool.backend)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let healthy = !conn.is_broken();
        let (outcome, discard) = self.pool.check_in(conn, healthy);
        self.pool.released.notify_waiters();
        let permit = self.permit.take();

        debug!(?outcome, "Connection released via Drop");
        match (discard, tokio::runtime::Handle::try_current()) {
            (Some(mut conn), Ok(handle)) => {
                handle.spawn(async move {
                    conn.disconnect().await;
                    drop(permit);
                });
            }
            _ => drop(permit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.min_idle, 0);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert!(config.test_before_acquire);
    }

    #[test]
    fn test_pool_config_builders() {
        let config = PoolConfig::new(2)
            .with_acquire_timeout(Duration::from_millis(100))
            .with_idle_timeout(Duration::from_millis(50))
            .with_test_before_acquire(false);
        assert_eq!(config.max_size, 2);
        assert_eq!(config.acquire_timeout, Duration::from_millis(100));
        assert_eq!(config.idle_timeout, Duration::from_millis(50));
        assert!(!config.test_before_acquire);
    }

    #[test]
    fn test_phase_derivation() {
        let config = PoolConfig::new(4).with_min_idle(2);
        let mut state = PoolState {
            lifecycle: Lifecycle::Open,
            idle: VecDeque::new(),
            checked_out: HashSet::new(),
            current_size: 0,
        };
        assert_eq!(state.phase(&config), PoolPhase::Empty);
        state.current_size = 1;
        assert_eq!(state.phase(&config), PoolPhase::Warming);
        state.current_size = 2;
        assert_eq!(state.phase(&config), PoolPhase::Steady);
        state.lifecycle = Lifecycle::Draining;
        assert_eq!(state.phase(&config), PoolPhase::Draining);
        state.lifecycle = Lifecycle::Closed;
        assert_eq!(state.phase(&config), PoolPhase::Closed);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(crate::db::sql::SqlFactory::sqlite());
        let result = ConnectionPool::new(
            Arc::clone(&factory),
            BackendConfig::sqlite(":memory:"),
            PoolConfig::new(0),
        );
        assert!(matches!(result, Err(DbError::Configuration { .. })));

        let result = ConnectionPool::new(factory, BackendConfig::new("sqlite"), PoolConfig::new(1));
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_sqlite_pool_reuses_connection() {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(crate::db::sql::SqlFactory::sqlite());
        let pool = ConnectionPool::new(
            factory,
            BackendConfig::sqlite(":memory:"),
            PoolConfig::new(1),
        )
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let first_id = conn.id();
        conn.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        assert_eq!(conn.release(true).await, ReleaseOutcome::Returned);

        // Same in-memory database, so the table is still there.
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), first_id);
        let rows = conn.query("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows.into_rows()[0]["n"], serde_json::json!(0));
        drop(conn);

        let status = pool.status();
        assert_eq!(status.current_size, 1);
        assert_eq!(status.idle, 1);
        assert_eq!(status.in_use, 0);
        pool.shutdown(Duration::from_millis(100)).await;
        assert_eq!(pool.status().phase, PoolPhase::Closed);
    }
}
