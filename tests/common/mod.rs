//! In-memory connection factory for pool tests.
//!
//! Counts every lifecycle event and lets tests inject connect, ping and query
//! failures without a database server.

#![allow(dead_code)]

use async_trait::async_trait;
use multidb_pool::db::factory::ensure_kind;
use multidb_pool::db::{Connection, ConnectionFactory, ConnectionMeta, ConnectionState};
use multidb_pool::error::{ConnectionErrorKind, DbError, DbResult, QueryErrorKind};
use multidb_pool::models::{BackendConfig, BackendKind, ExecResult, QueryParam, Row, RowSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Statement that makes a mock connection drop its session.
pub const BREAK: &str = "BREAK";
/// Statement that takes half a second.
pub const SLOW: &str = "SLOW";

#[derive(Debug, Default)]
pub struct MockStats {
    pub created: AtomicUsize,
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
}

impl MockStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MockBehavior {
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub connect_delay_ms: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    pub stats: Arc<MockStats>,
    pub behavior: Arc<MockBehavior>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.behavior.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ping(&self, fail: bool) {
        self.behavior.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn connect_delay(&self, delay: Duration) {
        self.behavior
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn shared(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }
}

/// Configuration the mock factory accepts.
pub fn mock_config() -> BackendConfig {
    BackendConfig::sqlite("mock.db")
}

impl ConnectionFactory for MockFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn validate(&self, config: &BackendConfig) -> DbResult<()> {
        let kind = ensure_kind(self, config)?;
        config.validate_common(kind)
    }

    fn create_connection(&self, config: &BackendConfig) -> DbResult<Box<dyn Connection>> {
        self.validate(config)?;
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            meta: ConnectionMeta::new(BackendKind::Sqlite),
            connected: false,
            stats: Arc::clone(&self.stats),
            behavior: Arc::clone(&self.behavior),
        }))
    }
}

pub struct MockConnection {
    meta: ConnectionMeta,
    connected: bool,
    stats: Arc<MockStats>,
    behavior: Arc<MockBehavior>,
}

impl MockConnection {
    fn ensure_connected(&self) -> DbResult<()> {
        if self.connected && !self.meta.is_broken() {
            Ok(())
        } else {
            Err(DbError::query(
                QueryErrorKind::ConnectionLost,
                "mock connection is not open",
                None,
            ))
        }
    }

    fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
            self.stats.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ConnectionMeta {
        &mut self.meta
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.meta.is_broken()
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.connected {
            return Ok(());
        }
        let delay = self.behavior.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.behavior.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                ConnectionErrorKind::Unreachable,
                "mock server unreachable",
                "start the mock server",
            ));
        }

        self.connected = true;
        self.meta.transition(ConnectionState::Connected);
        self.stats.connected.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.close();
        self.meta.transition(ConnectionState::Disconnected);
    }

    async fn query(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<RowSet> {
        self.ensure_connected()?;
        match sql {
            BREAK => {
                let lost: DbResult<RowSet> = Err(DbError::query(
                    QueryErrorKind::ConnectionLost,
                    "mock session dropped",
                    None,
                ));
                self.meta.observe(lost)
            }
            SLOW => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(RowSet::empty())
            }
            _ => {
                let mut row = Row::new();
                row.insert("statement".to_string(), serde_json::json!(sql));
                row.insert("connection".to_string(), serde_json::json!(self.meta.id.to_string()));
                Ok(RowSet::new(
                    vec!["statement".to_string(), "connection".to_string()],
                    vec![row],
                    false,
                ))
            }
        }
    }

    async fn execute(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<ExecResult> {
        self.ensure_connected()?;
        if sql == SLOW {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(ExecResult::new(1, None))
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.ensure_connected()?;
        if self.behavior.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::query(
                QueryErrorKind::ConnectionLost,
                "mock ping failed",
                None,
            ));
        }
        Ok(())
    }
}
