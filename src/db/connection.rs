//! The backend-neutral connection abstraction.
//!
//! A [`Connection`] is one logical session with one backend. The pool only ever
//! sees `Box<dyn Connection>`; drivers stay behind the trait.

use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ExecResult, QueryParam, RowSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Open and idle.
    Connected,
    /// Checked out by a caller.
    InUse,
    /// Terminal. Never handed out again.
    Broken,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Broken, _) => false,
            (_, Broken) => true,
            (Disconnected, Connected) => true,
            (Connected, InUse) | (InUse, Connected) => true,
            (Connected | InUse, Disconnected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::InUse => write!(f, "in_use"),
            Self::Broken => write!(f, "broken"),
        }
    }
}

/// Identity, state and timestamps shared by every connection implementation.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub id: Uuid,
    pub backend: BackendKind,
    state: ConnectionState,
    pub created_at: Instant,
    pub created_at_utc: DateTime<Utc>,
    last_used: Instant,
}

impl ConnectionMeta {
    pub fn new(backend: BackendKind) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            backend,
            state: ConnectionState::Disconnected,
            created_at: now,
            created_at_utc: Utc::now(),
            last_used: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply a state transition. Illegal transitions are ignored and reported as `false`.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            debug!(
                connection_id = %self.id,
                from = %self.state,
                to = %next,
                "Ignoring illegal connection state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn mark_broken(&mut self) {
        self.transition(ConnectionState::Broken);
    }

    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    /// Stamp the last-used time.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Pass a statement result through, marking the connection broken when the
    /// error means the session can no longer be trusted.
    pub fn observe<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(e) = &result {
            if e.is_connection_fatal() {
                debug!(connection_id = %self.id, error = %e, "Connection marked broken");
                self.mark_broken();
            }
        }
        result
    }
}

/// One logical session with one backend.
///
/// Methods take `&mut self`: a checked-out connection is owned by exactly one
/// caller, so implementations need not be `Sync`.
#[async_trait]
pub trait Connection: Send {
    fn meta(&self) -> &ConnectionMeta;

    fn meta_mut(&mut self) -> &mut ConnectionMeta;

    fn id(&self) -> Uuid {
        self.meta().id
    }

    fn backend(&self) -> BackendKind {
        self.meta().backend
    }

    fn state(&self) -> ConnectionState {
        self.meta().state()
    }

    fn is_broken(&self) -> bool {
        self.meta().is_broken()
    }

    /// No side effects.
    fn is_connected(&self) -> bool;

    /// Establish the session. A no-op when already connected.
    async fn connect(&mut self) -> DbResult<()>;

    /// Release native resources. Safe to call in any state; never fails.
    async fn disconnect(&mut self);

    /// Run a statement that produces rows.
    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<RowSet>;

    /// Run a statement and keep at most `max_rows` rows.
    ///
    /// Implementations that can stop reading early should override this.
    async fn query_limited(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        max_rows: usize,
    ) -> DbResult<RowSet> {
        let rows = self.query(sql, params).await?;
        if rows.remaining() <= max_rows {
            return Ok(rows);
        }
        let columns = rows.columns().to_vec();
        Ok(RowSet::new(columns, rows.take(max_rows).collect(), true))
    }

    /// Run a statement that does not produce rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult>;

    /// Cheap liveness check.
    async fn ping(&mut self) -> DbResult<()>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("backend", &self.backend())
            .field("state", &self.state())
            .finish()
    }
}

/// Error for operations attempted on a connection that is not open.
pub(crate) fn not_connected(meta: &ConnectionMeta) -> DbError {
    DbError::query(
        crate::error::QueryErrorKind::ConnectionLost,
        format!(
            "{} connection {} is {}",
            meta.backend.display_name(),
            meta.id,
            meta.state()
        ),
        None,
    )
}
