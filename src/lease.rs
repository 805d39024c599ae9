//! Scoped connection borrows with exactly-once disposition.
//!
//! A [`Lease`] is the only place a borrowed connection's fate is decided. It owns the connection
//! until [`release`](Lease::release) or [`invalidate`](Lease::invalidate) consumes it; dropping
//! a lease that is still holding its connection invalidates it. That covers cancellation: when
//! an outer timeout drops an in-flight attempt, the lease drops with it and the pool is told
//! before the call finishes.
//!
//! Every stage installed through the lease is detached before either disposition, so a released
//! connection never re-enters the pool with a timer attached.

use crate::connection::{Connection, ConnectionManager};
use crate::error::BoxError;
use crate::key::RequestKey;
use crate::stage::{Stage, StageId};
use std::fmt;
use std::sync::Arc;

/// Terminal fate of a borrowed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Handed back to the pool for reuse.
    Release,
    /// Destroyed.
    Invalidate,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Release => write!(f, "release"),
            Disposition::Invalidate => write!(f, "invalidate"),
        }
    }
}

/// A connection on loan, returned or destroyed exactly once.
pub struct Lease<M: ConnectionManager> {
    manager: Arc<M>,
    key: RequestKey,
    slot: Option<M::Connection>,
    fresh: bool,
    stages: Vec<(StageId, &'static str)>,
}

impl<M: ConnectionManager> Lease<M> {
    /// Borrow a connection for `key`.
    pub async fn acquire(manager: Arc<M>, key: RequestKey) -> Result<Self, BoxError> {
        let borrowed = manager.borrow(&key).await?;
        tracing::debug!(key = %key, fresh = borrowed.fresh, "connection borrowed");
        Ok(Self {
            manager,
            key,
            slot: Some(borrowed.connection),
            fresh: borrowed.fresh,
            stages: Vec::new(),
        })
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Whether the pool created this connection for this borrow.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// The held connection.
    pub fn connection_mut(&mut self) -> &mut M::Connection {
        // `slot` is only emptied by `dispose`, which consumes or drops the lease.
        self.slot.as_mut().expect("lease holds its connection until disposed")
    }

    /// Splice `stage` into the connection; it is detached before disposition at the latest.
    pub fn install_stage(&mut self, stage: Arc<dyn Stage>) {
        let entry = (stage.id(), stage.name());
        self.connection_mut().install_stage(stage);
        self.stages.push(entry);
    }

    /// Detach every stage installed through this lease.
    pub fn detach_stages(&mut self) {
        if let Some(connection) = self.slot.as_mut() {
            for (id, name) in self.stages.drain(..) {
                if connection.remove_stage(id) {
                    tracing::trace!(key = %self.key, stage = name, id = %id, "stage detached");
                } else {
                    tracing::debug!(
                        key = %self.key,
                        stage = name,
                        id = %id,
                        "stage already detached"
                    );
                }
            }
        }
    }

    pub fn installed_stages(&self) -> usize {
        self.stages.len()
    }

    /// Return the connection to the pool.
    pub fn release(mut self) {
        self.dispose(Disposition::Release);
    }

    /// Destroy the connection. Pool errors are logged and swallowed.
    pub fn invalidate(mut self) {
        self.dispose(Disposition::Invalidate);
    }

    fn dispose(&mut self, disposition: Disposition) {
        self.detach_stages();
        let Some(connection) = self.slot.take() else {
            return;
        };
        match disposition {
            Disposition::Release => {
                tracing::debug!(key = %self.key, "connection released");
                self.manager.release(&self.key, connection);
            }
            Disposition::Invalidate => {
                tracing::debug!(key = %self.key, "connection invalidated");
                if let Err(error) = self.manager.invalidate(&self.key, connection) {
                    tracing::warn!(key = %self.key, %error, "failed to invalidate connection");
                }
            }
        }
    }
}

impl<M: ConnectionManager> Drop for Lease<M> {
    fn drop(&mut self) {
        self.dispose(Disposition::Invalidate);
    }
}

impl<M: ConnectionManager> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("fresh", &self.fresh)
            .field("held", &self.slot.is_some())
            .field("stages", &self.stages.len())
            .finish()
    }
}
