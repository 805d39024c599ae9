//! Contract between the executor and the external connection pool.
//!
//! The pool owns creation, limits, and queueing; this crate only borrows, releases, and
//! invalidates. A borrowed connection is held by exactly one attempt at a time.

use crate::error::{BoxError, ExchangeError};
use crate::key::RequestKey;
use crate::stage::{Stage, StageId};
use async_trait::async_trait;
use http::{Request, Response};
use std::sync::Arc;

/// A transport channel capable of running one request/response exchange at a time.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Request body type this connection writes.
    type RequestBody: Send + Sync + 'static;
    /// Response body type handed back to the caller.
    type ResponseBody: Send + 'static;
    /// Exchange failures other than a closed endpoint.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Splice `stage` into the pipeline. It must see every subsequent read, write, and header
    /// event until removed.
    fn install_stage(&mut self, stage: Arc<dyn Stage>);

    /// Detach a stage previously installed. Returns whether it was present.
    fn remove_stage(&mut self, id: StageId) -> bool;

    /// Send `request` and wait for the response head.
    ///
    /// Must return [`ExchangeError::Closed`] when the transport turns out to be dead before a
    /// response could be read.
    async fn run_exchange(
        &mut self,
        request: &Request<Self::RequestBody>,
    ) -> Result<Response<Self::ResponseBody>, ExchangeError<Self::Error>>;
}

/// A connection on loan from the pool.
#[derive(Debug)]
pub struct Borrowed<C> {
    pub connection: C,
    /// Created for this borrow and never completed an exchange.
    pub fresh: bool,
}

impl<C> Borrowed<C> {
    pub fn fresh(connection: C) -> Self {
        Self { connection, fresh: true }
    }

    pub fn reused(connection: C) -> Self {
        Self { connection, fresh: false }
    }
}

/// The pool side of a borrow.
///
/// The executor calls exactly one of [`release`](ConnectionManager::release) or
/// [`invalidate`](ConnectionManager::invalidate) per successful borrow, never both and never
/// twice. Both are synchronous so they can run from `Drop` when a call is cancelled.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Connection;

    /// Lend a connection for `key`, waiting if the partition is exhausted.
    async fn borrow(&self, key: &RequestKey) -> Result<Borrowed<Self::Connection>, BoxError>;

    /// Return a healthy connection for reuse.
    fn release(&self, key: &RequestKey, connection: Self::Connection);

    /// Destroy a connection. Errors are logged by the caller and otherwise ignored.
    fn invalidate(&self, key: &RequestKey, connection: Self::Connection) -> Result<(), BoxError>;
}

/// Request body type for connections handed out by `M`.
pub type RequestBodyOf<M> =
    <<M as ConnectionManager>::Connection as Connection>::RequestBody;

/// Response body type for connections handed out by `M`.
pub type ResponseBodyOf<M> =
    <<M as ConnectionManager>::Connection as Connection>::ResponseBody;

/// Exchange error type for connections handed out by `M`.
pub type ErrorOf<M> = <<M as ConnectionManager>::Connection as Connection>::Error;
