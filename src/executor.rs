//! Attempt executor: borrow, instrument, exchange, classify, retry.
//!
//! Semantics:
//! - Each attempt borrows one connection through a [`Lease`] and installs a header stage on it,
//!   plus an idle stage when an idle window is configured.
//! - The idle deadline is raced inside the exchange itself; the header deadline is an explicit
//!   race against the exchange, both released from the same gate.
//! - A closed endpoint on a *reused* connection is pool staleness: the connection is
//!   invalidated and the loop borrows again, with no delay.
//! - A closed endpoint on a *fresh* connection means the endpoint is unreachable: the call fails
//!   with [`ClientError::ConnectFailed`] and is not retried.
//! - Every other failure (including idle/header timeouts) invalidates and propagates.
//!
//! Invariants:
//! - Each borrowed connection gets exactly one disposition. Success hands the lease to the
//!   [`PooledResponse`], whose disposal releases it; every other path invalidates before
//!   returning. Dropping the executor future mid-attempt drops the lease, which invalidates.
//! - Stages are detached before any disposition.
//! - `ExchangeError::Closed` never reaches the caller.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionManager, ErrorOf, RequestBodyOf, ResponseBodyOf};
use crate::error::{ClientError, ExchangeError, TimeoutError};
use crate::gate::{Gate, GateWaiter};
use crate::key::RequestKey;
use crate::lease::Lease;
use crate::response::PooledResponse;
use crate::stage::{HeaderStage, IdleStage};
use crate::telemetry::{emit_best_effort, ExchangeEvent, TelemetrySink};
use crate::timer::Timer;
use http::{Request, Response};
use std::future::Future;
use std::sync::Arc;

/// Why a single attempt did not produce a response.
#[derive(Debug)]
enum Failure<E> {
    Closed,
    Timeout(TimeoutError),
    Exchange(E),
}

impl<E> From<ExchangeError<E>> for Failure<E> {
    fn from(err: ExchangeError<E>) -> Self {
        match err {
            ExchangeError::Closed => Failure::Closed,
            ExchangeError::Failed(e) => Failure::Exchange(e),
        }
    }
}

/// Result of one borrow.
enum Outcome<M: ConnectionManager> {
    Response(Response<ResponseBodyOf<M>>, Lease<M>),
    /// The endpoint was closed; the lease has already been invalidated.
    Closed,
    Failed(ClientError<ErrorOf<M>>),
}

pub(crate) struct Executor<M, S> {
    manager: Arc<M>,
    timer: Arc<dyn Timer>,
    sink: S,
}

impl<M, S> Executor<M, S>
where
    M: ConnectionManager,
    S: TelemetrySink,
{
    pub(crate) fn new(manager: Arc<M>, timer: Arc<dyn Timer>, sink: S) -> Self {
        Self { manager, timer, sink }
    }

    pub(crate) fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    pub(crate) fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    pub(crate) fn sink(&self) -> &S {
        &self.sink
    }

    /// Run `request` until it yields a response or a non-retryable failure.
    pub(crate) async fn execute(
        &self,
        request: &Request<RequestBodyOf<M>>,
        key: &RequestKey,
        config: &ClientConfig,
    ) -> Result<PooledResponse<M>, ClientError<ErrorOf<M>>> {
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            let lease = Lease::acquire(self.manager.clone(), key.clone())
                .await
                .map_err(|source| ClientError::Borrow { key: key.clone(), source })?;
            let fresh = lease.is_fresh();
            emit_best_effort(self.sink.clone(), ExchangeEvent::Borrowed { attempt, fresh }).await;

            match self.attempt(lease, request, config).await {
                Outcome::Response(response, lease) => {
                    return Ok(PooledResponse::new(response, lease, attempt));
                }
                Outcome::Closed if fresh => {
                    tracing::info!(
                        key = %key,
                        attempt,
                        "fresh connection closed before first exchange"
                    );
                    emit_best_effort(self.sink.clone(), ExchangeEvent::ConnectFailed).await;
                    return Err(ClientError::ConnectFailed { key: key.clone() });
                }
                Outcome::Closed => {
                    if let Some(max) = config.max_stale_retries() {
                        if attempt > max {
                            tracing::warn!(key = %key, retries = max, "stale retries exhausted");
                            return Err(ClientError::StaleRetriesExhausted {
                                key: key.clone(),
                                retries: max,
                            });
                        }
                    }
                    tracing::debug!(key = %key, attempt, "pooled connection was stale");
                    let event = ExchangeEvent::StaleRetry { attempt };
                    emit_best_effort(self.sink.clone(), event).await;
                }
                Outcome::Failed(err) => return Err(err),
            }
        }
    }

    /// One borrow: instrument the connection, race the exchange, decide disposition.
    async fn attempt(
        &self,
        mut lease: Lease<M>,
        request: &Request<RequestBodyOf<M>>,
        config: &ClientConfig,
    ) -> Outcome<M> {
        let idle = IdleStage::new(self.timer.clone(), config.idle_timeout());
        let header = HeaderStage::new(self.timer.clone(), config.response_header_timeout());
        if idle.window().is_some() {
            lease.install_stage(idle.clone());
        }
        lease.install_stage(header.clone());

        let gate = Gate::new();
        let header_expired = header.expired(gate.waiter());
        let exchange =
            exchange_with_idle(lease.connection_mut(), request, idle.expired(), gate.waiter());
        gate.open();

        let result = tokio::select! {
            biased;
            result = exchange => result,
            err = header_expired => Err(Failure::Timeout(err)),
        };
        lease.detach_stages();

        let failure = match result {
            Ok(response) => return Outcome::Response(response, lease),
            Err(failure) => failure,
        };
        let key = lease.key().clone();
        lease.invalidate();

        match failure {
            Failure::Closed => Outcome::Closed,
            Failure::Timeout(err) => {
                tracing::debug!(
                    key = %key,
                    kind = %err.kind(),
                    limit = ?err.limit(),
                    "exchange timed out"
                );
                emit_best_effort(
                    self.sink.clone(),
                    ExchangeEvent::TimedOut { kind: err.kind(), limit: err.limit() },
                )
                .await;
                Outcome::Failed(ClientError::Timeout(err))
            }
            Failure::Exchange(err) => {
                tracing::debug!(key = %key, error = %err, "exchange failed");
                Outcome::Failed(ClientError::Exchange(err))
            }
        }
    }
}

/// Run the exchange once `gate` opens, failing it if the idle stage expires first.
async fn exchange_with_idle<C, I>(
    connection: &mut C,
    request: &Request<C::RequestBody>,
    idle_expired: I,
    gate: GateWaiter,
) -> Result<Response<C::ResponseBody>, Failure<C::Error>>
where
    C: Connection,
    I: Future<Output = TimeoutError>,
{
    gate.opened().await;
    tokio::select! {
        biased;
        result = connection.run_exchange(request) => result.map_err(Failure::from),
        err = idle_expired => Err(Failure::Timeout(err)),
    }
}
