//! The public entry point: request-level deadline around the attempt executor.
//!
//! The request timeout is raced once, outside the retry loop, so every transparent retry draws
//! on the same budget. When it fires, the in-flight attempt future is dropped, which drops its
//! lease and invalidates the connection before `execute` returns.

use crate::config::{ClientConfig, DynamicConfig};
use crate::connection::{ConnectionManager, ErrorOf, RequestBodyOf};
use crate::error::{ClientError, TimeoutKind};
use crate::executor::Executor;
use crate::key::RequestKey;
use crate::response::PooledResponse;
use crate::telemetry::{emit_best_effort, ExchangeEvent, NullSink, TelemetrySink};
use crate::timer::{Timer, TokioTimer, WithDeadline};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;

/// Executes requests over connections borrowed from a [`ConnectionManager`].
///
/// Clones share the manager, timer, telemetry sink, and configuration.
///
/// ```rust,ignore
/// let client = Client::builder(Arc::new(pool))
///     .config(
///         ClientConfig::builder()
///             .response_header_timeout(Duration::from_secs(10))
///             .request_timeout(Duration::from_secs(30))
///             .build(),
///     )
///     .build();
///
/// let response = client.execute(&request).await?;
/// // ... read the body; dropping `response` returns the connection to the pool.
/// ```
pub struct Client<M, S = NullSink> {
    inner: Arc<Inner<M, S>>,
}

struct Inner<M, S> {
    executor: Executor<M, S>,
    config: DynamicConfig<ClientConfig>,
}

impl<M, S> Clone for Client<M, S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M, S> fmt::Debug for Client<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("config", &self.inner.config.get()).finish()
    }
}

impl<M: ConnectionManager> Client<M> {
    /// Client with no timeouts, the tokio timer, and no telemetry.
    pub fn new(manager: M) -> Self {
        Self::builder(Arc::new(manager)).build()
    }

    pub fn builder(manager: Arc<M>) -> ClientBuilder<M, NullSink> {
        ClientBuilder {
            manager,
            config: DynamicConfig::new(ClientConfig::default()),
            timer: Arc::new(TokioTimer),
            sink: NullSink,
        }
    }
}

impl<M, S> Client<M, S>
where
    M: ConnectionManager,
    S: TelemetrySink,
{
    /// Execute `request`, returning a response whose disposal releases its connection.
    pub async fn execute(
        &self,
        request: &http::Request<RequestBodyOf<M>>,
    ) -> Result<PooledResponse<M>, ClientError<ErrorOf<M>>> {
        let config = self.inner.config.get();
        let key = RequestKey::from_request(request)
            .ok_or_else(|| ClientError::InvalidTarget { target: request.uri().to_string() })?;

        let executor = &self.inner.executor;
        let started = executor.timer().now();
        let deadline = executor.timer().schedule(TimeoutKind::Request, config.request_timeout());

        let result =
            match WithDeadline::new(executor.execute(request, &key, &config), deadline).await {
                Ok(result) => result,
                Err(timeout) => {
                    tracing::debug!(key = %key, limit = ?timeout.limit(), "request timed out");
                    emit_best_effort(
                        executor.sink().clone(),
                        ExchangeEvent::TimedOut { kind: timeout.kind(), limit: timeout.limit() },
                    )
                    .await;
                    Err(ClientError::Timeout(timeout))
                }
            };

        let duration = executor.timer().now().saturating_duration_since(started);
        let event = match &result {
            Ok(response) => ExchangeEvent::Completed { attempts: response.attempts(), duration },
            Err(_) => ExchangeEvent::Failed { duration },
        };
        emit_best_effort(executor.sink().clone(), event).await;
        result
    }

    /// Live configuration handle; updates apply to calls started afterwards.
    pub fn config(&self) -> &DynamicConfig<ClientConfig> {
        &self.inner.config
    }

    pub fn manager(&self) -> &Arc<M> {
        self.inner.executor.manager()
    }
}

impl<M, S> Service<http::Request<RequestBodyOf<M>>> for Client<M, S>
where
    M: ConnectionManager,
    S: TelemetrySink,
{
    type Response = PooledResponse<M>;
    type Error = ClientError<ErrorOf<M>>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Back-pressure lives in the pool's borrow.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<RequestBodyOf<M>>) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { client.execute(&request).await })
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder<M, S> {
    manager: Arc<M>,
    config: DynamicConfig<ClientConfig>,
    timer: Arc<dyn Timer>,
    sink: S,
}

impl<M, S> ClientBuilder<M, S>
where
    M: ConnectionManager,
    S: TelemetrySink,
{
    /// Fixed configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = DynamicConfig::new(config);
        self
    }

    /// Share a live-updatable configuration with other clients.
    pub fn shared_config(mut self, config: DynamicConfig<ClientConfig>) -> Self {
        self.config = config;
        self
    }

    /// Provide a custom timer service.
    pub fn timer<T>(mut self, timer: T) -> Self
    where
        T: Timer + 'static,
    {
        self.timer = Arc::new(timer);
        self
    }

    /// Route exchange events to `sink`.
    pub fn telemetry<S2: TelemetrySink>(self, sink: S2) -> ClientBuilder<M, S2> {
        ClientBuilder { manager: self.manager, config: self.config, timer: self.timer, sink }
    }

    pub fn build(self) -> Client<M, S> {
        Client {
            inner: Arc::new(Inner {
                executor: Executor::new(self.manager, self.timer, self.sink),
                config: self.config,
            }),
        }
    }
}

impl<M, S: fmt::Debug> fmt::Debug for ClientBuilder<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config.get())
            .field("timer", &self.timer)
            .field("sink", &self.sink)
            .finish()
    }
}
