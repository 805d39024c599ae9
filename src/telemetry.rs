//! Structured events emitted while executing requests.
//!
//! Events flow through [`TelemetrySink`] implementations, which are plain
//! `tower::Service<ExchangeEvent>`s so they compose with standard tower combinators.
//!
//! - **Borrow**: `Borrowed`
//! - **Retry loop**: `StaleRetry`, `ConnectFailed`
//! - **Deadlines**: `TimedOut`
//! - **Outcome**: `Completed`, `Failed`
//!
//! Emission is best-effort: a sink that is not ready or returns an error loses the event and
//! never affects the call.
//!
//! ```rust
//! use leash::telemetry::{ExchangeEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(ExchangeEvent::Borrowed { attempt: 1, fresh: true }).await.unwrap();
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

use crate::error::TimeoutKind;
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A consumer of [`ExchangeEvent`]s.
pub trait TelemetrySink:
    tower::Service<ExchangeEvent, Response = (), Error = Self::SinkError, Future = Self::SinkFuture>
    + Clone
    + Send
    + Sync
    + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
    /// The future returned by `call`.
    type SinkFuture: std::future::Future<Output = Result<(), Self::SinkError>> + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: ExchangeEvent)
where
    S: TelemetrySink,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Events emitted by the executor and the request-level timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// A connection was borrowed for an attempt (1-indexed).
    Borrowed { attempt: usize, fresh: bool },
    /// A reused connection was found closed; the next attempt borrows again.
    StaleRetry { attempt: usize },
    /// A fresh connection closed before its first exchange.
    ConnectFailed,
    /// One of the deadlines fired.
    TimedOut { kind: TimeoutKind, limit: Duration },
    /// The call produced a response.
    Completed { attempts: usize, duration: Duration },
    /// The call failed.
    Failed { duration: Duration },
}

impl fmt::Display for ExchangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeEvent::Borrowed { attempt, fresh } => {
                write!(f, "Borrowed(#{}, fresh={})", attempt, fresh)
            }
            ExchangeEvent::StaleRetry { attempt } => write!(f, "StaleRetry(#{})", attempt),
            ExchangeEvent::ConnectFailed => write!(f, "ConnectFailed"),
            ExchangeEvent::TimedOut { kind, limit } => {
                write!(f, "TimedOut({}, limit={:?})", kind, limit)
            }
            ExchangeEvent::Completed { attempts, duration } => {
                write!(f, "Completed(attempts={}, duration={:?})", attempts, duration)
            }
            ExchangeEvent::Failed { duration } => write!(f, "Failed(duration={:?})", duration),
        }
    }
}

type SinkFuture = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// A sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<ExchangeEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: ExchangeEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}

/// A sink that logs events at INFO level through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<ExchangeEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ExchangeEvent) -> Self::Future {
        tracing::info!(event = %event, "exchange_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}

/// A bounded in-memory sink, mostly for tests. The oldest events are evicted first.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ExchangeEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a snapshot of all events received so far.
    pub fn events(&self) -> Vec<ExchangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<ExchangeEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ExchangeEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}
