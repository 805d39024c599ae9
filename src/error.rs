//! Error types for request execution
use crate::key::RequestKey;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used for pool-originated failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// No read or write activity on the connection for a full window.
    Idle,
    /// Response headers did not arrive in time.
    Header,
    /// The whole call, retries included, ran out of budget.
    Request,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "idle",
            Self::Header => "response header",
            Self::Request => "request",
        };
        f.write_str(text)
    }
}

/// A deadline elapsed before the guarded work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError {
    kind: TimeoutKind,
    limit: Duration,
}

impl TimeoutError {
    pub fn new(kind: TimeoutKind, limit: Duration) -> Self {
        Self { kind, limit }
    }

    pub fn idle(limit: Duration) -> Self {
        Self::new(TimeoutKind::Idle, limit)
    }

    pub fn header(limit: Duration) -> Self {
        Self::new(TimeoutKind::Header, limit)
    }

    pub fn request(limit: Duration) -> Self {
        Self::new(TimeoutKind::Request, limit)
    }

    pub fn kind(&self) -> TimeoutKind {
        self.kind
    }

    /// The configured window that elapsed.
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Human-readable account of the deadline that was missed.
    pub fn description(&self) -> String {
        match self.kind {
            TimeoutKind::Idle => format!("no connection activity for {:?}", self.limit),
            TimeoutKind::Header => format!("no response headers within {:?}", self.limit),
            TimeoutKind::Request => format!("request not completed within {:?}", self.limit),
        }
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} timeout: {}", self.kind, self.description())
    }
}

impl std::error::Error for TimeoutError {}

/// Failure reported by [`Connection::run_exchange`](crate::Connection::run_exchange).
#[derive(Debug, Error)]
pub enum ExchangeError<E> {
    /// The remote end had already closed the transport.
    #[error("endpoint closed the connection")]
    Closed,
    /// Any other exchange failure, surfaced to the caller verbatim.
    #[error(transparent)]
    Failed(E),
}

impl<E> ExchangeError<E> {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Everything a caller of [`Client::execute`](crate::Client::execute) can see fail.
#[derive(Debug, Error)]
pub enum ClientError<E> {
    /// One of the idle, header, or request deadlines fired.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// A freshly opened connection closed before completing any exchange.
    #[error("connect to {key} failed: connection closed before its first exchange")]
    ConnectFailed { key: RequestKey },
    /// The pool could not lend a connection.
    #[error("failed to borrow a connection for {key}")]
    Borrow {
        key: RequestKey,
        #[source]
        source: BoxError,
    },
    /// No scheme/authority could be derived from the request.
    #[error("request target `{target}` has no authority and no Host header")]
    InvalidTarget { target: String },
    /// The configured bound on stale-connection retries was reached.
    #[error("gave up on {key} after {retries} stale pooled connections")]
    StaleRetriesExhausted { key: RequestKey, retries: usize },
    /// The exchange failed for a reason other than a closed endpoint.
    #[error(transparent)]
    Exchange(E),
}

impl<E> ClientError<E> {
    /// Check if this error is due to any of the three deadlines.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Which deadline fired, if this is a timeout.
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Self::Timeout(t) => Some(t.kind()),
            _ => None,
        }
    }

    /// Check if a fresh connection failed immediately.
    pub fn is_connect_failed(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. })
    }

    /// Check if this wraps a passthrough exchange error.
    pub fn is_exchange(&self) -> bool {
        matches!(self, Self::Exchange(_))
    }

    /// Borrow the exchange error if present.
    pub fn as_exchange(&self) -> Option<&E> {
        match self {
            Self::Exchange(e) => Some(e),
            _ => None,
        }
    }

    /// Get the exchange error if this is an `Exchange` variant.
    pub fn into_exchange(self) -> Option<E> {
        match self {
            Self::Exchange(e) => Some(e),
            _ => None,
        }
    }
}
