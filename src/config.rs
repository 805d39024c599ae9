//! Client configuration and live-updatable config handles.
//!
//! Every timeout is independently optional. `None`, zero, and `Duration::MAX` all mean the
//! deadline never fires; none of them is an immediate timeout.

use crate::timer::effective_window;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// Timeouts and retry bound applied to each call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    idle_timeout: Option<Duration>,
    response_header_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    max_stale_retries: Option<usize>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Inactivity window on the connection during an exchange.
    pub fn idle_timeout(&self) -> Option<Duration> {
        effective_window(self.idle_timeout)
    }

    /// Window for response headers, measured from the exchange gate.
    pub fn response_header_timeout(&self) -> Option<Duration> {
        effective_window(self.response_header_timeout)
    }

    /// Overall budget for the call, shared by all retries.
    pub fn request_timeout(&self) -> Option<Duration> {
        effective_window(self.request_timeout)
    }

    /// Cap on transparent retries after stale pooled connections; `None` is unbounded.
    pub fn max_stale_retries(&self) -> Option<usize> {
        self.max_stale_retries
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    pub fn response_header_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_header_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Set all three timeouts from optional values at once.
    pub fn timeouts(
        mut self,
        idle: Option<Duration>,
        header: Option<Duration>,
        request: Option<Duration>,
    ) -> Self {
        self.config.idle_timeout = idle;
        self.config.response_header_timeout = header;
        self.config.request_timeout = request;
        self
    }

    pub fn max_stale_retries(mut self, retries: usize) -> Self {
        self.config.max_stale_retries = Some(retries);
        self
    }

    pub fn build(self) -> ClientConfig {
        let config = self.config;
        ClientConfig {
            idle_timeout: effective_window(config.idle_timeout),
            response_header_timeout: effective_window(config.response_header_timeout),
            request_timeout: effective_window(config.request_timeout),
            max_stale_retries: config.max_stale_retries,
        }
    }
}

/// Shared, live-updatable configuration.
///
/// Reads are lock-free snapshots; a call takes one snapshot up front, so an update never
/// changes the timeouts of a call already in flight. Clones share the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Update via closure.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.inner.load_full();
        self.inner.store(Arc::new(f(&current)));
    }
}
