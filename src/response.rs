//! Response handle that returns its connection to the pool on disposal.

use crate::connection::{ConnectionManager, ResponseBodyOf};
use crate::key::RequestKey;
use crate::lease::Lease;
use http::{HeaderMap, Response, StatusCode};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A successful response still backed by its pooled connection.
///
/// The connection is released when the handle is dropped (or [`release`](Self::release)d),
/// after the caller has finished with the body. A caller that abandons a body mid-stream
/// should [`invalidate`](Self::invalidate) instead so a half-read connection is not reused.
pub struct PooledResponse<M: ConnectionManager> {
    response: Response<ResponseBodyOf<M>>,
    lease: Option<Lease<M>>,
    attempts: usize,
}

impl<M: ConnectionManager> PooledResponse<M> {
    pub(crate) fn new(
        response: Response<ResponseBodyOf<M>>,
        lease: Lease<M>,
        attempts: usize,
    ) -> Self {
        Self { response, lease: Some(lease), attempts }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn body(&self) -> &ResponseBodyOf<M> {
        self.response.body()
    }

    pub fn body_mut(&mut self) -> &mut ResponseBodyOf<M> {
        self.response.body_mut()
    }

    /// Pool partition the connection came from.
    pub fn key(&self) -> Option<&RequestKey> {
        self.lease.as_ref().map(Lease::key)
    }

    /// How many borrows it took to get this response (1 unless stale connections were retried).
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Finish with the response and return the connection to the pool.
    pub fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    /// Finish with the response and destroy the connection.
    pub fn invalidate(mut self) {
        if let Some(lease) = self.lease.take() {
            lease.invalidate();
        }
    }
}

impl<M: ConnectionManager> Deref for PooledResponse<M> {
    type Target = Response<ResponseBodyOf<M>>;

    fn deref(&self) -> &Self::Target {
        &self.response
    }
}

impl<M: ConnectionManager> DerefMut for PooledResponse<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.response
    }
}

impl<M: ConnectionManager> Drop for PooledResponse<M> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledResponse<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResponse")
            .field("status", &self.response.status())
            .field("lease", &self.lease)
            .field("attempts", &self.attempts)
            .finish()
    }
}
