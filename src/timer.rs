//! Cancellable deadlines over a shared timer service
//!
//! All deadlines in this crate (idle, response header, request) are scheduled through a
//! [`Timer`]. The production [`TokioTimer`] delegates to tokio's hierarchical timer wheel, so
//! scheduling and cancelling are O(1) and every request shares one timer driver.
//!
//! A [`Deadline`] is a future resolving to the [`TimeoutError`] it represents. An unset window
//! produces a deadline that is pending forever, which lets racing code treat "no timeout" and
//! "timeout not yet reached" identically.

use crate::error::{TimeoutError, TimeoutKind};
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

/// Boxed sleep returned by a [`Timer`].
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Collapse every "never fires" spelling (unset, zero, `Duration::MAX`) to `None`.
pub fn effective_window(window: Option<Duration>) -> Option<Duration> {
    window.filter(|d| !d.is_zero() && *d != Duration::MAX)
}

/// Abstraction over the timer service.
pub trait Timer: Send + Sync + fmt::Debug {
    /// Current instant on this timer's clock.
    fn now(&self) -> Instant;

    /// Future completing once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Sleep;

    /// Schedule a deadline of `kind`. Windows that never fire yield [`Deadline::never`].
    fn schedule(&self, kind: TimeoutKind, window: Option<Duration>) -> Deadline {
        match effective_window(window) {
            Some(limit) => Deadline::armed(kind, limit, self.sleep(limit)),
            None => Deadline::never(kind),
        }
    }
}

/// Production timer backed by the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Timer that records every sleep it schedules, then sleeps on tokio time.
#[derive(Debug, Clone, Default)]
pub struct TrackingTimer {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Timer for TrackingTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        self.calls.lock().unwrap().push(duration);
        Box::pin(tokio::time::sleep(duration))
    }
}

impl<T: Timer + ?Sized> Timer for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        (**self).sleep(duration)
    }
}

/// A scheduled, cancellable timeout.
///
/// Resolves to the [`TimeoutError`] it carries once the window elapses. After
/// [`cancel`](Deadline::cancel) (or for an unset window) it never resolves.
pub struct Deadline {
    kind: TimeoutKind,
    limit: Option<Duration>,
    sleep: Option<Sleep>,
}

impl Deadline {
    fn armed(kind: TimeoutKind, limit: Duration, sleep: Sleep) -> Self {
        Self { kind, limit: Some(limit), sleep: Some(sleep) }
    }

    /// A deadline that is pending forever.
    pub fn never(kind: TimeoutKind) -> Self {
        Self { kind, limit: None, sleep: None }
    }

    pub fn kind(&self) -> TimeoutKind {
        self.kind
    }

    /// The window this deadline was scheduled with, `None` if it can never fire.
    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Drop the underlying timer entry. The deadline stays pending forever afterwards.
    pub fn cancel(&mut self) {
        self.sleep = None;
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("kind", &self.kind)
            .field("limit", &self.limit)
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl Future for Deadline {
    type Output = TimeoutError;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let (Some(sleep), Some(limit)) = (this.sleep.as_mut(), this.limit) else {
            return Poll::Pending;
        };
        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.sleep = None;
                Poll::Ready(TimeoutError::new(this.kind, limit))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Races `future` against a [`Deadline`]. The future is polled first, so a result that is
/// ready on the same tick as the deadline wins.
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct WithDeadline<F> {
    #[pin]
    future: F,
    deadline: Deadline,
}

impl<F> WithDeadline<F> {
    pub fn new(future: F, deadline: Deadline) -> Self {
        Self { future, deadline }
    }
}

impl<F: Future> Future for WithDeadline<F> {
    type Output = Result<F::Output, TimeoutError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(output) = this.future.poll(cx) {
            this.deadline.cancel();
            return Poll::Ready(Ok(output));
        }
        Pin::new(this.deadline).poll(cx).map(Err)
    }
}
