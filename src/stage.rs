//! Removable pipeline stages that instrument a connection with timeouts.
//!
//! A connection keeps a [`StagePipeline`] and reports its activity through it. The executor
//! installs an [`IdleStage`] and a [`HeaderStage`] for the duration of one exchange and removes
//! them before the connection is disposed of, so a pooled connection never carries a live timer.
//!
//! - The idle stage restarts its window on every read or write.
//! - The header stage starts its window when the exchange gate opens and disarms on
//!   `HeadersReceived` (or when the exchange produces a response, whichever is first).

use crate::error::{TimeoutError, TimeoutKind};
use crate::gate::GateWaiter;
use crate::timer::{effective_window, Timer};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Unique identity of an installed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl StageId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// Activity a connection reports to its installed stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Bytes read from the transport.
    Read(usize),
    /// Bytes written to the transport.
    Write(usize),
    /// The response head has been parsed.
    HeadersReceived,
}

/// An interceptor spliced into a connection's processing pipeline.
pub trait Stage: Send + Sync + fmt::Debug {
    fn id(&self) -> StageId;

    fn name(&self) -> &'static str;

    fn on_event(&self, event: PipelineEvent);
}

/// Ordered set of installed stages. Connections embed one and call
/// [`emit`](StagePipeline::emit) from their read/write paths.
#[derive(Debug, Default, Clone)]
pub struct StagePipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl StagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Remove the stage with `id`, returning whether it was installed.
    pub fn remove(&mut self, id: StageId) -> bool {
        let before = self.stages.len();
        self.stages.retain(|stage| stage.id() != id);
        self.stages.len() != before
    }

    pub fn emit(&self, event: PipelineEvent) {
        for stage in &self.stages {
            stage.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.iter().any(|stage| stage.id() == id)
    }
}

/// Fires [`TimeoutKind::Idle`] after a full window with no read/write activity.
pub struct IdleStage {
    id: StageId,
    window: Option<Duration>,
    timer: Arc<dyn Timer>,
    last_activity: Mutex<Instant>,
}

impl IdleStage {
    pub fn new(timer: Arc<dyn Timer>, window: Option<Duration>) -> Arc<Self> {
        let now = timer.now();
        Arc::new(Self {
            id: StageId::next(),
            window: effective_window(window),
            timer,
            last_activity: Mutex::new(now),
        })
    }

    /// `None` when the stage can never fire.
    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Resolve once the connection has been idle for a whole window.
    ///
    /// Each wake-up re-reads the last activity instant and sleeps only for the remainder, so
    /// a reset costs nothing beyond the timestamp store.
    pub async fn expired(self: Arc<Self>) -> TimeoutError {
        let Some(window) = self.window else {
            return futures::future::pending().await;
        };
        loop {
            let last_activity = *self.last_activity.lock().unwrap();
            // A window too large to land on the clock is as good as unset.
            let Some(idle_deadline) = last_activity.checked_add(window) else {
                return futures::future::pending().await;
            };
            let now = self.timer.now();
            if now >= idle_deadline {
                return TimeoutError::idle(window);
            }
            self.timer.sleep(idle_deadline - now).await;
        }
    }
}

impl fmt::Debug for IdleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleStage").field("id", &self.id).field("window", &self.window).finish()
    }
}

impl Stage for IdleStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &'static str {
        "idle-timeout"
    }

    fn on_event(&self, event: PipelineEvent) {
        if matches!(event, PipelineEvent::Read(_) | PipelineEvent::Write(_)) {
            *self.last_activity.lock().unwrap() = self.timer.now();
        }
    }
}

/// Fires [`TimeoutKind::Header`] unless response headers show up within the window measured
/// from the exchange gate.
pub struct HeaderStage {
    id: StageId,
    window: Option<Duration>,
    timer: Arc<dyn Timer>,
    headers_seen: AtomicBool,
    disarmed: Notify,
}

impl HeaderStage {
    pub fn new(timer: Arc<dyn Timer>, window: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            window: effective_window(window),
            timer,
            headers_seen: AtomicBool::new(false),
            disarmed: Notify::new(),
        })
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    pub fn headers_seen(&self) -> bool {
        self.headers_seen.load(Ordering::Acquire)
    }

    /// Wait for `gate`, then resolve if the window passes without headers.
    pub async fn expired(self: Arc<Self>, gate: GateWaiter) -> TimeoutError {
        gate.opened().await;
        let mut deadline = self.timer.schedule(TimeoutKind::Header, self.window);
        loop {
            if self.headers_seen() {
                deadline.cancel();
                return futures::future::pending().await;
            }
            tokio::select! {
                err = &mut deadline => return err,
                _ = self.disarmed.notified() => {}
            }
        }
    }
}

impl fmt::Debug for HeaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderStage")
            .field("id", &self.id)
            .field("window", &self.window)
            .field("headers_seen", &self.headers_seen())
            .finish()
    }
}

impl Stage for HeaderStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &'static str {
        "response-header-timeout"
    }

    fn on_event(&self, event: PipelineEvent) {
        if event != PipelineEvent::HeadersReceived {
            return;
        }
        if !self.headers_seen.swap(true, Ordering::AcqRel) {
            // notify_one stores a permit, so a waiter that has not polled yet still wakes.
            self.disarmed.notify_one();
        }
    }
}
