//! One-shot start signal shared by a timed race's participants.
//!
//! Both the header deadline and the exchange wait on the same gate, so the deadline window and
//! the real work are measured from one instant and no timer runs before its listener exists.

use tokio::sync::watch;

/// Opening side of the gate. Opening is idempotent.
#[derive(Debug)]
pub struct Gate {
    tx: watch::Sender<bool>,
}

/// Waiting side; cheap to clone, one per participant.
#[derive(Debug, Clone)]
pub struct GateWaiter {
    rx: watch::Receiver<bool>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A waiter that completes once [`open`](Gate::open) has been called.
    pub fn waiter(&self) -> GateWaiter {
        GateWaiter { rx: self.tx.subscribe() }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl GateWaiter {
    /// Wait for the gate to open. If the gate is dropped while closed this never completes.
    pub async fn opened(mut self) {
        let opened = self.rx.wait_for(|open| *open).await.is_ok();
        if !opened {
            futures::future::pending::<()>().await;
        }
    }
}
