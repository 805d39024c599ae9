//! Scripted in-memory pool used by the integration tests.
//!
//! Every connection gets a sequential id at borrow time. The pool records each release and
//! invalidate together with how many stages were still attached, so tests can assert the
//! exactly-once disposition and the "no timer leaks into the pool" rules directly.

use async_trait::async_trait;
use http::{Request, Response, StatusCode};
use leash::{
    Borrowed, BoxError, Connection, ConnectionManager, Disposition, ExchangeError, PipelineEvent,
    RequestKey, Stage, StageId, StagePipeline,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a connection does when asked to run an exchange.
#[derive(Debug, Clone)]
pub enum Script {
    /// Write the request, stay silent for `headers_after`, then deliver headers.
    Respond { headers_after: Duration },
    /// Read `chunks` times, `every` apart, then deliver headers.
    Trickle { chunks: usize, every: Duration },
    /// Deliver headers at once, then stay silent for `stall` before returning.
    HeadersThenStall { stall: Duration },
    /// The peer already closed the transport.
    Close,
    /// Fail with an I/O error carrying this message.
    Fail(&'static str),
    /// Never complete.
    Hang,
}

impl Script {
    pub fn ok() -> Self {
        Script::Respond { headers_after: Duration::ZERO }
    }
}

#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    script: Script,
    pipeline: StagePipeline,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    fn emit(&self, event: PipelineEvent) {
        self.pipeline.emit(event);
    }

    fn respond(&self) -> Response<String> {
        let mut response = Response::new(format!("conn-{}", self.id));
        *response.status_mut() = StatusCode::OK;
        response
    }
}

#[async_trait]
impl Connection for MockConnection {
    type RequestBody = ();
    type ResponseBody = String;
    type Error = io::Error;

    fn install_stage(&mut self, stage: Arc<dyn Stage>) {
        self.pipeline.install(stage);
    }

    fn remove_stage(&mut self, id: StageId) -> bool {
        self.pipeline.remove(id)
    }

    async fn run_exchange(
        &mut self,
        _request: &Request<()>,
    ) -> Result<Response<String>, ExchangeError<io::Error>> {
        match self.script.clone() {
            Script::Respond { headers_after } => {
                self.emit(PipelineEvent::Write(64));
                if !headers_after.is_zero() {
                    tokio::time::sleep(headers_after).await;
                }
                self.emit(PipelineEvent::Read(128));
                self.emit(PipelineEvent::HeadersReceived);
                Ok(self.respond())
            }
            Script::Trickle { chunks, every } => {
                self.emit(PipelineEvent::Write(64));
                for _ in 0..chunks {
                    tokio::time::sleep(every).await;
                    self.emit(PipelineEvent::Read(16));
                }
                self.emit(PipelineEvent::HeadersReceived);
                Ok(self.respond())
            }
            Script::HeadersThenStall { stall } => {
                self.emit(PipelineEvent::Write(64));
                self.emit(PipelineEvent::Read(128));
                self.emit(PipelineEvent::HeadersReceived);
                tokio::time::sleep(stall).await;
                Ok(self.respond())
            }
            Script::Close => Err(ExchangeError::Closed),
            Script::Fail(message) => {
                self.emit(PipelineEvent::Write(64));
                Err(ExchangeError::Failed(io::Error::new(io::ErrorKind::ConnectionReset, message)))
            }
            Script::Hang => {
                self.emit(PipelineEvent::Write(64));
                futures::future::pending().await
            }
        }
    }
}

/// One terminal disposition as seen by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: usize,
    pub disposition: Disposition,
    /// Stages still attached when the connection came back.
    pub stages_left: usize,
}

#[derive(Debug)]
pub struct MockPool {
    scripted: Mutex<VecDeque<(bool, Script)>>,
    fallback: Script,
    borrow_delay: Duration,
    next_id: AtomicUsize,
    borrows: Mutex<Vec<(RequestKey, usize)>>,
    records: Mutex<Vec<Record>>,
    fail_borrow: AtomicBool,
    fail_invalidate: AtomicBool,
}

impl Default for MockPool {
    fn default() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: Script::ok(),
            borrow_delay: Duration::ZERO,
            next_id: AtomicUsize::new(0),
            borrows: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
            fail_borrow: AtomicBool::new(false),
            fail_invalidate: AtomicBool::new(false),
        }
    }
}

impl MockPool {
    /// Hands out fresh, immediately responding connections once the script runs out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection created for its borrow.
    pub fn fresh(self, script: Script) -> Self {
        self.scripted.lock().unwrap().push_back((true, script));
        self
    }

    /// Queue a connection that has been pooled before.
    pub fn reused(self, script: Script) -> Self {
        self.scripted.lock().unwrap().push_back((false, script));
        self
    }

    /// Script used once the queue is empty (always fresh).
    pub fn fallback(mut self, script: Script) -> Self {
        self.fallback = script;
        self
    }

    /// Every borrow waits this long before handing out a connection.
    pub fn borrow_delay(mut self, delay: Duration) -> Self {
        self.borrow_delay = delay;
        self
    }

    pub fn set_fail_borrow(&self, fail: bool) {
        self.fail_borrow.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_invalidate(&self, fail: bool) {
        self.fail_invalidate.store(fail, Ordering::SeqCst);
    }

    pub fn borrow_count(&self) -> usize {
        self.borrows.lock().unwrap().len()
    }

    pub fn borrowed_keys(&self) -> Vec<RequestKey> {
        self.borrows.lock().unwrap().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<usize> {
        self.ids_with(Disposition::Release)
    }

    pub fn invalidated(&self) -> Vec<usize> {
        self.ids_with(Disposition::Invalidate)
    }

    fn ids_with(&self, disposition: Disposition) -> Vec<usize> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.disposition == disposition)
            .map(|record| record.id)
            .collect()
    }

    /// Panics unless every borrowed connection came back exactly once with no stages attached.
    pub fn assert_exactly_once(&self) {
        let borrowed: Vec<usize> = self.borrows.lock().unwrap().iter().map(|(_, id)| *id).collect();
        let records = self.records();
        for id in &borrowed {
            let count = records.iter().filter(|record| record.id == *id).count();
            assert_eq!(count, 1, "connection {id} disposed {count} times: {records:?}");
        }
        for record in &records {
            assert!(borrowed.contains(&record.id), "unknown connection {} disposed", record.id);
            assert_eq!(record.stages_left, 0, "connection {} came back instrumented", record.id);
        }
    }

    fn record(&self, connection: &MockConnection, disposition: Disposition) {
        self.records.lock().unwrap().push(Record {
            id: connection.id,
            disposition,
            stages_left: connection.pipeline.len(),
        });
    }
}

#[async_trait]
impl ConnectionManager for MockPool {
    type Connection = MockConnection;

    async fn borrow(&self, key: &RequestKey) -> Result<Borrowed<MockConnection>, BoxError> {
        if self.fail_borrow.load(Ordering::SeqCst) {
            return Err("pool shut down".into());
        }
        if !self.borrow_delay.is_zero() {
            tokio::time::sleep(self.borrow_delay).await;
        }

        let (fresh, script) =
            self.scripted.lock().unwrap().pop_front().unwrap_or((true, self.fallback.clone()));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.borrows.lock().unwrap().push((key.clone(), id));

        let connection = MockConnection { id, script, pipeline: StagePipeline::new() };
        Ok(Borrowed { connection, fresh })
    }

    fn release(&self, _key: &RequestKey, connection: MockConnection) {
        self.record(&connection, Disposition::Release);
    }

    fn invalidate(&self, _key: &RequestKey, connection: MockConnection) -> Result<(), BoxError> {
        self.record(&connection, Disposition::Invalidate);
        if self.fail_invalidate.load(Ordering::SeqCst) {
            return Err("connection already torn down".into());
        }
        Ok(())
    }
}
