//! Convenient re-exports for implementing a pool and calling the client.
pub use crate::{
    client::{Client, ClientBuilder},
    config::{ClientConfig, DynamicConfig},
    connection::{Borrowed, Connection, ConnectionManager},
    error::{BoxError, ClientError, ExchangeError, TimeoutError, TimeoutKind},
    key::RequestKey,
    response::PooledResponse,
    stage::{PipelineEvent, Stage, StageId, StagePipeline},
    telemetry::{ExchangeEvent, LogSink, MemorySink, NullSink, TelemetrySink},
};
