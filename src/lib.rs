#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # leash
//!
//! Request execution for pooled async HTTP clients: borrow a connection, run one exchange on
//! it under three independent deadlines, retry transparently when a pooled connection turns out
//! to be stale, and hand every borrowed connection back to the pool (or destroy it) exactly once.
//!
//! ## Features
//!
//! - **Connection leases** that decide disposition on every exit path, cancellation included
//! - **Idle timeout** reset by connection activity
//! - **Response header timeout** measured from a shared start gate
//! - **Request timeout** spanning all retries
//! - **Stale-connection retry** that never loops against an unreachable endpoint
//! - **Telemetry** through `tower::Service` sinks
//!
//! The pool itself is external: implement [`ConnectionManager`] and [`Connection`] for your
//! transport and hand the manager to a [`Client`].
//!
//! ```rust,ignore
//! use leash::{Client, ClientConfig};
//! use std::time::Duration;
//!
//! let client = Client::builder(pool)
//!     .config(ClientConfig::builder().request_timeout(Duration::from_secs(30)).build())
//!     .build();
//!
//! let response = client.execute(&request).await?;
//! assert!(response.status().is_success());
//! drop(response); // connection goes back to the pool
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
mod executor;
pub mod gate;
pub mod key;
pub mod lease;
pub mod prelude;
pub mod response;
pub mod stage;
pub mod telemetry;
pub mod timer;

// Re-exports
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder, DynamicConfig};
pub use connection::{Borrowed, Connection, ConnectionManager};
pub use error::{BoxError, ClientError, ExchangeError, TimeoutError, TimeoutKind};
pub use gate::{Gate, GateWaiter};
pub use key::RequestKey;
pub use lease::{Disposition, Lease};
pub use response::PooledResponse;
pub use stage::{HeaderStage, IdleStage, PipelineEvent, Stage, StageId, StagePipeline};
pub use timer::{Deadline, Timer, TokioTimer, TrackingTimer, WithDeadline};
