//! Distributed coordinator/worker runtime building blocks.
//!
//! Architecture role:
//! - worker registry with heartbeat liveness and load-aware acquisition
//! - map/reduce execution engine with bounded concurrency, retries, and a
//!   pipelined deterministic reduce tree
//! - worker runtime and coordinator→worker transports (in-process and
//!   HTTP)
//! - the database front door wiring parser, catalog, planner, and engine
//!   together
//!
//! Key modules:
//! - [`registry`]
//! - [`engine`]
//! - [`worker`]
//! - [`transport`]
//! - [`database`]

pub mod database;
pub mod engine;
pub mod registry;
pub mod transport;
pub mod worker;

pub use database::{Database, QueryResult};
pub use engine::{cancel_pair, finalize, CancelHandle, CancelToken, ExecutionEngine, ShardInput};
pub use registry::{AcquiredWorker, WorkerEntry, WorkerRegistry};
pub use transport::{ErrorBody, ExecRequest, HttpWorkerClient, InputRef, WirePayload, WorkerClient};
pub use worker::{InProcessWorkerClient, Worker};
