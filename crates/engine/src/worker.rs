//! Worker runtime.
//!
//! A worker is stateless across requests: it resolves the request inputs
//! (shard files via the shard store, partials inline), binds their union to
//! the subquery's FROM relation, and runs the embedded executor. Any
//! columnar SQL engine can stand in by replacing [`Worker::execute`]'s call
//! into `msf_exec`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use msf_common::{MsfError, QueryId, Result, RowBatch};
use msf_storage::ShardStore;
use tracing::debug;

use crate::transport::{ExecRequest, InputRef, WorkerClient};

/// Single-shard subquery executor.
#[derive(Clone)]
pub struct Worker {
    worker_id: String,
    store: Arc<dyn ShardStore>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl Worker {
    /// Build a worker over a shard store.
    pub fn new(worker_id: impl Into<String>, store: Arc<dyn ShardStore>) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
        }
    }

    /// Stable worker id.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Execute one task request.
    pub fn execute(&self, request: &ExecRequest) -> Result<RowBatch> {
        if request.inputs.is_empty() {
            return Err(MsfError::Internal("task request without inputs".to_string()));
        }
        let mut batches = Vec::with_capacity(request.inputs.len());
        for input in &request.inputs {
            batches.push(match input {
                InputRef::Shard { path } => self.store.read_shard(Path::new(path))?,
                InputRef::Partial { batch } => batch.clone(),
            });
        }
        let input = RowBatch::concat(batches)?;
        debug!(
            worker_id = %self.worker_id,
            query_id = %request.query_id,
            input_rows = input.num_rows(),
            operator = "WorkerExec",
            "executing subquery"
        );
        msf_exec::run_subquery(&request.sql, &input)
    }
}

/// In-process transport: dispatches directly to local [`Worker`] instances
/// keyed by address. Used by tests and embedded deployments.
#[derive(Default, Clone)]
pub struct InProcessWorkerClient {
    workers: HashMap<String, Worker>,
}

impl InProcessWorkerClient {
    /// Build an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `worker` to `address`.
    pub fn register(&mut self, address: impl Into<String>, worker: Worker) {
        self.workers.insert(address.into(), worker);
    }
}

#[async_trait]
impl WorkerClient for InProcessWorkerClient {
    async fn exec(&self, address: &str, request: ExecRequest) -> Result<RowBatch> {
        let worker = self.workers.get(address).ok_or_else(|| {
            MsfError::Transport(format!("no in-process worker at '{address}'"))
        })?;
        worker.execute(&request)
    }

    async fn cancel(&self, _address: &str, _query_id: QueryId) {}
}
