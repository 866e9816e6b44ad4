//! Map/reduce execution engine.
//!
//! Responsibilities:
//! - fan the map subquery out over shards with bounded concurrency;
//! - retry failed attempts with exponential backoff, preferring a
//!   different worker each attempt;
//! - drive the iterative reduce tree: the tree shape is fixed up front
//!   from the shard count and fan-in, and each reduce task fires as soon
//!   as its inputs are ready, so later rounds overlap earlier ones;
//! - apply the final local projection (AVG recomposition, renames) to the
//!   single remaining partial.
//!
//! Determinism: shards are processed in shard-id order, reduce groups are
//! positional chunks of that order, and reduce inputs are concatenated in
//! child order. Floating-point aggregation therefore folds in one fixed
//! order per (shard count, fan-in) pair, and grouped output is sorted by
//! group key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use msf_common::{
    global_metrics, EngineConfig, MsfError, QueryId, Result, RowBatch, Schema, ShardId, Value,
};
use msf_planner::{OutputExpr, PlannedQuery};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::registry::WorkerRegistry;
use crate::transport::{ExecRequest, InputRef, WorkerClient};

/// Cancels the query associated with the paired [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation flag observed at every suspension point.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that can never fire.
    pub fn none() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self { rx }
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled; pends forever when the
    /// handle is gone without having fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancellation handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// One shard input of a query, with its resolved file path.
#[derive(Debug, Clone)]
pub struct ShardInput {
    /// Shard id, used for deterministic ordering.
    pub shard_id: ShardId,
    /// Absolute shard file path, resolvable by any worker.
    pub path: String,
}

/// Holds one acquired worker for the duration of a task attempt.
///
/// Dropping the lease without an observed outcome (query abort, abandoned
/// cancellation) still returns the worker and settles the in-flight gauge;
/// an unobserved attempt is not counted as a worker failure.
struct TaskLease<'a> {
    registry: &'a WorkerRegistry,
    phase: &'static str,
    worker_id: Option<String>,
}

impl<'a> TaskLease<'a> {
    fn new(registry: &'a WorkerRegistry, phase: &'static str, worker_id: String) -> Self {
        global_metrics().inc_inflight(phase);
        Self {
            registry,
            phase,
            worker_id: Some(worker_id),
        }
    }

    fn finish(mut self, ok: bool) {
        if let Some(worker_id) = self.worker_id.take() {
            global_metrics().dec_inflight(self.phase);
            self.registry.release(&worker_id, ok);
        }
    }
}

impl Drop for TaskLease<'_> {
    fn drop(&mut self) {
        if let Some(worker_id) = self.worker_id.take() {
            global_metrics().dec_inflight(self.phase);
            self.registry.release(&worker_id, true);
        }
    }
}

/// Orchestrates one query's map and reduce tasks over the worker pool.
pub struct ExecutionEngine {
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn WorkerClient>,
    config: EngineConfig,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine").finish()
    }
}

impl ExecutionEngine {
    /// Build an engine over a registry and task transport.
    pub fn new(
        registry: Arc<WorkerRegistry>,
        client: Arc<dyn WorkerClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// Worker registry this engine schedules onto.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Execute a planned query over its shard list.
    pub async fn execute(
        &self,
        query_id: QueryId,
        plan: &PlannedQuery,
        shards: Vec<ShardInput>,
        cancel: CancelToken,
    ) -> Result<RowBatch> {
        match timeout(
            self.config.query_timeout(),
            self.execute_inner(query_id, plan, shards, cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    query_id = %query_id,
                    operator = "EngineDeadline",
                    "query deadline exceeded"
                );
                Err(MsfError::Timeout(format!(
                    "query {query_id} exceeded {}ms",
                    self.config.query_timeout_ms
                )))
            }
        }
    }

    async fn execute_inner(
        &self,
        query_id: QueryId,
        plan: &PlannedQuery,
        mut shards: Vec<ShardInput>,
        cancel: CancelToken,
    ) -> Result<RowBatch> {
        if shards.is_empty() {
            return Err(MsfError::Internal(
                "engine invoked with an empty shard list".to_string(),
            ));
        }
        shards.sort_by_key(|s| s.shard_id);
        let leaves = shards.len();

        // Fixed reduce tree: positional chunks per round. Scalar plans
        // collapse in a single round regardless of configured fan-in.
        let fanin = if plan.reduce_sql.is_some() && plan.group_by.is_empty() {
            leaves.max(2)
        } else {
            self.config.reduce_fanin.max(2)
        };
        let mut reduce_children: Vec<Vec<usize>> = Vec::new();
        if plan.reduce_sql.is_some() && leaves > 1 {
            let mut level: Vec<usize> = (0..leaves).collect();
            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len().div_ceil(fanin));
                for chunk in level.chunks(fanin) {
                    if chunk.len() == 1 {
                        next.push(chunk[0]);
                    } else {
                        reduce_children.push(chunk.to_vec());
                        next.push(leaves + reduce_children.len() - 1);
                    }
                }
                level = next;
            }
        }
        let total_nodes = leaves + reduce_children.len();
        let root = total_nodes - 1;

        let mut parent: Vec<Option<usize>> = vec![None; total_nodes];
        let mut remaining: Vec<usize> = reduce_children.iter().map(Vec::len).collect();
        for (ri, children) in reduce_children.iter().enumerate() {
            for &child in children {
                parent[child] = Some(leaves + ri);
            }
        }

        let max_in_flight = if self.config.max_in_flight > 0 {
            self.config.max_in_flight
        } else {
            (self.registry.healthy_count() * self.config.tasks_per_worker).max(1)
        };
        let semaphore = Arc::new(Semaphore::new(max_in_flight));
        info!(
            query_id = %query_id,
            shards = leaves,
            reduce_tasks = reduce_children.len(),
            fanin,
            max_in_flight,
            operator = "EngineSubmit",
            "query submitted"
        );

        let mut pending = FuturesUnordered::new();
        for (ordinal, shard) in shards.iter().enumerate() {
            pending.push(self.run_task(
                query_id,
                "map",
                ordinal,
                plan.map_sql.clone(),
                vec![InputRef::Shard {
                    path: shard.path.clone(),
                }],
                &plan.partial_schema,
                Arc::clone(&semaphore),
                cancel.clone(),
            ));
        }

        let mut slots: Vec<Option<RowBatch>> = (0..total_nodes).map(|_| None).collect();
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = pending.next() => Some(next),
            };
            let Some(next) = step else {
                return self.drain_cancelled(query_id, pending).await;
            };
            let Some(result) = next else { break };
            let (node_id, batch) = result?;
            slots[node_id] = Some(batch);
            if let Some(parent_id) = parent[node_id] {
                let ri = parent_id - leaves;
                remaining[ri] -= 1;
                if remaining[ri] == 0 {
                    let inputs: Vec<InputRef> = reduce_children[ri]
                        .iter()
                        .map(|&child| InputRef::Partial {
                            batch: slots[child].take().expect("reduce input ready"),
                        })
                        .collect();
                    pending.push(self.run_task(
                        query_id,
                        "reduce",
                        parent_id,
                        plan.reduce_sql.clone().expect("reduce plan has reduce sql"),
                        inputs,
                        &plan.partial_schema,
                        Arc::clone(&semaphore),
                        cancel.clone(),
                    ));
                }
            }
        }

        let final_partial = if plan.reduce_sql.is_none() {
            // Concatenation preserves shard order for test determinism
            // only; callers must not rely on inter-shard row order.
            let batches = slots[..leaves]
                .iter_mut()
                .map(|slot| {
                    slot.take()
                        .ok_or_else(|| MsfError::Internal("missing map partial".to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            RowBatch::concat(batches)?
        } else {
            slots[root]
                .take()
                .ok_or_else(|| MsfError::Internal("missing final partial".to_string()))?
        };
        finalize(plan, final_partial)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_task(
        &self,
        query_id: QueryId,
        phase: &'static str,
        node_id: usize,
        sql: String,
        inputs: Vec<InputRef>,
        expected: &Schema,
        semaphore: Arc<Semaphore>,
        cancel: CancelToken,
    ) -> Result<(usize, RowBatch)> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MsfError::Cancelled),
            permit = semaphore.acquire_owned() => {
                permit.map_err(|_| MsfError::Internal("task semaphore closed".to_string()))?
            }
        };
        let metrics = global_metrics();
        let mut attempt: u32 = 0;
        let mut last_worker: Option<String> = None;
        loop {
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MsfError::Cancelled),
                acquired = self.registry.acquire(
                    1,
                    last_worker.as_deref(),
                    self.config.acquire_timeout(),
                ) => acquired?,
            };
            let worker = acquired
                .into_iter()
                .next()
                .ok_or_else(|| MsfError::Internal("registry returned no worker".to_string()))?;
            let lease = TaskLease::new(&self.registry, phase, worker.worker_id.clone());
            let request = ExecRequest {
                query_id,
                sql: sql.clone(),
                inputs: inputs.clone(),
                deadline_ms: self.config.task_timeout_ms,
            };
            debug!(
                query_id = %query_id,
                phase,
                node_id,
                attempt,
                worker_id = %worker.worker_id,
                operator = "EngineDispatch",
                "task dispatched"
            );
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.client.cancel(&worker.address, query_id).await;
                    lease.finish(true);
                    return Err(MsfError::Cancelled);
                }
                result = timeout(
                    self.config.task_timeout(),
                    self.client.exec(&worker.address, request),
                ) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(MsfError::Transport(format!(
                        "task deadline of {}ms exceeded",
                        self.config.task_timeout_ms
                    ))),
                },
            };
            match outcome {
                Ok(batch) => {
                    lease.finish(true);
                    metrics.inc_task(phase, "succeeded");
                    batch.check_schema(expected)?;
                    return Ok((node_id, batch));
                }
                Err(e) if e.is_retryable() => {
                    lease.finish(false);
                    metrics.inc_task(phase, "failed");
                    if attempt >= self.config.max_retries {
                        warn!(
                            query_id = %query_id,
                            phase,
                            node_id,
                            attempts = attempt + 1,
                            error = %e,
                            operator = "EngineRetry",
                            "task exhausted retries"
                        );
                        return Err(MsfError::TaskFailed(format!(
                            "{phase} task {node_id} failed after {} attempts: {e}",
                            attempt + 1
                        )));
                    }
                    metrics.inc_retry(phase);
                    let backoff = Duration::from_millis(
                        self.config
                            .retry_backoff_base_ms
                            .saturating_mul(1_u64 << attempt.min(10)),
                    );
                    warn!(
                        query_id = %query_id,
                        phase,
                        node_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        operator = "EngineRetry",
                        "task attempt failed; retrying on another worker"
                    );
                    last_worker = Some(worker.worker_id);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(MsfError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    lease.finish(false);
                    metrics.inc_task(phase, "failed");
                    return Err(e);
                }
            }
        }
    }

    async fn drain_cancelled<F>(
        &self,
        query_id: QueryId,
        mut pending: FuturesUnordered<F>,
    ) -> Result<RowBatch>
    where
        F: Future<Output = Result<(usize, RowBatch)>>,
    {
        info!(
            query_id = %query_id,
            outstanding = pending.len(),
            operator = "EngineCancel",
            "cancellation observed; draining in-flight tasks"
        );
        let _ = timeout(self.config.cancel_grace(), async {
            while pending.next().await.is_some() {}
        })
        .await;
        Err(MsfError::Cancelled)
    }
}

/// Apply the plan's final local projection to the last remaining partial.
pub fn finalize(plan: &PlannedQuery, partial: RowBatch) -> Result<RowBatch> {
    partial.check_schema(&plan.partial_schema)?;
    if plan.finalizers.is_empty() {
        partial.check_schema(&plan.output_schema)?;
        return Ok(partial);
    }

    enum Projected {
        Carry(usize),
        AvgRatio(usize, usize),
    }
    let mut projected = Vec::with_capacity(plan.finalizers.len());
    for finalizer in &plan.finalizers {
        projected.push(match &finalizer.expr {
            OutputExpr::Carry { internal } => {
                Projected::Carry(partial.schema.index_of(internal)?)
            }
            OutputExpr::AvgRatio { sum, cnt } => Projected::AvgRatio(
                partial.schema.index_of(sum)?,
                partial.schema.index_of(cnt)?,
            ),
        });
    }

    let rows = partial
        .rows
        .iter()
        .map(|row| {
            projected
                .iter()
                .map(|p| match p {
                    Projected::Carry(idx) => row[*idx].clone(),
                    Projected::AvgRatio(sum_idx, cnt_idx) => {
                        match (row[*sum_idx].as_f64(), row[*cnt_idx].as_f64()) {
                            (Some(sum), Some(cnt)) if cnt > 0.0 => Value::Float(sum / cnt),
                            _ => Value::Null,
                        }
                    }
                })
                .collect()
        })
        .collect();
    RowBatch::new(plan.output_schema.clone(), rows)
}
