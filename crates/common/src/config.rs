use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine/coordinator configuration shared across planner and runtime layers.
///
/// Durations are stored as plain millisecond fields so the struct
/// round-trips through JSON config files and environment overrides without a
/// custom codec; accessors return [`Duration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on concurrently in-flight tasks for one query.
    ///
    /// `0` derives the cap as `healthy_workers * tasks_per_worker` at query
    /// start.
    #[serde(default)]
    pub max_in_flight: usize,
    /// Tasks dispatched per healthy worker when deriving `max_in_flight`.
    #[serde(default = "default_tasks_per_worker")]
    pub tasks_per_worker: usize,
    /// Maximum number of partials combined by one reduce task.
    #[serde(default = "default_reduce_fanin")]
    pub reduce_fanin: usize,
    /// Per-task deadline in milliseconds; an elapsed attempt is retried.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Whole-query deadline in milliseconds; elapsing is fatal.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// How long a task waits for a healthy worker before `NoWorkers`.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Retries per task after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry backoff in milliseconds, doubled per attempt.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Heartbeat staleness after which a worker is marked unhealthy.
    #[serde(default = "default_worker_ttl_ms")]
    pub worker_ttl_ms: u64,
    /// Consecutive task failures before a worker is marked unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long cancellation waits for in-flight tasks before abandoning
    /// them.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Shard size used by `INSERT INTO .. FROM` when the statement and the
    /// manifest give no `ROWS PER SHARD`.
    #[serde(default = "default_rows_per_shard")]
    pub default_rows_per_shard: usize,
}

fn default_tasks_per_worker() -> usize {
    2
}

fn default_reduce_fanin() -> usize {
    8
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_query_timeout_ms() -> u64 {
    300_000
}

fn default_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_base_ms() -> u64 {
    250
}

fn default_worker_ttl_ms() -> u64 {
    45_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

fn default_rows_per_shard() -> usize {
    100_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 0,
            tasks_per_worker: default_tasks_per_worker(),
            reduce_fanin: default_reduce_fanin(),
            task_timeout_ms: default_task_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            worker_ttl_ms: default_worker_ttl_ms(),
            failure_threshold: default_failure_threshold(),
            cancel_grace_ms: default_cancel_grace_ms(),
            default_rows_per_shard: default_rows_per_shard(),
        }
    }
}

impl EngineConfig {
    /// Per-task deadline.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Whole-query deadline.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Worker-acquisition deadline.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Heartbeat staleness bound.
    pub fn worker_ttl(&self) -> Duration {
        Duration::from_millis(self.worker_ttl_ms)
    }

    /// Cancellation grace period.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}
