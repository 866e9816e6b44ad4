//! Shared fixtures for distributed engine tests: the 10-row events table
//! sharded {4,3,3}, cluster builders, and fault-injecting transports.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use msf_common::{EngineConfig, QueryId, Result, RowBatch, Value};
use msf_engine::{
    Database, ExecRequest, ExecutionEngine, InProcessWorkerClient, Worker, WorkerClient,
    WorkerRegistry,
};
use msf_storage::{Catalog, JsonShardStore, ShardStore};
use tempfile::TempDir;

pub const EVENTS_DDL: &str = "CREATE TABLE events (event_id INT, user_id INT, \
                              event_type VARCHAR, value DOUBLE, event_time TIMESTAMP)";

pub struct TestCluster {
    pub dir: TempDir,
    pub database: Database,
}

impl TestCluster {
    pub fn db_path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn test_config(fanin: usize) -> EngineConfig {
    EngineConfig {
        reduce_fanin: fanin,
        acquire_timeout_ms: 2_000,
        task_timeout_ms: 5_000,
        query_timeout_ms: 30_000,
        retry_backoff_base_ms: 5,
        ..EngineConfig::default()
    }
}

/// Build a cluster of in-process workers; `wrap` may interpose a
/// fault-injecting transport between engine and workers.
pub fn build_cluster(
    worker_count: usize,
    config: EngineConfig,
    wrap: impl FnOnce(InProcessWorkerClient) -> Arc<dyn WorkerClient>,
) -> TestCluster {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn ShardStore> = Arc::new(JsonShardStore::new());
    let registry = Arc::new(WorkerRegistry::new(&config));
    let mut client = InProcessWorkerClient::new();
    for i in 0..worker_count {
        let worker_id = format!("w{}", i + 1);
        let address = format!("local://{worker_id}");
        client.register(address.clone(), Worker::new(worker_id.as_str(), Arc::clone(&store)));
        registry.register(&worker_id, &address);
    }
    let engine = ExecutionEngine::new(Arc::clone(&registry), wrap(client), config.clone());
    let database = Database::new(Arc::new(Catalog::new()), store, engine, config);
    TestCluster { dir, database }
}

fn ts(second: usize) -> Value {
    Value::Str(format!("2025-01-01T00:00:{second:02}Z"))
}

/// The repository's 10-row events fixture.
pub fn fixture_rows() -> Vec<Vec<Value>> {
    let row = |id: i64, user: Option<i64>, kind: &str, value: f64| {
        vec![
            Value::Int(id),
            user.map(Value::Int).unwrap_or(Value::Null),
            Value::Str(kind.to_string()),
            Value::Float(value),
            ts(id as usize),
        ]
    };
    vec![
        row(1, Some(10), "click", 1.5),
        row(2, Some(10), "click", 2.0),
        row(3, Some(11), "view", 0.0),
        row(4, Some(12), "click", 3.5),
        row(5, None, "view", 1.0),
        row(6, Some(13), "purchase", 20.0),
        row(7, Some(13), "purchase", 30.0),
        row(8, Some(14), "click", 1.0),
        row(9, None, "view", 0.5),
        row(10, Some(15), "click", -1.0),
    ]
}

pub fn write_source(dir: &Path, name: &str, rows: &[Vec<Value>]) -> PathBuf {
    let path = dir.join(name);
    let mut text = String::new();
    for row in rows {
        text.push_str(&serde_json::to_string(row).expect("encode row"));
        text.push('\n');
    }
    std::fs::write(&path, text).expect("write source");
    path
}

/// Create the events table and load the fixture as three shards of sizes
/// {4, 3, 3}.
pub async fn load_events(cluster: &TestCluster) {
    cluster
        .database
        .query(cluster.db_path(), EVENTS_DDL)
        .await
        .expect("create events");
    let rows = fixture_rows();
    for (i, chunk) in [&rows[..4], &rows[4..7], &rows[7..]].iter().enumerate() {
        let source = write_source(cluster.db_path(), &format!("batch-{i}.jsonl"), chunk);
        cluster
            .database
            .query(
                cluster.db_path(),
                &format!("INSERT INTO events FROM '{}'", source.display()),
            )
            .await
            .expect("insert fixture chunk");
    }
}

pub async fn events_cluster(worker_count: usize, fanin: usize) -> TestCluster {
    let cluster = build_cluster(worker_count, test_config(fanin), |client| Arc::new(client));
    load_events(&cluster).await;
    cluster
}

/// Sort rows for order-insensitive comparison.
pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = x.cmp_order(y);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    rows
}

/// Transport that fails the first `n` exec calls with a retryable error.
pub struct FlakyClient {
    inner: InProcessWorkerClient,
    remaining: AtomicUsize,
}

impl FlakyClient {
    pub fn new(inner: InProcessWorkerClient, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl WorkerClient for FlakyClient {
    async fn exec(&self, address: &str, request: ExecRequest) -> Result<RowBatch> {
        let injected = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if injected {
            return Err(msf_common::MsfError::Transport(
                "injected transport fault".to_string(),
            ));
        }
        self.inner.exec(address, request).await
    }

    async fn cancel(&self, address: &str, query_id: QueryId) {
        self.inner.cancel(address, query_id).await;
    }
}

/// Transport that sleeps before forwarding, for deadline and cancellation
/// tests.
pub struct SlowClient {
    inner: InProcessWorkerClient,
    delay: Duration,
}

impl SlowClient {
    pub fn new(inner: InProcessWorkerClient, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl WorkerClient for SlowClient {
    async fn exec(&self, address: &str, request: ExecRequest) -> Result<RowBatch> {
        tokio::time::sleep(self.delay).await;
        self.inner.exec(address, request).await
    }

    async fn cancel(&self, address: &str, query_id: QueryId) {
        self.inner.cancel(address, query_id).await;
    }
}
