use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use msf_common::{EngineConfig, Value};
use msf_engine::{
    Database, ErrorBody, ExecutionEngine, HttpWorkerClient, WorkerClient, WorkerRegistry,
};
use msf_storage::{Catalog, JsonShardStore, ShardStore};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize_or_default(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32_or_default(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64_or_default(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn config_from_env() -> EngineConfig {
    let defaults = EngineConfig::default();
    EngineConfig {
        max_in_flight: env_usize_or_default("MSF_MAX_IN_FLIGHT", defaults.max_in_flight),
        tasks_per_worker: env_usize_or_default("MSF_TASKS_PER_WORKER", defaults.tasks_per_worker),
        reduce_fanin: env_usize_or_default("MSF_REDUCE_FANIN", defaults.reduce_fanin),
        task_timeout_ms: env_u64_or_default("MSF_TASK_TIMEOUT_MS", defaults.task_timeout_ms),
        query_timeout_ms: env_u64_or_default("MSF_QUERY_TIMEOUT_MS", defaults.query_timeout_ms),
        acquire_timeout_ms: env_u64_or_default(
            "MSF_ACQUIRE_TIMEOUT_MS",
            defaults.acquire_timeout_ms,
        ),
        max_retries: env_u32_or_default("MSF_MAX_RETRIES", defaults.max_retries),
        retry_backoff_base_ms: env_u64_or_default(
            "MSF_RETRY_BACKOFF_BASE_MS",
            defaults.retry_backoff_base_ms,
        ),
        worker_ttl_ms: env_u64_or_default("MSF_WORKER_TTL_MS", defaults.worker_ttl_ms),
        failure_threshold: env_u32_or_default(
            "MSF_FAILURE_THRESHOLD",
            defaults.failure_threshold,
        ),
        cancel_grace_ms: env_u64_or_default("MSF_CANCEL_GRACE_MS", defaults.cancel_grace_ms),
        default_rows_per_shard: env_usize_or_default(
            "MSF_DEFAULT_ROWS_PER_SHARD",
            defaults.default_rows_per_shard,
        ),
    }
}

#[derive(Clone)]
struct AppState {
    database: Arc<Database>,
    registry: Arc<WorkerRegistry>,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    path: String,
    query: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    columns: Vec<String>,
    types: Vec<String>,
    rows: Vec<Vec<Value>>,
    row_count: usize,
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    worker_id: String,
    address: String,
}

async fn query_handler(State(state): State<AppState>, Json(body): Json<QueryBody>) -> Response {
    match state
        .database
        .query(Path::new(&body.path), &body.query)
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(QueryResponse {
                columns: result.columns,
                types: result.types,
                rows: result.rows,
                row_count: result.row_count,
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorBody::from_error(&err)),
        )
            .into_response(),
    }
}

async fn heartbeat_handler(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatBody>,
) -> StatusCode {
    state.registry.register(&body.worker_id, &body.address);
    StatusCode::OK
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bind = env_or_default("MSF_COORDINATOR_BIND", "0.0.0.0:8080");
    let addr: SocketAddr = bind.parse()?;
    let config = config_from_env();

    let registry = Arc::new(WorkerRegistry::new(&config));
    let catalog = Arc::new(Catalog::new());
    let store: Arc<dyn ShardStore> = Arc::new(JsonShardStore::new());
    let client: Arc<dyn WorkerClient> = Arc::new(HttpWorkerClient::new());
    let engine = ExecutionEngine::new(Arc::clone(&registry), client, config.clone());
    let database = Arc::new(Database::new(catalog, store, engine, config.clone()));

    let sweep_registry = Arc::clone(&registry);
    let sweep_interval = config.worker_ttl() / 3;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            sweep_registry.sweep_stale();
        }
    });

    let app = Router::new()
        .route("/query", post(query_handler))
        .route("/workers/heartbeat", post(heartbeat_handler))
        .with_state(AppState { database, registry });

    let listener = TcpListener::bind(addr).await?;
    println!(
        "msf-coordinator listening on {addr} (reduce_fanin={}, tasks_per_worker={}, max_retries={}, worker_ttl_ms={})",
        config.reduce_fanin, config.tasks_per_worker, config.max_retries, config.worker_ttl_ms
    );
    axum::serve(listener, app).await?;
    Ok(())
}
