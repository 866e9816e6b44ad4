use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use msf_engine::{ErrorBody, ExecRequest, WirePayload, Worker};
use msf_storage::JsonShardStore;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64_or_default(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

async fn exec_handler(State(worker): State<Arc<Worker>>, Json(request): Json<ExecRequest>) -> Response {
    let executor = Arc::clone(&worker);
    let result =
        tokio::task::spawn_blocking(move || executor.execute(&request).map(|b| WirePayload::from_batch(&b)))
            .await;
    match result {
        Ok(Ok(payload)) => (StatusCode::OK, Json(payload)).into_response(),
        Ok(Err(err)) => (
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorBody::from_error(&err)),
        )
            .into_response(),
        Err(join_err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "internal".to_string(),
                message: format!("task execution panicked: {join_err}"),
            }),
        )
            .into_response(),
    }
}

// Workers are stateless across requests; cancellation is best-effort and
// acknowledged without bookkeeping.
async fn cancel_handler() -> StatusCode {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let worker_id = env_or_default("MSF_WORKER_ID", "worker-1");
    let bind = env_or_default("MSF_WORKER_BIND", "0.0.0.0:8081");
    let addr: SocketAddr = bind.parse()?;
    let advertise = env_or_default("MSF_WORKER_ADVERTISE", &format!("http://127.0.0.1:{}", addr.port()));
    let coordinator = env_or_default("MSF_COORDINATOR_ENDPOINT", "http://127.0.0.1:8080");
    let worker_ttl_ms = env_u64_or_default("MSF_WORKER_TTL_MS", 45_000);

    let worker = Arc::new(Worker::new(worker_id.clone(), Arc::new(JsonShardStore::new())));

    // Heartbeat at a third of the TTL so a single lost beat is harmless.
    let heartbeat_url = format!("{}/workers/heartbeat", coordinator.trim_end_matches('/'));
    let heartbeat_id = worker_id.clone();
    let heartbeat_advertise = advertise.clone();
    tokio::spawn(async move {
        let http = reqwest::Client::new();
        let interval = Duration::from_millis((worker_ttl_ms / 3).max(1));
        loop {
            let sent = http
                .post(&heartbeat_url)
                .json(&json!({
                    "worker_id": heartbeat_id,
                    "address": heartbeat_advertise,
                }))
                .send()
                .await;
            if let Err(e) = sent {
                warn!(error = %e, operator = "WorkerHeartbeat", "heartbeat failed");
            }
            tokio::time::sleep(interval).await;
        }
    });

    let app = Router::new()
        .route("/exec", post(exec_handler))
        .route("/cancel", post(cancel_handler))
        .with_state(worker);

    let listener = TcpListener::bind(addr).await?;
    println!("msf-worker {worker_id} listening on {addr} (coordinator={coordinator}, advertise={advertise})");
    axum::serve(listener, app).await?;
    Ok(())
}
