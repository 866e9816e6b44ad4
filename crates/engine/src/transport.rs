//! Coordinator→worker task transport.
//!
//! Wire contract (`POST /exec`): the request names one relation in its SQL
//! and lists the inputs to bind to it; shard inputs travel by path
//! (resolvable by any worker over the shared filesystem), partials travel
//! inline. The response is the columns/types/rows payload shared with the
//! client surface.

use async_trait::async_trait;
use msf_common::{ColumnDef, ColumnType, MsfError, QueryId, Result, RowBatch, Schema, Value};
use serde::{Deserialize, Serialize};

/// One input bound to the subquery's FROM relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputRef {
    /// A shard file, by path.
    Shard {
        /// Absolute shard file path.
        path: String,
    },
    /// An inline partial result.
    Partial {
        /// The partial's rows and schema.
        batch: RowBatch,
    },
}

/// Task request sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Query the task belongs to, for cancellation and logs.
    pub query_id: QueryId,
    /// Map or reduce subquery text.
    pub sql: String,
    /// Inputs bound to the subquery's FROM relation.
    pub inputs: Vec<InputRef>,
    /// Advisory per-task deadline in milliseconds.
    pub deadline_ms: u64,
}

/// Columns/types/rows payload used by worker responses and the client
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePayload {
    /// Column names in order.
    pub columns: Vec<String>,
    /// Canonical type names in order.
    pub types: Vec<String>,
    /// Row-major values.
    pub rows: Vec<Vec<Value>>,
}

impl WirePayload {
    /// Encode a batch for the wire.
    pub fn from_batch(batch: &RowBatch) -> Self {
        Self {
            columns: batch.schema.names(),
            types: batch.schema.type_names(),
            rows: batch.rows.clone(),
        }
    }

    /// Decode a batch from the wire. Nullability is not transported.
    pub fn into_batch(self) -> Result<RowBatch> {
        if self.columns.len() != self.types.len() {
            return Err(MsfError::SchemaMismatch(format!(
                "payload has {} columns but {} types",
                self.columns.len(),
                self.types.len()
            )));
        }
        let columns = self
            .columns
            .into_iter()
            .zip(self.types)
            .map(|(name, ty)| {
                ColumnType::parse(&ty)
                    .map(|ty| ColumnDef::nullable(name, ty))
                    .ok_or_else(|| MsfError::SchemaMismatch(format!("unknown wire type '{ty}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        RowBatch::new(Schema { columns }, self.rows)
    }
}

/// Error payload shared by worker and coordinator HTTP surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind, see [`MsfError::kind`].
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Encode an error.
    pub fn from_error(err: &MsfError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    /// Decode a worker error back into the taxonomy. Unknown kinds are
    /// conservatively fatal.
    pub fn into_error(self) -> MsfError {
        match self.error.as_str() {
            "transport" | "not_ready" => MsfError::Transport(self.message),
            "parse_error" => MsfError::Parse(self.message),
            "not_found" => MsfError::NotFound(self.message),
            "schema_mismatch" => MsfError::SchemaMismatch(self.message),
            "timeout" => MsfError::Timeout(self.message),
            "cancelled" => MsfError::Cancelled,
            _ => MsfError::Internal(format!("worker error ({}): {}", self.error, self.message)),
        }
    }
}

/// Transport contract the execution engine dispatches tasks through.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Execute one task on the worker at `address`.
    async fn exec(&self, address: &str, request: ExecRequest) -> Result<RowBatch>;

    /// Best-effort cancellation signal for a query's in-flight work.
    async fn cancel(&self, address: &str, query_id: QueryId);
}

/// HTTP transport used by the coordinator binary.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http: reqwest::Client,
}

impl HttpWorkerClient {
    /// Build the client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn exec(&self, address: &str, request: ExecRequest) -> Result<RowBatch> {
        let url = format!("{address}/exec");
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MsfError::Transport(format!("exec request to {url} failed: {e}")))?;
        if response.status().is_success() {
            let payload: WirePayload = response
                .json()
                .await
                .map_err(|e| MsfError::Transport(format!("exec response decode failed: {e}")))?;
            payload.into_batch()
        } else {
            let status = response.status();
            let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
                error: "transport".to_string(),
                message: format!("worker answered HTTP {status}"),
            });
            Err(body.into_error())
        }
    }

    async fn cancel(&self, address: &str, query_id: QueryId) {
        let url = format!("{address}/cancel");
        let _ = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "query_id": query_id }))
            .send()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_payload_round_trips_types() {
        let batch = RowBatch::new(
            Schema::new(vec![
                ColumnDef::required("n", ColumnType::BigInt),
                ColumnDef::nullable("avg", ColumnType::Double),
            ])
            .unwrap(),
            vec![vec![Value::Int(10), Value::Float(5.85)]],
        )
        .unwrap();
        let payload = WirePayload::from_batch(&batch);
        assert_eq!(payload.columns, vec!["n", "avg"]);
        assert_eq!(payload.types, vec!["bigint", "double"]);
        let back = payload.into_batch().unwrap();
        back.check_schema(&batch.schema).unwrap();
        assert_eq!(back.rows, batch.rows);
    }

    #[test]
    fn unknown_error_kinds_are_fatal() {
        let err = ErrorBody {
            error: "exploded".to_string(),
            message: "boom".to_string(),
        }
        .into_error();
        assert!(!err.is_retryable());
        let retry = ErrorBody {
            error: "not_ready".to_string(),
            message: "warming up".to_string(),
        }
        .into_error();
        assert!(retry.is_retryable());
    }
}
