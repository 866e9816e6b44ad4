use thiserror::Error;

/// Canonical MiniSnowflake error taxonomy used across crates.
///
/// Classification guidance:
/// - [`MsfError::Parse`]: syntax or static-validation failure in the parser
/// - [`MsfError::NotFound`] / [`MsfError::AlreadyExists`]: catalog mismatch,
///   surfaced unless the statement's `IF [NOT] EXISTS` suppresses it
/// - [`MsfError::Transport`]: transient worker/network failure; handled by
///   the engine's retry loop and never returned to clients
/// - [`MsfError::SchemaMismatch`]: a partial result disagreed with the
///   planned schema; indicates a worker/engine bug and is always fatal
/// - [`MsfError::Timeout`]: a query-level deadline elapsed (per-task
///   deadlines are retried as [`MsfError::Transport`])
#[derive(Debug, Error)]
pub enum MsfError {
    /// Syntax error or static validation failure in the SQL frontend.
    #[error("parse error: {0}")]
    Parse(String),

    /// Referenced table or column does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// CREATE TABLE target already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Partial result schema inconsistent with the planned output schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A map/reduce task failed after exhausting its retries.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The registry could not supply a healthy worker within
    /// `acquire_timeout`.
    #[error("no workers available: {0}")]
    NoWorkers(String),

    /// The query deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The query was cancelled by the client or the system.
    #[error("query cancelled")]
    Cancelled,

    /// Transient worker or network failure for a single task attempt.
    ///
    /// Examples:
    /// - connection refused / reset while a worker restarts
    /// - worker answered NotReady
    /// - per-task deadline elapsed
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected invariant violation; logged with enough context to
    /// reproduce.
    #[error("internal error: {0}")]
    Internal(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MsfError {
    /// Stable machine-readable kind string used in wire error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse_error",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::TaskFailed(_) => "task_failed",
            Self::NoWorkers(_) => "no_workers",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
        }
    }

    /// Whether the engine may retry the failed task on another worker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// HTTP status code for the client surface.
    ///
    /// 4xx for client-addressable failures, 5xx for execution failures.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(_) => 400,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::Cancelled => 499,
            Self::TaskFailed(_)
            | Self::NoWorkers(_)
            | Self::Timeout(_)
            | Self::SchemaMismatch(_)
            | Self::Transport(_)
            | Self::Internal(_)
            | Self::Io(_) => 500,
        }
    }
}

/// Standard MiniSnowflake result alias.
pub type Result<T> = std::result::Result<T, MsfError>;
