//! Typed error kinds for the ingestion and operation engine.
//!
//! Mirrors the propagation policy in spec §7: per-item failures are
//! contained and counted by callers (the normalization engine, operation
//! bodies); only `Fatal` and unrecovered `TransactionFailed` bubble up as
//! operation-level failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing/invalid path or external database at startup of an extractor.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external source database is missing or unreadable.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A raw item was skipped: duplicate path, missing file, unsupported
    /// media type, or no valid media after filtering.
    #[error("item skipped: {0}")]
    ItemSkipped(String),

    /// Processing a single raw item failed; the caller should count it and
    /// continue with the next item.
    #[error("item failed: {0}")]
    ItemFailed(String),

    /// A SQL transaction failed and was rolled back.
    #[error("transaction failed: {0}")]
    TransactionFailed(#[from] rusqlite::Error),

    /// Cooperative cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// Uncaught failure in an operation body.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Short, sanitized message suitable for an `operation_failed` frame.
    pub fn sanitized_message(&self) -> String {
        match self {
            CoreError::Configuration(m) => format!("configuration error: {m}"),
            CoreError::SourceUnavailable(m) => format!("source unavailable: {m}"),
            CoreError::ItemSkipped(m) => format!("skipped: {m}"),
            CoreError::ItemFailed(m) => format!("item failed: {m}"),
            CoreError::TransactionFailed(_) => "database transaction failed".to_string(),
            CoreError::Cancelled => "operation cancelled".to_string(),
            CoreError::Fatal(m) => format!("fatal error: {m}"),
            CoreError::Io(_) => "i/o error".to_string(),
            CoreError::Json(_) => "malformed data".to_string(),
        }
    }
}
