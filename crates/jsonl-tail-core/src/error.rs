//! Error types for decoding and session tracking.

use thiserror::Error;

/// Why a single JSONL line was rejected. Never fatal to a decode.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("byte offset cannot move backward from {current} to {requested}")]
    OffsetRegressed { current: u64, requested: u64 },
}
