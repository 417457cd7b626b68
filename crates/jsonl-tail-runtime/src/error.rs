//! Error types for file access and live connections.

use std::io;
use std::path::PathBuf;

use jsonl_tail_core::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    #[error("read failed on {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    /// Underlying IO error kind, if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Open { source, .. } | Self::Read { source, .. } => Some(source.kind()),
            Self::NotAFile { .. } => None,
        }
    }
}

/// Failure inside one live connection. Never escapes that connection's task.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("watch registry is shut down")]
    RegistryClosed,

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
