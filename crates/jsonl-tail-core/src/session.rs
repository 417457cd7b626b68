//! Per-client tail progress.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Which file a client is watching and how many of its bytes have been
/// delivered. The offset never moves backward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailSession {
    path: PathBuf,
    byte_offset: u64,
}

impl TailSession {
    pub fn new(path: impl Into<PathBuf>, byte_offset: u64) -> Self {
        Self {
            path: path.into(),
            byte_offset,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// Move the offset forward. Equal offsets are accepted as a no-op.
    pub fn advance(&mut self, new_offset: u64) -> Result<(), SessionError> {
        if new_offset < self.byte_offset {
            return Err(SessionError::OffsetRegressed {
                current: self.byte_offset,
                requested: new_offset,
            });
        }
        self.byte_offset = new_offset;
        Ok(())
    }
}
