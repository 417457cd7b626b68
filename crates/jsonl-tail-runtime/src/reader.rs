//! Async file access feeding the chunk decoder.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use jsonl_tail_core::{ChunkDecoder, Columns, Completion, Decoded, TailSession};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::ReadError;

/// Result of the initial full read of a file.
#[derive(Debug)]
pub struct Snapshot {
    pub session: TailSession,
    pub columns: Columns,
    pub decoded: Decoded,
}

/// Read a whole file from offset 0. A trailing line without terminator is
/// treated as the final record.
pub async fn read_full(path: &Path, chunk_size: usize) -> Result<Snapshot, ReadError> {
    let size = file_len(path).await?;
    let decoded = read_range(path, 0, size, chunk_size, Completion::EndOfInput).await?;

    tracing::debug!(
        path = %path.display(),
        size,
        records = decoded.records.len(),
        consumed = decoded.bytes_consumed,
        malformed = decoded.malformed,
        "initial read complete"
    );

    Ok(Snapshot {
        session: TailSession::new(path, decoded.resume_offset()),
        columns: Columns::from_first(&decoded.records),
        decoded,
    })
}

/// Current size of a regular file.
pub async fn file_len(path: &Path) -> Result<u64, ReadError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|source| ReadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    if !metadata.is_file() {
        return Err(ReadError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    Ok(metadata.len())
}

/// Decode bytes `[start, end)` of `path`, seeking to `start` first.
///
/// Stops early if the file turns out shorter than `end`.
pub async fn read_range(
    path: &Path,
    start: u64,
    end: u64,
    chunk_size: usize,
    completion: Completion,
) -> Result<Decoded, ReadError> {
    let mut decoder = ChunkDecoder::new(start);
    if end <= start {
        return Ok(decoder.finish(completion));
    }

    let mut file = File::open(path).await.map_err(|source| ReadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|source| read_err(path, source))?;

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut remaining = end - start;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(|source| read_err(path, source))?;
        if n == 0 {
            break;
        }
        decoder.feed(&buf[..n]);
        remaining -= n as u64;
    }

    Ok(decoder.finish(completion))
}

fn read_err(path: &Path, source: std::io::Error) -> ReadError {
    ReadError::Read {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).expect("test");
        f.write_all(content).expect("test");
        path
    }

    #[tokio::test]
    async fn read_full_seeds_session_with_bytes_consumed() {
        let dir = tempfile::tempdir().expect("test");
        let path = write_file(&dir, "two.jsonl", b"{\"x\":1}\n{\"x\":2}\n");

        let snapshot = read_full(&path, 4).await.expect("test");
        assert_eq!(snapshot.decoded.records.len(), 2);
        assert_eq!(snapshot.session.byte_offset(), 16);
        assert_eq!(snapshot.session.path(), path.as_path());
        assert_eq!(snapshot.columns.as_slice(), ["x".to_string()]);
    }

    #[tokio::test]
    async fn read_full_accepts_unterminated_last_line() {
        let dir = tempfile::tempdir().expect("test");
        let path = write_file(&dir, "tail.jsonl", b"{\"x\":1}\n{\"x\":2}");

        let snapshot = read_full(&path, 64).await.expect("test");
        assert_eq!(snapshot.decoded.records.len(), 2);
        assert_eq!(snapshot.session.byte_offset(), 15);
    }

    #[tokio::test]
    async fn read_full_missing_file_is_open_error() {
        let dir = tempfile::tempdir().expect("test");
        let err = read_full(&dir.path().join("absent.jsonl"), 64)
            .await
            .expect_err("missing file");
        assert!(matches!(err, ReadError::Open { .. }));
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn read_full_rejects_directory() {
        let dir = tempfile::tempdir().expect("test");
        let err = read_full(dir.path(), 64).await.expect_err("directory");
        assert!(matches!(err, ReadError::NotAFile { .. }));
    }

    #[tokio::test]
    async fn read_range_stops_at_end_bound() {
        let dir = tempfile::tempdir().expect("test");
        let path = write_file(&dir, "three.jsonl", b"{\"x\":1}\n{\"x\":2}\n{\"x\":3}\n");

        // [8, 20) ends inside the third line, which must stay unconsumed.
        let decoded = read_range(&path, 8, 20, 3, Completion::Incremental)
            .await
            .expect("test");
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0]["x"], 2);
        assert_eq!(decoded.resume_offset(), 16);
    }

    #[tokio::test]
    async fn read_range_empty_window_touches_nothing() {
        let dir = tempfile::tempdir().expect("test");
        let decoded = read_range(&dir.path().join("absent"), 10, 10, 64, Completion::Incremental)
            .await
            .expect("empty window never opens the file");
        assert_eq!(decoded.resume_offset(), 10);
    }
}
