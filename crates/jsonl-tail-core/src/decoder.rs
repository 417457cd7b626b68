//! Chunked JSONL decoder.
//!
//! Turns a byte stream into records while tracking exactly how many bytes
//! belong to complete lines. `start_offset + bytes_consumed` is always a valid
//! resume point: the next call picks up at the first byte of the first line
//! that was not accepted.
//!
//! Chunks may be split anywhere: inside a multi-byte character, between the
//! `\r` and `\n` of a line terminator. Lines are assembled as raw
//! bytes and only decoded as UTF-8 once their terminator has been seen.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::error::LineError;
use crate::record::{Record, parse_record};

/// Read size used when pulling from a reader.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How the decoder treats an unterminated trailing fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// More bytes may still be appended. The fragment is held back and not
    /// counted as consumed, so a later call re-reads it once it is complete.
    Incremental,
    /// The input is complete. A non-empty trailing fragment that parses as a
    /// record is accepted and consumed.
    EndOfInput,
}

/// Result of one decode call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Accepted records in file order.
    pub records: Vec<Record>,
    /// Offset the decode started at.
    pub start_offset: u64,
    /// Bytes occupied by accepted lines, terminators included.
    pub bytes_consumed: u64,
    /// Complete lines that were dropped because they did not parse.
    pub malformed: usize,
}

impl Decoded {
    /// Where the next decode should start.
    pub fn resume_offset(&self) -> u64 {
        self.start_offset + self.bytes_consumed
    }
}

/// Push-style decoder: feed chunks in order, then [`finish`](Self::finish).
#[derive(Debug)]
pub struct ChunkDecoder {
    start_offset: u64,
    /// File position of the next byte to be fed.
    position: u64,
    /// Bytes of the line currently being assembled.
    pending: Vec<u8>,
    records: Vec<Record>,
    consumed: u64,
    malformed: usize,
}

impl ChunkDecoder {
    /// Decoder for a stream that has already been positioned at `start_offset`.
    pub fn new(start_offset: u64) -> Self {
        Self::with_origin(start_offset, start_offset)
    }

    /// Decoder for a stream whose first byte sits at file position `origin`.
    ///
    /// Bytes before `start_offset` are discarded, including the leading part
    /// of a chunk that straddles it. `origin` must not lie past `start_offset`.
    pub fn with_origin(start_offset: u64, origin: u64) -> Self {
        debug_assert!(origin <= start_offset, "stream origin past start offset");
        let start_offset = start_offset.max(origin);
        Self {
            start_offset,
            position: origin,
            pending: Vec::new(),
            records: Vec::new(),
            consumed: 0,
            malformed: 0,
        }
    }

    /// Feed the next chunk of the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        let mut rest = chunk;

        if self.position < self.start_offset {
            let gap = self.start_offset - self.position;
            let skip = usize::try_from(gap).map_or(rest.len(), |g| g.min(rest.len()));
            self.position += skip as u64;
            rest = &rest[skip..];
        }
        self.position += rest.len() as u64;

        while let Some(idx) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(idx + 1);
            if self.pending.is_empty() {
                self.accept_line(line);
            } else {
                let mut joined = std::mem::take(&mut self.pending);
                joined.extend_from_slice(line);
                self.accept_line(&joined);
            }
            rest = tail;
        }

        self.pending.extend_from_slice(rest);
    }

    /// Number of bytes fed so far that belong to no complete line yet.
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Close the decode and return what was accepted.
    pub fn finish(mut self, completion: Completion) -> Decoded {
        if !self.pending.is_empty() {
            let offset = self.line_offset();
            match completion {
                Completion::EndOfInput => self.accept_fragment(offset),
                Completion::Incremental => {
                    debug!(
                        offset,
                        len = self.pending.len(),
                        "holding back unterminated line"
                    );
                }
            }
        }

        Decoded {
            records: self.records,
            start_offset: self.start_offset,
            bytes_consumed: self.consumed,
            malformed: self.malformed,
        }
    }

    /// Pull `reader` to its end in chunks of `chunk_size`, then finish.
    pub fn read_to_end<R: Read>(
        mut self,
        mut reader: R,
        chunk_size: usize,
        completion: Completion,
    ) -> io::Result<Decoded> {
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.feed(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(self.finish(completion))
    }

    /// File offset of the first byte of the line being assembled.
    fn line_offset(&self) -> u64 {
        self.start_offset + self.consumed
    }

    /// A complete line, terminator included. Always consumed, even when the
    /// content is rejected, so a bad line can never stall the resume point.
    fn accept_line(&mut self, line: &[u8]) {
        let offset = self.line_offset();
        self.consumed += line.len() as u64;

        let body = line.strip_suffix(b"\n").unwrap_or(line);
        let body = body.strip_suffix(b"\r").unwrap_or(body);

        match parse_line(body) {
            Ok(Some(record)) => self.records.push(record),
            Ok(None) => {}
            Err(e) => {
                self.malformed += 1;
                warn!(offset, error = %e, "dropping malformed JSONL line");
            }
        }
    }

    /// Trailing fragment at end of input. Consumed only when it parses;
    /// otherwise it stays unconsumed for a later resume to pick up.
    fn accept_fragment(&mut self, offset: u64) {
        let fragment = std::mem::take(&mut self.pending);
        match parse_line(&fragment) {
            Ok(Some(record)) => {
                self.consumed += fragment.len() as u64;
                self.records.push(record);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(offset, error = %e, "unterminated trailing line does not parse, leaving it");
            }
        }
    }
}

/// Decode a line body. `Ok(None)` for blank lines.
fn parse_line(body: &[u8]) -> Result<Option<Record>, LineError> {
    let text = std::str::from_utf8(body)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    parse_record(trimmed).map(Some)
}

/// Decode `bytes`, which begin at file position `start_offset`.
pub fn decode(bytes: &[u8], start_offset: u64, completion: Completion) -> Decoded {
    let mut decoder = ChunkDecoder::new(start_offset);
    decoder.feed(bytes);
    decoder.finish(completion)
}
