//! jsonl-tail-core: incremental JSONL ingestion and table rendering.
//! Decodes byte ranges of a growing JSONL file into records, renders records
//! as HTML table markup, and tracks per-client read progress.
//!
//! No async runtime and no filesystem watching; pure transformations plus
//! the session invariant. The runtime crate owns all IO.

pub mod decoder;
pub mod error;
pub mod record;
pub mod render;
pub mod session;

pub use decoder::{ChunkDecoder, Completion, DEFAULT_CHUNK_SIZE, Decoded, decode};
pub use error::{LineError, SessionError};
pub use record::{Columns, Record, Value, parse_record};
pub use render::{escape_html, render_header, render_rows, render_table, render_table_with};
pub use session::TailSession;
