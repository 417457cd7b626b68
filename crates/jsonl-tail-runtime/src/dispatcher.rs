//! Change watcher and delta dispatcher.
//!
//! One [`Dispatcher`] per live connection. It owns the connection's
//! [`LiveContext`] and turns "the file changed" into "these rows are new".
//! Calls are made from the connection task only, so delta reads and offset
//! advances for one session never overlap.

use std::path::Path;
use std::sync::Arc;

use jsonl_tail_core::{Columns, Completion, TailSession, render_header, render_rows};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::LiveError;
use crate::reader;
use crate::registry::{WatchGuard, WatchRegistry};

/// Capacity of the channel bridging notify callbacks into the connection task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What to do when the watched file becomes shorter than the session offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ShrinkPolicy {
    /// Skip the delta and keep the offset.
    #[default]
    Hold,
    /// Start a fresh session at offset 0 and replace the client's rows.
    Restart,
}

/// Per-connection state: the session and the columns rows are projected on.
#[derive(Debug, Clone)]
pub struct LiveContext {
    pub session: TailSession,
    /// Empty until a first record establishes them.
    pub columns: Columns,
}

impl LiveContext {
    pub fn new(session: TailSession, columns: Columns) -> Self {
        Self { session, columns }
    }
}

/// Rows fragment to push to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowsPush {
    pub html: String,
    pub records: usize,
    pub malformed: usize,
    pub byte_offset: u64,
    /// Rows replace the table body instead of extending it.
    pub replace: bool,
    /// New `<thead>` markup, sent when the columns were just established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// How a notify event affects a tailed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Content may have grown.
    Content,
    /// The file was removed or renamed away.
    Removed,
    /// Metadata or access only.
    Ignored,
}

pub fn classify(kind: &EventKind) -> ChangeKind {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => ChangeKind::Ignored,
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any => ChangeKind::Content,
        EventKind::Access(_) | EventKind::Other => ChangeKind::Ignored,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub chunk_size: usize,
    pub on_shrink: ShrinkPolicy,
}

#[derive(Debug)]
pub struct Dispatcher {
    ctx: LiveContext,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(ctx: LiveContext, options: DispatchOptions) -> Self {
        Self { ctx, options }
    }

    pub fn session(&self) -> &TailSession {
        &self.ctx.session
    }

    pub fn columns(&self) -> &Columns {
        &self.ctx.columns
    }

    /// Read whatever was appended since the session offset.
    ///
    /// Returns `None` when there is nothing to show: no growth, only blank or
    /// malformed lines, or a shrink held under [`ShrinkPolicy::Hold`].
    pub async fn on_change(&mut self) -> Result<Option<RowsPush>, LiveError> {
        let path = self.ctx.session.path().to_path_buf();
        let size = reader::file_len(&path).await?;
        let offset = self.ctx.session.byte_offset();

        if size < offset {
            return match self.options.on_shrink {
                ShrinkPolicy::Hold => {
                    tracing::debug!(
                        path = %path.display(),
                        size,
                        offset,
                        "file shrank below session offset, holding"
                    );
                    Ok(None)
                }
                ShrinkPolicy::Restart => self.restart(&path, size).await.map(Some),
            };
        }
        if size == offset {
            return Ok(None);
        }

        let decoded = reader::read_range(
            &path,
            offset,
            size,
            self.options.chunk_size,
            Completion::Incremental,
        )
        .await?;
        self.ctx.session.advance(decoded.resume_offset())?;

        if decoded.records.is_empty() {
            return Ok(None);
        }

        let header = if self.ctx.columns.is_empty() {
            self.ctx.columns = Columns::from_first(&decoded.records);
            Some(render_header(&self.ctx.columns))
        } else {
            None
        };

        tracing::debug!(
            path = %path.display(),
            from = offset,
            to = self.ctx.session.byte_offset(),
            records = decoded.records.len(),
            "dispatching delta"
        );

        Ok(Some(RowsPush {
            html: render_rows(&self.ctx.columns, &decoded.records),
            records: decoded.records.len(),
            malformed: decoded.malformed,
            byte_offset: self.ctx.session.byte_offset(),
            replace: false,
            header,
        }))
    }

    /// Re-read the file from the start into a fresh session.
    async fn restart(&mut self, path: &Path, size: u64) -> Result<RowsPush, LiveError> {
        tracing::info!(
            path = %path.display(),
            size,
            previous_offset = self.ctx.session.byte_offset(),
            "file shrank below session offset, restarting from 0"
        );
        let decoded = reader::read_range(
            path,
            0,
            size,
            self.options.chunk_size,
            Completion::Incremental,
        )
        .await?;

        self.ctx = LiveContext::new(
            TailSession::new(path, decoded.resume_offset()),
            Columns::from_first(&decoded.records),
        );

        Ok(RowsPush {
            html: render_rows(&self.ctx.columns, &decoded.records),
            records: decoded.records.len(),
            malformed: decoded.malformed,
            byte_offset: self.ctx.session.byte_offset(),
            replace: true,
            header: Some(render_header(&self.ctx.columns)),
        })
    }
}

/// A dispatcher with its filesystem subscription attached.
///
/// Field order matters: the event receiver is dropped before the guard, so a
/// notify thread blocked on a full channel is released before the watcher
/// itself goes away.
#[derive(Debug)]
pub struct LiveTail {
    pub dispatcher: Dispatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
    _guard: WatchGuard,
}

impl LiveTail {
    /// Subscribe to change notifications for the context's path.
    pub fn attach(
        ctx: LiveContext,
        options: DispatchOptions,
        registry: &Arc<WatchRegistry>,
    ) -> Result<Self, LiveError> {
        let (tx, events) = mpsc::channel::<notify::Result<Event>>(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res| {
            // Best-effort send; if the receiver is dropped the watch is going away.
            let _ = tx.blocking_send(res);
        })?;
        watcher.watch(ctx.session.path(), RecursiveMode::NonRecursive)?;

        let guard = registry.register(ctx.session.path(), watcher)?;
        tracing::debug!(
            path = %ctx.session.path().display(),
            offset = ctx.session.byte_offset(),
            "watching"
        );

        Ok(Self {
            dispatcher: Dispatcher::new(ctx, options),
            events,
            _guard: guard,
        })
    }

    /// Next raw notify event. `None` once the watcher has been released.
    pub async fn next_event(&mut self) -> Option<notify::Result<Event>> {
        self.events.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use std::io::Write;
    use std::path::PathBuf;

    const OPTIONS: DispatchOptions = DispatchOptions {
        chunk_size: 5,
        on_shrink: ShrinkPolicy::Hold,
    };

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("test");
        f.write_all(bytes).expect("test");
    }

    fn fixture(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, content).expect("test");
        (dir, path)
    }

    fn dispatcher_at(
        path: &Path,
        offset: u64,
        columns: &[&str],
        options: DispatchOptions,
    ) -> Dispatcher {
        let columns = Columns::new(columns.iter().map(|c| c.to_string()).collect());
        Dispatcher::new(LiveContext::new(TailSession::new(path, offset), columns), options)
    }

    #[tokio::test]
    async fn append_yields_only_the_new_row() {
        let (_dir, path) = fixture(b"{\"x\":1}\n{\"x\":2}\n");
        let mut dispatcher = dispatcher_at(&path, 16, &["x"], OPTIONS);

        append(&path, b"{\"x\":3}\n");
        let push = dispatcher.on_change().await.expect("test").expect("one row");

        assert_eq!(push.html, "<tr><td>3</td></tr>");
        assert_eq!(push.records, 1);
        assert_eq!(push.byte_offset, 24);
        assert!(!push.replace);
        assert!(push.header.is_none());
        assert_eq!(dispatcher.session().byte_offset(), 24);
    }

    #[tokio::test]
    async fn unchanged_file_is_a_no_op() {
        let (_dir, path) = fixture(b"{\"x\":1}\n");
        let mut dispatcher = dispatcher_at(&path, 8, &["x"], OPTIONS);
        assert!(dispatcher.on_change().await.expect("test").is_none());
        assert_eq!(dispatcher.session().byte_offset(), 8);
    }

    #[tokio::test]
    async fn unterminated_append_waits_for_newline() {
        let (_dir, path) = fixture(b"{\"x\":1}\n");
        let mut dispatcher = dispatcher_at(&path, 8, &["x"], OPTIONS);

        append(&path, b"{\"x\":4}");
        assert!(dispatcher.on_change().await.expect("test").is_none());
        assert_eq!(dispatcher.session().byte_offset(), 8);

        append(&path, b"\n");
        let push = dispatcher.on_change().await.expect("test").expect("completed row");
        assert_eq!(push.html, "<tr><td>4</td></tr>");
        assert_eq!(push.byte_offset, 16);
    }

    #[tokio::test]
    async fn malformed_append_advances_without_rows() {
        let (_dir, path) = fixture(b"{\"x\":1}\n");
        let mut dispatcher = dispatcher_at(&path, 8, &["x"], OPTIONS);

        append(&path, b"garbage\n");
        assert!(dispatcher.on_change().await.expect("test").is_none());
        assert_eq!(dispatcher.session().byte_offset(), 16);
    }

    #[tokio::test]
    async fn first_rows_establish_columns() {
        let (_dir, path) = fixture(b"");
        let mut dispatcher = dispatcher_at(&path, 0, &[], OPTIONS);

        append(&path, b"{\"b\":1,\"a\":2}\n");
        let push = dispatcher.on_change().await.expect("test").expect("row");
        assert_eq!(
            push.header.as_deref(),
            Some("<thead><tr><th>b</th><th>a</th></tr></thead>")
        );
        assert_eq!(dispatcher.columns().as_slice(), ["b".to_string(), "a".to_string()]);

        append(&path, b"{\"a\":3,\"c\":4}\n");
        let push = dispatcher.on_change().await.expect("test").expect("row");
        assert!(push.header.is_none());
        assert_eq!(push.html, "<tr><td></td><td>3</td></tr>");
    }

    #[tokio::test]
    async fn shrink_is_held_by_default() {
        let (_dir, path) = fixture(b"{\"x\":1}\n{\"x\":2}\n");
        let mut dispatcher = dispatcher_at(&path, 16, &["x"], OPTIONS);

        std::fs::write(&path, b"{\"x\":9}\n").expect("test");
        assert!(dispatcher.on_change().await.expect("test").is_none());
        assert_eq!(dispatcher.session().byte_offset(), 16);
    }

    #[tokio::test]
    async fn shrink_restart_replaces_rows() {
        let (_dir, path) = fixture(b"{\"x\":1}\n{\"x\":2}\n");
        let options = DispatchOptions {
            on_shrink: ShrinkPolicy::Restart,
            ..OPTIONS
        };
        let mut dispatcher = dispatcher_at(&path, 16, &["x"], options);

        std::fs::write(&path, b"{\"y\":9}\n").expect("test");
        let push = dispatcher.on_change().await.expect("test").expect("reset");
        assert!(push.replace);
        assert_eq!(push.html, "<tr><td>9</td></tr>");
        assert_eq!(
            push.header.as_deref(),
            Some("<thead><tr><th>y</th></tr></thead>")
        );
        assert_eq!(dispatcher.session().byte_offset(), 8);
    }

    #[tokio::test]
    async fn removed_file_surfaces_read_error() {
        let (_dir, path) = fixture(b"{\"x\":1}\n");
        let mut dispatcher = dispatcher_at(&path, 8, &["x"], OPTIONS);

        std::fs::remove_file(&path).expect("test");
        let err = dispatcher.on_change().await.expect_err("file is gone");
        assert!(matches!(err, LiveError::Read(_)));
    }

    #[test]
    fn classify_event_kinds() {
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            ChangeKind::Content
        );
        assert_eq!(classify(&EventKind::Modify(ModifyKind::Any)), ChangeKind::Content);
        assert_eq!(classify(&EventKind::Create(CreateKind::File)), ChangeKind::Content);
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))),
            ChangeKind::Ignored
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), ChangeKind::Ignored);
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), ChangeKind::Removed);
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            ChangeKind::Removed
        );
    }

    #[tokio::test]
    async fn attach_registers_and_releases_watch() {
        let (_dir, path) = fixture(b"{\"x\":1}\n");
        let registry = WatchRegistry::shared();
        let ctx = LiveContext::new(TailSession::new(&path, 8), Columns::new(vec!["x".into()]));

        let tail = LiveTail::attach(ctx, OPTIONS, &registry).expect("test");
        assert_eq!(registry.active(), 1);
        assert_eq!(registry.watched_paths(), vec![path.clone()]);

        drop(tail);
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test]
    async fn attach_to_missing_path_fails_without_registering() {
        let dir = tempfile::tempdir().expect("test");
        let registry = WatchRegistry::shared();
        let ctx = LiveContext::new(
            TailSession::new(dir.path().join("absent.jsonl"), 0),
            Columns::default(),
        );

        let result = LiveTail::attach(ctx, OPTIONS, &registry);
        assert!(matches!(result, Err(LiveError::Watch(_))));
        assert_eq!(registry.active(), 0);
    }
}
