//! `jsonl-tail render`: one-shot static page for a file.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use jsonl_tail_core::{ChunkDecoder, Columns, Completion, render_table_with};

use crate::cli::RenderOpts;
use crate::page;

pub fn cmd_render(opts: &RenderOpts, chunk_size: usize) -> anyhow::Result<()> {
    let html = render_file(&opts.file, chunk_size)?;
    match &opts.out {
        Some(out) => {
            std::fs::write(out, html).with_context(|| format!("writing {}", out.display()))?;
            tracing::info!(out = %out.display(), "page written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(html.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn render_file(path: &Path, chunk_size: usize) -> anyhow::Result<String> {
    let file =
        std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let decoded = ChunkDecoder::new(0)
        .read_to_end(file, chunk_size, Completion::EndOfInput)
        .with_context(|| format!("read failed on {}", path.display()))?;

    tracing::debug!(
        path = %path.display(),
        records = decoded.records.len(),
        malformed = decoded.malformed,
        "rendering"
    );

    let columns = Columns::from_first(&decoded.records);
    Ok(page::static_page(
        &path.display().to_string(),
        &render_table_with(&columns, &decoded.records),
        decoded.records.len(),
        decoded.malformed,
    ))
}
