//! jsonl-tail: browse a JSONL file as an HTML table and watch new lines
//! arrive live.

use clap::Parser;

mod cli;
mod cmd_render;
mod dispatcher;
mod error;
mod page;
mod reader;
mod registry;
mod rpc;
mod serve;
mod web;
mod ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("JSONL_TAIL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command.unwrap_or(cli::Command::Serve) {
        cli::Command::Serve => {
            tracing::info!("jsonl-tail starting");
            serve::run(args.opts).await?;
        }
        cli::Command::Render(opts) => {
            cmd_render::cmd_render(&opts, args.opts.chunk_size.max(1))?;
        }
    }

    Ok(())
}
