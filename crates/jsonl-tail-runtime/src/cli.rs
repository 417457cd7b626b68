//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jsonl_tail_core::DEFAULT_CHUNK_SIZE;

use crate::dispatcher::ShrinkPolicy;
use crate::ws_server::DEFAULT_MAX_CONNECTIONS;

#[derive(Debug, Parser)]
#[command(name = "jsonl-tail", version, about = "Browse a JSONL file as a table and tail it live")]
pub struct Cli {
    #[command(flatten)]
    pub opts: ServeOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the page server and the live channel (default)
    Serve,
    /// Render a file once to a static HTML page
    Render(RenderOpts),
}

// Global so they are accepted both before and after `serve`.
#[derive(Debug, Clone, clap::Args)]
pub struct ServeOpts {
    /// Address of the page server
    #[arg(long, global = true, env = "JSONL_TAIL_HTTP_ADDR", default_value = "127.0.0.1:3000")]
    pub http_addr: SocketAddr,

    /// Address of the live WebSocket channel
    #[arg(long, global = true, env = "JSONL_TAIL_WS_ADDR", default_value = "127.0.0.1:3001")]
    pub ws_addr: SocketAddr,

    /// Read size in bytes for file IO
    #[arg(long, global = true, env = "JSONL_TAIL_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Maximum concurrent live connections
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// What to do when a tailed file shrinks below the session offset
    #[arg(
        long,
        global = true,
        value_enum,
        env = "JSONL_TAIL_ON_SHRINK",
        default_value_t = ShrinkPolicy::Hold
    )]
    pub on_shrink: ShrinkPolicy,
}

#[derive(Debug, clap::Args)]
pub struct RenderOpts {
    /// JSONL file to render
    pub file: PathBuf,

    /// Write the page here instead of stdout
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_serve() {
        let cli = Cli::parse_from(["jsonl-tail", "--ws-addr", "127.0.0.1:4001"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.opts.ws_addr.port(), 4001);
        assert_eq!(cli.opts.on_shrink, ShrinkPolicy::Hold);
    }

    #[test]
    fn serve_options_parse() {
        let cli = Cli::parse_from([
            "jsonl-tail",
            "serve",
            "--http-addr",
            "0.0.0.0:8080",
            "--chunk-size",
            "4096",
            "--on-shrink",
            "restart",
        ]);
        assert!(matches!(cli.command, Some(Command::Serve)));
        let opts = cli.opts;
        assert_eq!(opts.http_addr.port(), 8080);
        assert_eq!(opts.chunk_size, 4096);
        assert_eq!(opts.on_shrink, ShrinkPolicy::Restart);
        assert_eq!(opts.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn render_takes_file_and_out() {
        let cli = Cli::parse_from(["jsonl-tail", "render", "a.jsonl", "-o", "a.html"]);
        let Some(Command::Render(opts)) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(opts.file, PathBuf::from("a.jsonl"));
        assert_eq!(opts.out, Some(PathBuf::from("a.html")));
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
