//! `jsonl-tail serve`: page server, live channel and shutdown wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cli::ServeOpts;
use crate::dispatcher::DispatchOptions;
use crate::registry::WatchRegistry;
use crate::web::{self, PageState};
use crate::ws_server::LiveServer;

/// Upper bound on waiting for servers to drain after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(opts: ServeOpts) -> anyhow::Result<()> {
    let registry = WatchRegistry::shared();
    let cancel = CancellationToken::new();
    let chunk_size = opts.chunk_size.max(1);
    let options = DispatchOptions {
        chunk_size,
        on_shrink: opts.on_shrink,
    };

    let live = LiveServer::new(opts.ws_addr, Arc::clone(&registry), options, cancel.clone())
        .with_max_connections(opts.max_connections);
    let (ws_listener, ws_addr) = live
        .bind()
        .await
        .with_context(|| format!("binding live channel on {}", opts.ws_addr))?;
    let http_listener = TcpListener::bind(opts.http_addr)
        .await
        .with_context(|| format!("binding page server on {}", opts.http_addr))?;
    let state = PageState {
        chunk_size,
        ws_port: ws_addr.port(),
    };

    tracing::info!(
        http_addr = %opts.http_addr,
        ws_addr = %ws_addr,
        on_shrink = ?opts.on_shrink,
        "jsonl-tail serving"
    );

    // Either server exiting cancels the other.
    let ws_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = live.serve(ws_listener).await;
            cancel.cancel();
            result
        })
    };
    let http_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = web::serve(http_listener, state, cancel.clone()).await;
            cancel.cancel();
            result
        })
    };

    tokio::select! {
        () = shutdown_signal() => {}
        () = cancel.cancelled() => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    cancel.cancel();
    tracing::debug!(paths = ?registry.watched_paths(), "releasing watches");
    registry.shutdown();

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        match ws_handle.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "live server failed"),
            Err(e) => tracing::warn!(error = %e, "live server task panicked"),
            Ok(Ok(())) => {}
        }
        match http_handle.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "page server failed"),
            Err(e) => tracing::warn!(error = %e, "page server task panicked"),
            Ok(Ok(())) => {}
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("servers did not drain in time");
    }

    tracing::info!("jsonl-tail stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not register SIGTERM handler");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
