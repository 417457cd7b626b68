use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use jsonl_tail_core::{Columns, TailSession};
use notify::Event;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{ChangeKind, DispatchOptions, LiveContext, LiveTail, classify};
use crate::error::LiveError;
use crate::registry::SharedRegistry;
use crate::rpc::{
    INVALID_PARAMS, INVALID_REQUEST, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, PARSE_ERROR, TailParams, WATCH_FAILED,
};

// ---------------------------------------------------------------------------
// Origin validation
// ---------------------------------------------------------------------------

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - `http://localhost:*` or `http://127.0.0.1:*` (the page server)
/// - `null` (file:// contexts, e.g. a page written by `jsonl-tail render`)
/// - Absent origin header (non-browser clients)
///
/// All other origins are rejected with HTTP 403.
fn validate_origin(
    req: &tokio_tungstenite::tungstenite::handshake::server::Request,
    resp: tokio_tungstenite::tungstenite::handshake::server::Response,
) -> Result<
    tokio_tungstenite::tungstenite::handshake::server::Response,
    tokio_tungstenite::tungstenite::handshake::server::ErrorResponse,
> {
    if let Some(origin) = req.headers().get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        if is_local_origin(origin_str) {
            return Ok(resp);
        }
        tracing::warn!(origin = %origin_str, "ws: rejected connection from disallowed origin");
        let mut err_resp = http::Response::new(Some("Origin not allowed".into()));
        *err_resp.status_mut() = http::StatusCode::FORBIDDEN;
        return Err(err_resp);
    }
    Ok(resp)
}

/// `null`, or an `http` origin whose host is exactly `localhost` or
/// `127.0.0.1` (any port).
fn is_local_origin(origin: &str) -> bool {
    if origin == "null" {
        return true;
    }
    let Ok(uri) = origin.parse::<http::Uri>() else {
        return false;
    };
    uri.scheme_str() == Some("http") && matches!(uri.host(), Some("localhost" | "127.0.0.1"))
}

// ---------------------------------------------------------------------------
// LiveServer
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// WebSocket server for live tails.
///
/// Each connection speaks JSON-RPC 2.0 over text frames: one `tail` request
/// attaches a watch, after which `rows` notifications are pushed as the file
/// grows and a final `closed` notification precedes the close frame.
pub struct LiveServer {
    addr: SocketAddr,
    registry: SharedRegistry,
    options: DispatchOptions,
    cancel: CancellationToken,
    max_connections: usize,
}

impl LiveServer {
    pub fn new(
        addr: SocketAddr,
        registry: SharedRegistry,
        options: DispatchOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            registry,
            options,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Bind to the configured address and return the actual local address.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "live server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let registry = Arc::clone(&self.registry);
                            let options = self.options;
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_hdr_async(stream, validate_origin).await {
                                    Ok(ws_stream) => {
                                        if let Err(e) = handle_ws_client(ws_stream, registry, options, cancel).await {
                                            tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("live server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

enum Step {
    Inbound(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Watch(Option<notify::Result<Event>>),
    Shutdown,
}

/// Whether the connection stays open after handling an event.
enum Flow {
    Continue,
    Close(String),
}

/// Pends forever while no tail is attached.
async fn next_watch_event(live: &mut Option<LiveTail>) -> Option<notify::Result<Event>> {
    match live {
        Some(tail) => tail.next_event().await,
        None => std::future::pending().await,
    }
}

async fn handle_ws_client(
    ws_stream: WebSocketStream<TcpStream>,
    registry: SharedRegistry,
    options: DispatchOptions,
    cancel: CancellationToken,
) -> Result<(), LiveError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut live: Option<LiveTail> = None;

    tracing::debug!("ws client connected");

    loop {
        let step = tokio::select! {
            msg = ws_rx.next() => Step::Inbound(msg),
            event = next_watch_event(&mut live) => Step::Watch(event),
            _ = cancel.cancelled() => Step::Shutdown,
        };

        let flow = match step {
            Step::Inbound(None) => {
                tracing::debug!("ws client disconnected (stream ended)");
                return Ok(());
            }
            Step::Inbound(Some(Err(e))) => {
                tracing::debug!(error = %e, "ws read error, dropping client");
                return Err(e.into());
            }
            Step::Inbound(Some(Ok(msg))) => {
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => {
                        tracing::debug!("ws client sent close frame");
                        return Ok(());
                    }
                    Message::Ping(data) => {
                        ws_tx.send(Message::Pong(data)).await?;
                        continue;
                    }
                    _ => continue,
                };
                handle_request(&mut ws_tx, &text, &mut live, &registry, options).await?
            }
            Step::Watch(None) => Flow::Close("watch released".into()),
            Step::Watch(Some(Err(e))) => {
                tracing::warn!(error = %e, "watch error");
                Flow::Close(format!("watch failed: {e}"))
            }
            Step::Watch(Some(Ok(event))) => match (classify(&event.kind), live.as_mut()) {
                (ChangeKind::Ignored, _) | (_, None) => Flow::Continue,
                (ChangeKind::Removed, Some(_)) => Flow::Close("file was removed or renamed".into()),
                (ChangeKind::Content, Some(tail)) => dispatch_change(&mut ws_tx, tail).await?,
            },
            Step::Shutdown => {
                tracing::debug!("ws client handler: cancellation requested");
                Flow::Close("server shutting down".into())
            }
        };

        if let Flow::Close(reason) = flow {
            // Release the watch before telling the client.
            if let Some(tail) = live.take() {
                tracing::debug!(
                    path = %tail.dispatcher.session().path().display(),
                    reason = %reason,
                    "closing live tail"
                );
            }
            let _ = send_json(
                &mut ws_tx,
                &JsonRpcNotification::new("closed", serde_json::json!({ "reason": reason })),
            )
            .await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return Ok(());
        }
    }
}

async fn handle_request(
    ws_tx: &mut WsSink,
    text: &str,
    live: &mut Option<LiveTail>,
    registry: &SharedRegistry,
    options: DispatchOptions,
) -> Result<Flow, LiveError> {
    let req: JsonRpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            let resp = JsonRpcResponse::error(None, PARSE_ERROR, format!("parse error: {e}"));
            send_json(ws_tx, &resp).await?;
            return Ok(Flow::Continue);
        }
    };

    tracing::debug!(method = %req.method, id = ?req.id, "ws: request received");

    match req.method.as_str() {
        "tail" => {
            if let Some(tail) = live.as_ref() {
                let resp = JsonRpcResponse::error(
                    req.id,
                    INVALID_REQUEST,
                    format!(
                        "already watching {}",
                        tail.dispatcher.session().path().display()
                    ),
                );
                send_json(ws_tx, &resp).await?;
                return Ok(Flow::Continue);
            }

            let params: TailParams = match serde_json::from_value(req.params) {
                Ok(p) => p,
                Err(e) => {
                    let resp = JsonRpcResponse::error(
                        req.id,
                        INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                    send_json(ws_tx, &resp).await?;
                    return Ok(Flow::Continue);
                }
            };

            let ctx = LiveContext::new(
                TailSession::new(&params.path, params.byte_offset),
                Columns::new(params.columns),
            );
            let tail = match LiveTail::attach(ctx, options, registry) {
                Ok(tail) => tail,
                Err(e) => {
                    tracing::warn!(path = %params.path.display(), error = %e, "could not attach watch");
                    let resp = JsonRpcResponse::error(req.id, WATCH_FAILED, e.to_string());
                    send_json(ws_tx, &resp).await?;
                    return Ok(Flow::Continue);
                }
            };

            let resp = JsonRpcResponse::ok(
                req.id,
                serde_json::json!({
                    "watching": true,
                    "path": params.path.display().to_string(),
                    "byte_offset": params.byte_offset,
                }),
            );
            send_json(ws_tx, &resp).await?;

            tracing::debug!(
                path = %params.path.display(),
                columns = tail.dispatcher.columns().len(),
                active = registry.active(),
                "live tail attached"
            );

            // Catch up on lines appended between page render and attach.
            let tail = live.insert(tail);
            dispatch_change(ws_tx, tail).await
        }

        _ => {
            let resp = JsonRpcResponse::error(
                req.id,
                METHOD_NOT_FOUND,
                format!("method not found: {}", req.method),
            );
            send_json(ws_tx, &resp).await?;
            Ok(Flow::Continue)
        }
    }
}

/// Run one delta read and push the resulting rows, if any.
async fn dispatch_change(ws_tx: &mut WsSink, tail: &mut LiveTail) -> Result<Flow, LiveError> {
    match tail.dispatcher.on_change().await {
        Ok(Some(push)) => {
            let notif = JsonRpcNotification::new("rows", serde_json::to_value(&push)?);
            send_json(ws_tx, &notif).await?;
            Ok(Flow::Continue)
        }
        Ok(None) => Ok(Flow::Continue),
        Err(e) => {
            tracing::warn!(
                path = %tail.dispatcher.session().path().display(),
                error = %e,
                "delta read failed"
            );
            Ok(Flow::Close(e.to_string()))
        }
    }
}

async fn send_json(ws_tx: &mut WsSink, value: &impl Serialize) -> Result<(), LiveError> {
    ws_tx
        .send(Message::Text(serde_json::to_string(value)?))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
