//! Page server: the path form and the initial full-table render.

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::ReadError;
use crate::page;
use crate::reader;

#[derive(Debug, Clone)]
pub struct PageState {
    pub chunk_size: usize,
    /// Port of the live channel, handed to the client script.
    pub ws_port: u16,
}

#[derive(Debug, Deserialize)]
struct OpenForm {
    #[serde(default)]
    file_or_folder: String,
}

pub fn router(state: PageState) -> Router {
    Router::new()
        .route("/", get(index).post(open))
        .with_state(state)
}

/// Serve `router` on a pre-bound listener until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: PageState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(addr = %addr, ws_port = state.ws_port, "page server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("page server stopped");
    Ok(())
}

async fn index() -> Html<String> {
    Html(page::form_page())
}

async fn open(State(state): State<PageState>, Form(form): Form<OpenForm>) -> Response {
    let path = form.file_or_folder.trim();
    if path.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no path given");
    }

    let snapshot = match reader::read_full(Path::new(path), state.chunk_size).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(path, error = %e, "initial read failed");
            return error_response(status_for(&e), &e.to_string());
        }
    };

    tracing::info!(
        path,
        records = snapshot.decoded.records.len(),
        malformed = snapshot.decoded.malformed,
        byte_offset = snapshot.session.byte_offset(),
        "serving table"
    );

    match page::table_page(&snapshot, state.ws_port) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(path, error = %e, "page render failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "page render failed")
        }
    }
}

fn status_for(err: &ReadError) -> StatusCode {
    match err {
        ReadError::NotAFile { .. } => StatusCode::BAD_REQUEST,
        _ => match err.io_kind() {
            Some(std::io::ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            Some(std::io::ErrorKind::PermissionDenied) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Html(page::error_page(message))).into_response()
}
