use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{info, warn};

use super::methods::RpcMethods;
use super::serve::respond;
use super::types::ApiResult;
use crate::error::{Error, ErrorKind};

const MAX_WS_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// `/ws` speaks JSON-RPC, `/files/:name` downloads from the upload dir, `/health` is a liveness probe.
pub fn router(methods: Arc<RpcMethods>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/files/:name", get(download))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .with_state(methods)
}

async fn upgrade(ws: WebSocketUpgrade, State(methods): State<Arc<RpcMethods>>) -> Response {
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_socket(socket, methods))
}

async fn serve_socket(mut socket: WebSocket, methods: Arc<RpcMethods>) {
    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket receive failed");
                break;
            }
        };
        if let Some(reply) = respond(&text, &methods).await {
            if socket.send(Message::Text(reply)).await.is_err() {
                break;
            }
        }
    }
    info!("WebSocket session ended");
}

async fn download(State(methods): State<Arc<RpcMethods>>, Path(name): Path<String>) -> Response {
    let path = match methods.download_path(&name) {
        Ok(path) => path,
        Err(e) => return failure(e),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(name);
            info!(file = %file_name, bytes = bytes.len(), "File downloaded");
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => failure(Error::FileIo(e.to_string())),
    }
}

fn failure(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::FileNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %err, status = status.as_u16(), "Download rejected");
    (status, Json(ApiResult::from_error(&err, true))).into_response()
}
