use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use super::methods::RpcMethods;
use super::types::{ErrorCode, RpcRequest, RpcResponse};

/// Answers one JSON-RPC message. Blank input has no reply.
///
/// Protocol failures become JSON-RPC errors. Operation failures travel inside the
/// `ApiResult` carried by a successful response.
pub async fn respond(text: &str, methods: &RpcMethods) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let response = match decode(text) {
        Ok(request) => {
            debug!(method = %request.method, "Dispatching request");
            let result = methods.dispatch(&request.method, request.params).await;
            let id = request.id.unwrap_or(Value::Null);
            match serde_json::to_value(&result) {
                Ok(value) => RpcResponse::ok(id, value),
                Err(e) => RpcResponse::fail(id, ErrorCode::InternalError, format!("Failed to encode result: {}", e)),
            }
        }
        Err(rejected) => rejected,
    };

    match serde_json::to_string(&response) {
        Ok(line) => Some(line),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            None
        }
    }
}

fn decode(text: &str) -> Result<RpcRequest, RpcResponse> {
    let request: RpcRequest =
        serde_json::from_str(text).map_err(|_| RpcResponse::from_code(Value::Null, ErrorCode::ParseError))?;
    if !request.is_v2() {
        return Err(RpcResponse::from_code(Value::Null, ErrorCode::InvalidRequest));
    }
    if !RpcMethods::is_known(&request.method) {
        return Err(RpcResponse::fail(
            request.reply_id(),
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", request.method),
        ));
    }
    Ok(request)
}

/// Serves newline-delimited JSON-RPC until the reader reaches end of input.
pub async fn serve_lines<R, W>(reader: R, mut writer: W, methods: &RpcMethods) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let Some(reply) = respond(&line, methods).await else {
            continue;
        };
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
