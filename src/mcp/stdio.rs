use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::{McpBridgeHandler, allowed_before_initialized, protocol};
use crate::error::RpcError;

/// Newline-delimited JSON-RPC over the process stdio streams.
///
/// Requests are handled strictly in arrival order, one at a time, so
/// responses leave in the order requests were accepted. stdout carries only
/// protocol messages; logging goes to stderr.
pub async fn run(handler: Arc<McpBridgeHandler>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();
    let mut initialized = false;

    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let request = match protocol::parse_request(raw) {
            Ok(req) => req,
            Err(err) => {
                write_message(&mut stdout, &protocol::error_response(None, &err)).await?;
                continue;
            }
        };

        if request.is_notification() {
            match request.method.as_str() {
                "initialized" | "notifications/initialized" => initialized = true,
                "exit" => break,
                other => debug!(method = other, "ignoring notification"),
            }
            continue;
        }

        let Some(id) = request.id.clone() else {
            continue;
        };
        let response = if !initialized && !allowed_before_initialized(&request.method) {
            protocol::error_response(
                Some(id),
                &RpcError::InvalidRequest("server not initialized".to_string()),
            )
        } else {
            match handler.handle(&request.method, request.params).await {
                Ok(result) => protocol::success_response(id, result),
                Err(err) => protocol::error_response(Some(id), &err),
            }
        };
        write_message(&mut stdout, &response).await?;
    }

    Ok(())
}

async fn write_message(
    stdout: &mut tokio::io::Stdout,
    message: &serde_json::Value,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
