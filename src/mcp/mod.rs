pub mod http;
pub mod protocol;
pub mod resources;
pub mod stdio;

use serde_json::{Value, json};

use crate::context::AppContext;
use crate::dispatch;
use crate::error::RpcError;

/// The MCP session surface: initialize / list / call / read / ping,
/// shared by every transport. Holds no per-session state; all state lives
/// in the process singletons behind [`AppContext`].
#[derive(Clone)]
pub struct McpBridgeHandler {
    ctx: AppContext,
}

impl McpBridgeHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub async fn server_name(&self) -> String {
        self.ctx.registry.snapshot().await.server.server_name().to_string()
    }

    /// The `initialize` result: echo the client's protocol version (or fall
    /// back to the configured default) and advertise the capability set.
    pub async fn initialize_result(&self, params: &Value) -> Value {
        let snapshot = self.ctx.registry.snapshot().await;
        let protocol_version = params
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| snapshot.server.protocol_version_default())
            .to_string();

        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": true },
                "prompts": { "listChanged": true },
                "resources": {},
                "experimental": {
                    "odooInstances": { "available": self.ctx.store.names() }
                }
            },
            "serverInfo": {
                "name": snapshot.server.server_name(),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": snapshot.server.instructions(),
        })
    }

    /// Dispatch one request method. Transports handle `initialized`/`exit`
    /// notifications and session gating themselves.
    pub async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                let params = params.unwrap_or_else(|| json!({}));
                Ok(self.initialize_result(&params).await)
            }
            "ping" => Ok(json!({})),
            "shutdown" => Ok(Value::Null),
            "tools/list" => {
                let snapshot = self.ctx.registry.snapshot().await;
                let tools: Vec<Value> =
                    snapshot.visible_tools().map(|t| t.listing()).collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = params
                    .ok_or_else(|| RpcError::InvalidRequest("missing params for tools/call".to_string()))?;
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidRequest("tools/call missing 'name'".to_string()))?;
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

                // The snapshot Arc is cloned here; a reload during the call
                // does not affect this dispatch.
                let snapshot = self.ctx.registry.snapshot().await;
                let tool = snapshot
                    .visible_tool(name)
                    .ok_or_else(|| RpcError::ToolNotFound(name.to_string()))?;

                // Past this point the tool was resolved: a failure is an
                // execution failure of the tool, reported as isError content,
                // not a protocol error.
                match dispatch::call_tool(&self.ctx, tool, args).await {
                    Ok(content) => Ok(content),
                    Err(err) => Ok(tool_error_content(name, &err)),
                }
            }
            "prompts/list" => {
                let snapshot = self.ctx.registry.snapshot().await;
                let prompts: Vec<Value> = snapshot
                    .prompts
                    .iter()
                    .map(|p| json!({ "name": p.name, "description": p.description }))
                    .collect();
                Ok(json!({ "prompts": prompts }))
            }
            "prompts/get" => {
                let params = params
                    .ok_or_else(|| RpcError::InvalidRequest("missing params for prompts/get".to_string()))?;
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidRequest("prompts/get missing 'name'".to_string()))?;
                let snapshot = self.ctx.registry.snapshot().await;
                let prompt = snapshot
                    .prompt(name)
                    .ok_or_else(|| RpcError::MethodNotFound(format!("unknown prompt: {name}")))?;
                Ok(json!({
                    "description": prompt.description,
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": prompt.content }
                    }]
                }))
            }
            "resources/list" => resources::list_resources(&self.ctx).await,
            "resources/read" => {
                let params = params.ok_or_else(|| {
                    RpcError::InvalidRequest("missing params for resources/read".to_string())
                })?;
                let uri = params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidRequest("resources/read missing 'uri'".to_string()))?;
                resources::read_resource(&self.ctx, uri).await
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

/// A failed tool invocation as MCP content: one text block with the error
/// message, taxonomy code and tool name, flagged `isError`.
fn tool_error_content(tool: &str, err: &RpcError) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&json!({
                "error": err.to_string(),
                "code": err.code(),
                "tool": tool,
            }))
            .unwrap_or_else(|_| "{\"error\":\"unknown\"}".to_string()),
        }],
        "isError": true
    })
}

/// Methods some clients call before sending the `initialized` notification.
pub(crate) fn allowed_before_initialized(method: &str) -> bool {
    matches!(
        method,
        "initialize" | "ping" | "tools/list" | "prompts/list" | "resources/list"
    )
}
