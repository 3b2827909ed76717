//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use odoo_mcp_bridge::context::AppContext;
use odoo_mcp_bridge::odoo::instance::{InstanceDescriptor, InstanceStore};
use odoo_mcp_bridge::registry::Registry;

pub fn modern_descriptor(url: &str) -> InstanceDescriptor {
    InstanceDescriptor {
        url: url.to_string(),
        db: Some("test_db".to_string()),
        api_key: Some("test_api_key".to_string()),
        username: None,
        password: None,
        version: None,
        protocol: None,
        timeout_ms: Some(5_000),
        max_retries: Some(2),
        extra: HashMap::new(),
    }
}

pub fn legacy_descriptor(url: &str) -> InstanceDescriptor {
    InstanceDescriptor {
        url: url.to_string(),
        db: Some("test_db".to_string()),
        api_key: None,
        username: Some("admin".to_string()),
        password: Some("admin".to_string()),
        version: Some("18".to_string()),
        protocol: None,
        timeout_ms: Some(5_000),
        max_retries: Some(2),
        extra: HashMap::new(),
    }
}

/// Registry backed by explicit files in a temp directory.
pub fn seeded_registry(dir: &Path, tools: &Value) -> Arc<Registry> {
    std::fs::write(dir.join("tools.json"), serde_json::to_string_pretty(tools).unwrap()).unwrap();
    std::fs::write(
        dir.join("prompts.json"),
        r#"{"prompts": [{"name": "test_prompt", "description": "A test prompt", "content": "Test content"}]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("server.json"),
        r#"{"serverName": "test-bridge", "instructions": "Test instructions", "protocolVersionDefault": "2025-06-18"}"#,
    )
    .unwrap();
    Arc::new(Registry::new(
        dir.join("tools.json"),
        dir.join("prompts.json"),
        dir.join("server.json"),
    ))
}

/// A context wired to one modern instance named "default" at the given URL.
pub async fn modern_context(dir: &Path, odoo_url: &str, tools: &Value) -> AppContext {
    let mut instances = HashMap::new();
    instances.insert("default".to_string(), modern_descriptor(odoo_url));
    let instances_path = dir.join("instances.json");
    std::fs::write(&instances_path, serde_json::to_string_pretty(&instances).unwrap()).unwrap();

    let store = InstanceStore::new(instances, Some(instances_path));
    let registry = seeded_registry(dir, tools);
    let ctx = AppContext::new(store, registry);
    ctx.registry.initial_load().await.unwrap();
    ctx
}

/// The default tool set used by dispatcher-level tests.
pub fn test_tools() -> Value {
    json!({"tools": [
        {
            "name": "odoo_count",
            "description": "Count records",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance": {"type": "string"},
                    "model": {"type": "string"},
                    "domain": {"type": "array"}
                },
                "required": ["instance", "model"]
            },
            "op": {
                "type": "search_count",
                "map": {"instance": "/instance", "model": "/model", "domain": "/domain"}
            }
        },
        {
            "name": "odoo_search",
            "description": "Search records",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance": {"type": "string"},
                    "model": {"type": "string"},
                    "domain": {"type": "array"}
                },
                "required": ["instance", "model"]
            },
            "op": {
                "type": "search",
                "map": {"instance": "/instance", "model": "/model", "domain": "/domain"}
            }
        },
        {
            "name": "odoo_get_model_metadata",
            "description": "Model metadata",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance": {"type": "string"},
                    "model": {"type": "string"}
                },
                "required": ["instance", "model"]
            },
            "op": {
                "type": "get_model_metadata",
                "map": {"instance": "/instance", "model": "/model"}
            }
        },
        {
            "name": "odoo_create",
            "description": "Create a record",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance": {"type": "string"},
                    "model": {"type": "string"},
                    "values": {"type": "object"}
                },
                "required": ["instance", "model", "values"]
            },
            "op": {
                "type": "create",
                "map": {"instance": "/instance", "model": "/model", "values": "/values"}
            },
            "guards": {"requiresEnvTrue": "ODOO_ENABLE_WRITE_TOOLS"}
        }
    ]})
}

/// Mock Odoo server over wiremock, covering both wire protocols.
pub struct MockOdooServer {
    pub server: MockServer,
}

impl MockOdooServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Requests seen so far.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.unwrap_or_default().len()
    }

    fn json2_path(model: &str, method_name: &str) -> String {
        format!(r"/json/2/test_db/{}/{}", model.replace('.', r"\."), method_name)
    }

    /// Mock one modern JSON-2 method with a fixed response.
    pub async fn mock_json2(&self, model: &str, method_name: &str, response: Value) {
        Mock::given(method("POST"))
            .and(path_regex(Self::json2_path(model, method_name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(&self.server)
            .await;
    }

    /// Mock one modern JSON-2 method with an error status.
    pub async fn mock_json2_error(&self, model: &str, method_name: &str, status: u16, msg: &str) {
        Mock::given(method("POST"))
            .and(path_regex(Self::json2_path(model, method_name)))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "name": "odoo.exceptions.UserError",
                "message": msg,
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock the legacy /jsonrpc endpoint with a sequence of result bodies,
    /// served in order; later calls repeat the last entry.
    pub async fn mock_jsonrpc_sequence(&self, results: Vec<Value>) {
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .respond_with(SequenceResponder::new(
                results
                    .into_iter()
                    .map(|body| ResponseTemplate::new(200).set_body_json(body))
                    .collect(),
            ))
            .mount(&self.server)
            .await;
    }
}

/// Serves a fixed sequence of responses, then repeats the final one.
pub struct SequenceResponder {
    queue: Mutex<VecDeque<ResponseTemplate>>,
    last: ResponseTemplate,
}

impl SequenceResponder {
    pub fn new(mut templates: Vec<ResponseTemplate>) -> Self {
        let last = templates
            .last()
            .cloned()
            .unwrap_or_else(|| ResponseTemplate::new(500));
        Self {
            queue: Mutex::new(templates.drain(..).collect()),
            last,
        }
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.clone())
    }
}

/// JSON-RPC result envelope for legacy mocks.
pub fn rpc_result(result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "result": result})
}

/// JSON-RPC error envelope for legacy mocks.
pub fn rpc_error(name: &str, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {
            "code": 200,
            "message": "Odoo Server Error",
            "data": {"name": name, "message": message}
        }
    })
}

/// Extract the JSON payload from an MCP text-content result.
pub fn content_json(result: &Value) -> Value {
    let text = result["content"][0]["text"].as_str().expect("text content");
    serde_json::from_str(text).expect("content is JSON")
}
