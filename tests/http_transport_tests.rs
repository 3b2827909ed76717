//! Streamable-HTTP transport tests: session lifecycle, public endpoints,
//! and JSON-RPC envelope handling over POST /mcp.

mod common;

use std::sync::Arc;

use axum_test::TestServer;
use common::{MockOdooServer, modern_context, test_tools};
use odoo_mcp_bridge::config_api::{AuthStore, McpAuthState};
use odoo_mcp_bridge::mcp::{McpBridgeHandler, http};
use serde_json::{Value, json};
use tempfile::TempDir;

async fn test_server() -> (MockOdooServer, TempDir, TestServer) {
    let mock = MockOdooServer::start().await;
    let dir = TempDir::new().unwrap();
    let ctx = modern_context(dir.path(), &mock.uri(), &test_tools()).await;
    let handler = Arc::new(McpBridgeHandler::new(ctx));
    let auth = McpAuthState::from_env(AuthStore::load(None));
    let server = TestServer::new(http::router(handler, auth)).unwrap();
    (mock, dir, server)
}

#[tokio::test]
async fn health_endpoint_reports_service_and_status() {
    let (_mock, _dir, server) = test_server().await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "test-bridge");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (_mock, _dir, server) = test_server().await;
    let response = server.get("/openapi.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["openapi"], "3.1.0");
    assert!(body["paths"]["/mcp"].is_object());
}

#[tokio::test]
async fn initialize_mints_a_session_header() {
    let (_mock, _dir, server) = test_server().await;
    let response = server
        .post("/mcp")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await;
    response.assert_status_ok();

    let session = response.header("mcp-session-id");
    assert!(!session.to_str().unwrap().is_empty());

    let body: Value = response.json();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert!(body["result"]["capabilities"].is_object());
}

#[tokio::test]
async fn tools_list_over_http() {
    let (_mock, _dir, server) = test_server().await;
    let response = server
        .post("/mcp")
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(
        body["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["name"] == "odoo_count")
    );
}

#[tokio::test]
async fn request_and_response_ids_match_in_order() {
    let (mock, _dir, server) = test_server().await;
    mock.mock_json2("res.partner", "search_count", json!(5)).await;

    for id in [10, 11, 12] {
        let response = server
            .post("/mcp")
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": {"name": "odoo_count", "arguments": {"instance": "default", "model": "res.partner"}}
            }))
            .await;
        let body: Value = response.json();
        assert_eq!(body["id"], id);
    }
}

#[tokio::test]
async fn notification_returns_accepted_without_body() {
    let (_mock, _dir, server) = test_server().await;
    let response = server
        .post("/mcp")
        .json(&json!({"jsonrpc": "2.0", "method": "initialized"}))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn invalid_envelope_is_bad_request_with_code() {
    let (_mock, _dir, server) = test_server().await;
    let response = server.post("/mcp").json(&json!({"no": "method"})).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_method_is_rpc_error_not_http_error() {
    let (_mock, _dir, server) = test_server().await;
    let response = server
        .post("/mcp")
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "does/not/exist"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn odoo_error_surfaces_as_is_error_content() {
    let (mock, _dir, server) = test_server().await;
    mock.mock_json2_error("res.partner", "search_count", 401, "Unauthorized").await;

    let response = server
        .post("/mcp")
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "odoo_count", "arguments": {"instance": "default", "model": "res.partner"}}
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();

    // The tool was resolved and ran: its failure is isError content with
    // the taxonomy details, not a top-level JSON-RPC error.
    assert!(body.get("error").is_none());
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("-32001"));
    assert!(text.contains("odoo_count"));
}

#[tokio::test]
async fn delete_terminates_a_session() {
    let (_mock, _dir, server) = test_server().await;
    let init = server
        .post("/mcp")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await;
    let session = init.header("mcp-session-id").to_str().unwrap().to_string();

    let response = server
        .delete("/mcp")
        .add_header("mcp-session-id", &session)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "terminated");
}

#[tokio::test]
async fn delete_without_session_header_is_bad_request() {
    let (_mock, _dir, server) = test_server().await;
    let response = server.delete("/mcp").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}
