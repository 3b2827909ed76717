//! Bearer-token gate on the MCP network transports. Lives in its own test
//! binary because it sets the process-wide auth env vars.

mod common;

use std::sync::Arc;

use axum_test::TestServer;
use common::{MockOdooServer, modern_context, test_tools};
use odoo_mcp_bridge::config_api::{AuthStore, McpAuthState};
use odoo_mcp_bridge::mcp::{McpBridgeHandler, http};
use serde_json::{Value, json};
use tempfile::TempDir;

#[tokio::test]
async fn gate_protects_transports_but_not_public_endpoints() {
    unsafe {
        std::env::set_var("MCP_AUTH_ENABLED", "true");
        std::env::set_var("MCP_AUTH_TOKEN", "sekrit");
    }

    let mock = MockOdooServer::start().await;
    let dir = TempDir::new().unwrap();
    let ctx = modern_context(dir.path(), &mock.uri(), &test_tools()).await;
    let handler = Arc::new(McpBridgeHandler::new(ctx));
    let auth = McpAuthState::from_env(AuthStore::load(None));
    let server = TestServer::new(http::router(handler, auth)).unwrap();

    // Public endpoints bypass the gate.
    server.get("/health").await.assert_status_ok();
    server.get("/openapi.json").await.assert_status_ok();

    let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});

    // No token: rejected.
    let response = server.post("/mcp").json(&request).await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    // Wrong token: rejected.
    let response = server
        .post("/mcp")
        .add_header("authorization", "Bearer wrong")
        .json(&request)
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    // Matching token: accepted.
    let response = server
        .post("/mcp")
        .add_header("authorization", "Bearer sekrit")
        .json(&request)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["result"]["tools"].is_array());

    // The legacy endpoints honor the same gate.
    let response = server.post("/messages").json(&request).await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    unsafe {
        std::env::remove_var("MCP_AUTH_ENABLED");
        std::env::remove_var("MCP_AUTH_TOKEN");
    }
}
