//! Cleanup operations: guard gating and dry-run write suppression.

mod common;

use std::sync::Mutex;

use common::{MockOdooServer, content_json, modern_context};
use odoo_mcp_bridge::dispatch::call_tool;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, ResponseTemplate};

// These tests flip the shared guard env var; serialize them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn cleanup_tools() -> serde_json::Value {
    json!({"tools": [
        {
            "name": "odoo_database_cleanup",
            "description": "Cleanup",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance": {"type": "string"},
                    "dryRun": {"type": "boolean"}
                },
                "required": ["instance"]
            },
            "op": {
                "type": "database_cleanup",
                "map": {"instance": "/instance", "dryRun": "/dryRun"}
            },
            "guards": {"requiresEnvTrue": "ODOO_ENABLE_CLEANUP_TOOLS"}
        },
        {
            "name": "odoo_deep_cleanup",
            "description": "Deep cleanup",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance": {"type": "string"},
                    "dryRun": {"type": "boolean"}
                },
                "required": ["instance"]
            },
            "op": {
                "type": "deep_cleanup",
                "map": {"instance": "/instance", "dryRun": "/dryRun"}
            },
            "guards": {"requiresEnvTrue": "ODOO_ENABLE_CLEANUP_TOOLS"}
        }
    ]})
}

async fn mock_sweeps(mock: &MockOdooServer) {
    // Every swept model reports two matching records.
    Mock::given(method("POST"))
        .and(path_regex(r"/json/2/test_db/.*/search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&mock.server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"/json/2/test_db/.*/unlink$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&mock.server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"/json/2/test_db/.*/write$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&mock.server)
        .await;
}

#[tokio::test]
async fn cleanup_disabled_without_guard_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe { std::env::remove_var("ODOO_ENABLE_CLEANUP_TOOLS") }

    let mock = MockOdooServer::start().await;
    let dir = TempDir::new().unwrap();
    let ctx = modern_context(dir.path(), &mock.uri(), &cleanup_tools()).await;
    let snapshot = ctx.registry.snapshot().await;

    // The registry already hides the tool; the handler refuses even a direct
    // dispatch of the loaded definition.
    assert!(snapshot.visible_tool("odoo_database_cleanup").is_none());
    let tool = snapshot
        .tools
        .iter()
        .find(|t| t.name == "odoo_database_cleanup")
        .unwrap();
    let err = call_tool(&ctx, tool, json!({"instance": "default"})).await.unwrap_err();
    assert_eq!(err.code(), -32003);
}

#[tokio::test]
async fn dry_run_is_the_default_and_suppresses_writes() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe { std::env::set_var("ODOO_ENABLE_CLEANUP_TOOLS", "true") }

    let mock = MockOdooServer::start().await;
    mock_sweeps(&mock).await;

    let dir = TempDir::new().unwrap();
    let ctx = modern_context(dir.path(), &mock.uri(), &cleanup_tools()).await;
    let snapshot = ctx.registry.snapshot().await;
    let tool = snapshot.visible_tool("odoo_database_cleanup").unwrap();

    // dryRun left unset: must default to true.
    let result = call_tool(&ctx, tool, json!({"instance": "default"})).await.unwrap();
    let report = content_json(&result);
    assert_eq!(report["dry_run"], true);
    assert!(report["removed"].as_i64().unwrap() > 0);

    let requests = mock.server.received_requests().await.unwrap();
    assert!(
        requests.iter().all(|r| !r.url.path().ends_with("/unlink")),
        "dry run must not issue unlink calls"
    );

    unsafe { std::env::remove_var("ODOO_ENABLE_CLEANUP_TOOLS") }
}

#[tokio::test]
async fn explicit_wet_run_issues_deletes() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe { std::env::set_var("ODOO_ENABLE_CLEANUP_TOOLS", "true") }

    let mock = MockOdooServer::start().await;
    mock_sweeps(&mock).await;

    let dir = TempDir::new().unwrap();
    let ctx = modern_context(dir.path(), &mock.uri(), &cleanup_tools()).await;
    let snapshot = ctx.registry.snapshot().await;
    let tool = snapshot.visible_tool("odoo_database_cleanup").unwrap();

    let result = call_tool(&ctx, tool, json!({"instance": "default", "dryRun": false}))
        .await
        .unwrap();
    let report = content_json(&result);
    assert_eq!(report["dry_run"], false);

    let requests = mock.server.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.url.path().ends_with("/unlink")));

    unsafe { std::env::remove_var("ODOO_ENABLE_CLEANUP_TOOLS") }
}

#[tokio::test]
async fn deep_cleanup_dry_run_reports_retained_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe { std::env::set_var("ODOO_ENABLE_CLEANUP_TOOLS", "true") }

    let mock = MockOdooServer::start().await;
    mock_sweeps(&mock).await;

    let dir = TempDir::new().unwrap();
    let ctx = modern_context(dir.path(), &mock.uri(), &cleanup_tools()).await;
    let snapshot = ctx.registry.snapshot().await;
    let tool = snapshot.visible_tool("odoo_deep_cleanup").unwrap();

    let result = call_tool(&ctx, tool, json!({"instance": "default"})).await.unwrap();
    let report = content_json(&result);
    assert_eq!(report["dry_run"], true);
    let retained: Vec<String> = report["retained"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(retained.iter().any(|r| r.contains("user accounts")));

    unsafe { std::env::remove_var("ODOO_ENABLE_CLEANUP_TOOLS") }
}
