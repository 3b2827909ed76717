use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use super::auth::{McpAuthState, UiAuthState};
use crate::context::AppContext;
use crate::odoo::instance::InstanceDescriptor;
use crate::registry;

#[derive(Clone)]
pub struct ConfigApiState {
    ctx: AppContext,
    ui_auth: UiAuthState,
    mcp_auth: McpAuthState,
    instances_path: PathBuf,
}

impl ConfigApiState {
    pub fn new(
        ctx: AppContext,
        ui_auth: UiAuthState,
        mcp_auth: McpAuthState,
        config_dir: &Path,
    ) -> Self {
        let instances_path = ctx
            .store
            .source_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir.join("instances.json"));
        Self {
            ctx,
            ui_auth,
            mcp_auth,
            instances_path,
        }
    }
}

/// The configuration surface: a separate HTTP server sharing the registry
/// and instance store with the MCP transports.
pub async fn serve(
    port: u16,
    state: ConfigApiState,
    static_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "config server listening");
    axum::serve(listener, router(state, static_dir)).await?;
    Ok(())
}

pub fn router(state: ConfigApiState, static_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/login", post(auth_login))
        .route("/api/auth/logout", post(auth_logout))
        .route("/api/auth/change-password", post(auth_change_password))
        .route("/api/auth/mcp-auth-status", get(mcp_auth_status))
        .route("/api/auth/mcp-auth-enabled", post(mcp_auth_enabled))
        .route("/api/auth/generate-mcp-token", post(generate_mcp_token))
        .route("/api/config/instances", get(get_instances).post(update_instances))
        .route("/api/config/tools", get(get_tools).post(update_tools))
        .route("/api/config/prompts", get(get_prompts).post(update_prompts))
        .route("/api/config/server", get(get_server).post(update_server));

    if let Some(dir) = static_dir {
        if dir.is_dir() {
            app = app.fallback_service(ServeDir::new(dir));
        } else {
            warn!(dir = %dir.display(), "static UI directory not found; serving API only");
        }
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

async fn health(State(state): State<ConfigApiState>) -> impl IntoResponse {
    let snapshot = state.ctx.registry.snapshot().await;
    Json(json!({
        "service": format!("{}-config", snapshot.server.server_name()),
        "status": "ok",
    }))
}

// ---------------------------------------------------------------------------
// auth endpoints

fn forbidden() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication required"})),
    )
        .into_response()
}

async fn auth_status(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authenticated = state.ui_auth.enabled() && state.ui_auth.is_authenticated(&headers);
    Json(json!({
        "auth_enabled": state.ui_auth.enabled(),
        "authenticated": authenticated,
        "username": state.ui_auth.username(),
    }))
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn auth_login(
    State(state): State<ConfigApiState>,
    Json(body): Json<LoginBody>,
) -> axum::response::Response {
    if !state.ui_auth.enabled() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "authentication is not configured"})),
        )
            .into_response();
    }
    match state.ui_auth.login(&body.username, &body.password) {
        Some(token) => Json(json!({"token": token})).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid credentials"})),
        )
            .into_response(),
    }
}

async fn auth_logout(State(state): State<ConfigApiState>, headers: HeaderMap) -> impl IntoResponse {
    state.ui_auth.logout(&headers);
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct ChangePasswordBody {
    new_password: String,
}

async fn auth_change_password(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordBody>,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match state.ui_auth.change_password(&body.new_password) {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn mcp_auth_status(State(state): State<ConfigApiState>) -> impl IntoResponse {
    Json(json!({
        "enabled": state.mcp_auth.enabled(),
        "token_configured": state.mcp_auth.token_configured(),
    }))
}

#[derive(Deserialize)]
struct McpAuthEnabledBody {
    enabled: bool,
}

async fn mcp_auth_enabled(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
    Json(body): Json<McpAuthEnabledBody>,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match state.mcp_auth.set_enabled(body.enabled) {
        Ok(()) => Json(json!({"status": "ok", "enabled": body.enabled})).into_response(),
        Err(e) => {
            error!(error = %e, "failed to persist MCP auth flag");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn generate_mcp_token(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match state.mcp_auth.rotate_token() {
        // Shown once; only its existence is reported afterwards.
        Ok(token) => Json(json!({"token": token})).into_response(),
        Err(e) => {
            error!(error = %e, "failed to persist MCP auth token");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// config documents

fn read_file_json(path: &Path) -> anyhow::Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Write via a temp file + rename so the hot-reload watcher never observes
/// a half-written document.
fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Restore the previous bytes after a failed save attempt.
fn restore(path: &Path, previous: Option<&str>) {
    let result = match previous {
        Some(bytes) => std::fs::write(path, bytes),
        None => match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    };
    if let Err(e) = result {
        error!(path = %path.display(), error = %e, "rollback of config file failed");
    }
}

fn save_error(err: impl std::fmt::Display) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": err.to_string(), "rollback": true})),
    )
        .into_response()
}

fn saved(warnings: Vec<String>) -> axum::response::Response {
    let mut body = json!({"status": "saved"});
    if !warnings.is_empty() {
        body["warning"] = json!(warnings.join("; "));
    }
    Json(body).into_response()
}

async fn get_tools(State(state): State<ConfigApiState>, headers: HeaderMap) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match read_file_json(state.ctx.registry.tools_path()) {
        Ok(Some(v)) => {
            let tools = v.get("tools").cloned().unwrap_or(v);
            Json(tools).into_response()
        }
        Ok(None) => Json(json!([])).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn update_tools(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }

    // Validate the candidate in full before anything touches disk.
    let tools = match registry::parse_tools(&payload) {
        Ok(tools) => tools,
        Err(e) => return save_error(e),
    };
    let warnings = registry::guard_warnings(&tools);

    let path = state.ctx.registry.tools_path().to_path_buf();
    let previous = std::fs::read_to_string(&path).ok();
    let body = match serde_json::to_string_pretty(&json!({"tools": tools})) {
        Ok(body) => body,
        Err(e) => return save_error(e),
    };
    if let Err(e) = write_atomic(&path, &body) {
        restore(&path, previous.as_deref());
        return save_error(e);
    }

    // Publish before answering, so a save-then-list sees the new snapshot.
    if let Err(e) = state.ctx.registry.reload().await {
        restore(&path, previous.as_deref());
        let _ = state.ctx.registry.reload().await;
        return save_error(e);
    }
    info!(path = %path.display(), "tools config saved");
    saved(warnings)
}

async fn get_prompts(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match read_file_json(state.ctx.registry.prompts_path()) {
        Ok(Some(v)) => {
            let prompts = v.get("prompts").cloned().unwrap_or(v);
            Json(prompts).into_response()
        }
        Ok(None) => Json(json!([])).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn update_prompts(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    let prompts = match registry::parse_prompts(&payload) {
        Ok(prompts) => prompts,
        Err(e) => return save_error(e),
    };

    let path = state.ctx.registry.prompts_path().to_path_buf();
    let previous = std::fs::read_to_string(&path).ok();
    let body = match serde_json::to_string_pretty(&json!({"prompts": prompts})) {
        Ok(body) => body,
        Err(e) => return save_error(e),
    };
    if let Err(e) = write_atomic(&path, &body) {
        restore(&path, previous.as_deref());
        return save_error(e);
    }
    if let Err(e) = state.ctx.registry.reload().await {
        restore(&path, previous.as_deref());
        let _ = state.ctx.registry.reload().await;
        return save_error(e);
    }
    info!(path = %path.display(), "prompts config saved");
    saved(Vec::new())
}

async fn get_server(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match read_file_json(state.ctx.registry.server_path()) {
        Ok(Some(v)) => Json(v).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn update_server(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    let meta = match registry::parse_server(&payload) {
        Ok(meta) => meta,
        Err(e) => return save_error(e),
    };

    let path = state.ctx.registry.server_path().to_path_buf();
    let previous = std::fs::read_to_string(&path).ok();
    let body = match serde_json::to_string_pretty(&meta) {
        Ok(body) => body,
        Err(e) => return save_error(e),
    };
    if let Err(e) = write_atomic(&path, &body) {
        restore(&path, previous.as_deref());
        return save_error(e);
    }
    if let Err(e) = state.ctx.registry.reload().await {
        restore(&path, previous.as_deref());
        let _ = state.ctx.registry.reload().await;
        return save_error(e);
    }
    info!(path = %path.display(), "server config saved");
    saved(Vec::new())
}

async fn get_instances(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    match read_file_json(&state.instances_path) {
        Ok(Some(v)) => Json(v).into_response(),
        // No file: expose the live mapping (env-configured setups).
        Ok(None) => {
            let map = state.ctx.store.snapshot();
            Json(serde_json::to_value(map.as_ref()).unwrap_or_else(|_| json!({}))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn update_instances(
    State(state): State<ConfigApiState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> axum::response::Response {
    if !state.ui_auth.is_authenticated(&headers) {
        return forbidden();
    }
    if !payload.is_object() {
        return save_error("instances config must be a JSON object");
    }
    let mut map: HashMap<String, InstanceDescriptor> = match serde_json::from_value(payload) {
        Ok(map) => map,
        Err(e) => return save_error(e),
    };
    for (name, cfg) in map.iter_mut() {
        cfg.normalize();
        if let Err(e) = cfg.validate(name) {
            return save_error(e);
        }
    }

    let path = state.instances_path.clone();
    let previous = std::fs::read_to_string(&path).ok();
    let body = match serde_json::to_string_pretty(&map) {
        Ok(body) => body,
        Err(e) => return save_error(e),
    };
    if let Err(e) = write_atomic(&path, &body) {
        restore(&path, previous.as_deref());
        return save_error(e);
    }

    // Descriptors are pre-validated, so the swap cannot fail; changed names
    // get their pooled clients and cached metadata dropped.
    match state.ctx.replace_instances(map).await {
        Ok(changed) => {
            info!(path = %path.display(), ?changed, "instances config saved");
            saved(Vec::new())
        }
        Err(e) => {
            restore(&path, previous.as_deref());
            save_error(e)
        }
    }
}
