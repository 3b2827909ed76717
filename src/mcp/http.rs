use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::{StreamExt, iter};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};
use uuid::Uuid;

use super::{McpBridgeHandler, allowed_before_initialized, protocol};
use crate::config_api::auth::McpAuthState;
use crate::error::RpcError;

static MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");

const SSE_CHANNEL_CAPACITY: usize = 256;
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct HttpState {
    handler: Arc<McpBridgeHandler>,
    /// session id → initialized flag
    sessions: Arc<Mutex<HashMap<String, bool>>>,
    /// session id → server→client stream
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>,
    auth: McpAuthState,
}

pub async fn serve(
    handler: Arc<McpBridgeHandler>,
    listen: &str,
    auth: McpAuthState,
) -> anyhow::Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "MCP server listening (http)");
    axum::serve(listener, router(handler, auth)).await?;
    Ok(())
}

/// All MCP network transports on one router: streamable HTTP (`/mcp`),
/// legacy SSE (`/sse` + `/messages`), WebSocket (`/ws`), plus the public
/// health and OpenAPI endpoints which always bypass the bearer gate.
pub fn router(handler: Arc<McpBridgeHandler>, auth: McpAuthState) -> Router {
    let state = HttpState {
        handler,
        sessions: Arc::new(Mutex::new(HashMap::new())),
        channels: Arc::new(Mutex::new(HashMap::new())),
        auth,
    };

    Router::new()
        .route("/mcp", post(mcp_post).get(mcp_get).delete(mcp_delete))
        .route("/sse", get(legacy_sse))
        .route("/messages", post(legacy_messages))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/openapi.json", get(openapi))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    match std::env::var("MCP_ALLOWED_ORIGINS") {
        Ok(origins) if !origins.trim().is_empty() && origins.trim() != "*" => {
            let list: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(list)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::permissive(),
    }
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    Json(json!({
        "service": state.handler.server_name().await,
        "status": "ok",
    }))
}

async fn openapi(State(state): State<HttpState>) -> impl IntoResponse {
    let name = state.handler.server_name().await;
    Json(json!({
        "openapi": "3.1.0",
        "info": {
            "title": name,
            "version": env!("CARGO_PKG_VERSION"),
            "description": "MCP bridge to Odoo ERP instances. JSON-RPC 2.0 over streamable HTTP, SSE or WebSocket.",
        },
        "paths": {
            "/mcp": {
                "post": { "summary": "Submit a JSON-RPC message (streamable HTTP)" },
                "get": { "summary": "Server-to-client SSE stream for a session" },
                "delete": { "summary": "Terminate a session" }
            },
            "/sse": { "get": { "summary": "Legacy SSE stream" } },
            "/messages": { "post": { "summary": "Legacy request endpoint, paired with /sse" } },
            "/ws": { "get": { "summary": "WebSocket transport" } },
            "/health": { "get": { "summary": "Health probe" } }
        }
    }))
}

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "missing or invalid bearer token"})),
    )
        .into_response()
}

/// Outcome of one processed JSON-RPC message.
struct Processed {
    new_session: Option<String>,
    response: Option<Value>,
    status: StatusCode,
}

async fn process_message(state: &HttpState, session: Option<String>, body: Value) -> Processed {
    let request = match protocol::parse_request_value(body) {
        Ok(req) => req,
        Err(err) => {
            return Processed {
                new_session: None,
                response: Some(protocol::error_response(None, &err)),
                status: StatusCode::BAD_REQUEST,
            };
        }
    };

    if request.method == "initialize" {
        let Some(id) = request.id.clone() else {
            return Processed {
                new_session: None,
                response: Some(protocol::error_response(
                    None,
                    &RpcError::InvalidRequest("initialize requires an id".to_string()),
                )),
                status: StatusCode::BAD_REQUEST,
            };
        };
        let params = request.params.unwrap_or_else(|| json!({}));
        let result = state.handler.initialize_result(&params).await;

        let session_id = Uuid::new_v4().to_string();
        state.sessions.lock().await.insert(session_id.clone(), true);
        state
            .channels
            .lock()
            .await
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(SSE_CHANNEL_CAPACITY).0);

        return Processed {
            new_session: Some(session_id),
            response: Some(protocol::success_response(id, result)),
            status: StatusCode::OK,
        };
    }

    if request.is_notification() {
        match request.method.as_str() {
            "initialized" | "notifications/initialized" => {
                if let Some(session) = &session
                    && let Some(flag) = state.sessions.lock().await.get_mut(session)
                {
                    *flag = true;
                }
            }
            other => debug!(method = other, "ignoring notification"),
        }
        return Processed {
            new_session: None,
            response: None,
            status: StatusCode::ACCEPTED,
        };
    }

    let id = request.id.clone();
    if let Some(session) = &session
        && let Some(initialized) = state.sessions.lock().await.get(session).copied()
        && !initialized
        && !allowed_before_initialized(&request.method)
    {
        return Processed {
            new_session: None,
            response: Some(protocol::error_response(
                id,
                &RpcError::InvalidRequest("server not initialized".to_string()),
            )),
            status: StatusCode::OK,
        };
    }

    let response = match state.handler.handle(&request.method, request.params).await {
        Ok(result) => {
            let Some(id) = id else {
                return Processed {
                    new_session: None,
                    response: None,
                    status: StatusCode::ACCEPTED,
                };
            };
            protocol::success_response(id, result)
        }
        Err(err) => protocol::error_response(id, &err),
    };
    Processed {
        new_session: None,
        response: Some(response),
        status: StatusCode::OK,
    }
}

async fn mcp_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if !state.auth.allows(&headers) {
        return unauthorized();
    }
    let session = headers
        .get(&MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let processed = process_message(&state, session, body).await;

    let mut out_headers = HeaderMap::new();
    if let Some(session_id) = &processed.new_session
        && let Ok(value) = HeaderValue::from_str(session_id)
    {
        out_headers.insert(&MCP_SESSION_ID, value);
    }

    match processed.response {
        Some(v) => (processed.status, out_headers, Json(v)).into_response(),
        None => (processed.status, out_headers).into_response(),
    }
}

async fn mcp_get(State(state): State<HttpState>, headers: HeaderMap) -> axum::response::Response {
    if !state.auth.allows(&headers) {
        return unauthorized();
    }
    let session = headers
        .get(&MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();

    let tx = {
        let mut channels = state.channels.lock().await;
        channels
            .entry(session)
            .or_insert_with(|| broadcast::channel(SSE_CHANNEL_CAPACITY).0)
            .clone()
    };

    let keepalive = IntervalStream::new(tokio::time::interval(SSE_KEEPALIVE))
        .map(|_| Ok::<Event, Infallible>(Event::default().comment("keepalive")));
    let messages = BroadcastStream::new(tx.subscribe()).filter_map(|msg| match msg {
        Ok(v) => Some(Ok(Event::default().event("message").data(v.to_string()))),
        Err(_) => None,
    });

    Sse::new(keepalive.merge(messages))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn mcp_delete(State(state): State<HttpState>, headers: HeaderMap) -> axum::response::Response {
    if !state.auth.allows(&headers) {
        return unauthorized();
    }
    let Some(session) = headers
        .get(&MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing Mcp-Session-Id header"})),
        )
            .into_response();
    };

    state.sessions.lock().await.remove(&session);
    state.channels.lock().await.remove(&session);
    Json(json!({"status": "terminated"})).into_response()
}

#[derive(Deserialize)]
struct LegacyQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn legacy_sse(State(state): State<HttpState>, headers: HeaderMap) -> axum::response::Response {
    if !state.auth.allows(&headers) {
        return unauthorized();
    }
    let session_id = Uuid::new_v4().to_string();
    let tx = {
        let mut channels = state.channels.lock().await;
        channels
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(SSE_CHANNEL_CAPACITY).0)
            .clone()
    };

    // First event tells the client where to POST requests.
    let endpoint = iter(vec![Ok::<Event, Infallible>(
        Event::default()
            .event("endpoint")
            .data(format!("/messages?sessionId={session_id}")),
    )]);
    let messages = BroadcastStream::new(tx.subscribe()).filter_map(|msg| match msg {
        Ok(v) => Some(Ok(Event::default().event("message").data(v.to_string()))),
        Err(_) => None,
    });

    Sse::new(endpoint.chain(messages))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn legacy_messages(
    State(state): State<HttpState>,
    Query(query): Query<LegacyQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if !state.auth.allows(&headers) {
        return unauthorized();
    }
    let session = query.session_id.or_else(|| {
        headers
            .get(&MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    // Legacy transport: the response travels on the SSE stream, not in the
    // HTTP response body.
    let processed = process_message(&state, session.clone(), body).await;
    if processed.status == StatusCode::BAD_REQUEST {
        return StatusCode::BAD_REQUEST.into_response();
    }

    if let (Some(session), Some(response)) = (session, processed.response)
        && let Some(tx) = state.channels.lock().await.get(&session).cloned()
    {
        let _ = tx.send(response);
    }
    StatusCode::ACCEPTED.into_response()
}

async fn ws_upgrade(
    State(state): State<HttpState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    if !state.auth.allows(&headers) {
        return unauthorized();
    }
    ws.on_upgrade(move |socket| ws_loop(state, socket))
}

/// One JSON-RPC object per text frame; responses are written back in the
/// order requests arrived on the socket.
async fn ws_loop(state: HttpState, mut socket: WebSocket) {
    let mut initialized = false;

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let request = match protocol::parse_request(text.as_str()) {
            Ok(req) => req,
            Err(err) => {
                let body = protocol::error_response(None, &err).to_string();
                if socket.send(WsMessage::Text(body.into())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if request.is_notification() {
            match request.method.as_str() {
                "initialized" | "notifications/initialized" => initialized = true,
                "exit" => break,
                _ => {}
            }
            continue;
        }
        let Some(id) = request.id.clone() else {
            continue;
        };

        let response = if request.method == "initialize" {
            initialized = true;
            let params = request.params.unwrap_or_else(|| json!({}));
            protocol::success_response(id, state.handler.initialize_result(&params).await)
        } else if !initialized && !allowed_before_initialized(&request.method) {
            protocol::error_response(
                Some(id),
                &RpcError::InvalidRequest("server not initialized".to_string()),
            )
        } else {
            match state.handler.handle(&request.method, request.params).await {
                Ok(result) => protocol::success_response(id, result),
                Err(err) => protocol::error_response(Some(id), &err),
            }
        };

        if socket
            .send(WsMessage::Text(response.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}
