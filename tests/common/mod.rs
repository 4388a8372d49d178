#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

/// Answers the MCP methods a sandbox serves. `None` for notifications.
pub fn answer(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request["method"].as_str().unwrap_or_default();
    let params = &request["params"];
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "fake-sandbox", "version": "1.0.0" },
        }),
        "tools/list" => json!({
            "tools": [
                { "name": "processExecute", "description": "Execute a process", "inputSchema": { "type": "object" } },
                { "name": "fsListDirectory", "description": "List a directory", "inputSchema": { "type": "object" } },
            ]
        }),
        "tools/call" => tool_result(params),
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {}", method) },
            }));
        }
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

fn tool_result(params: &Value) -> Value {
    let arguments = &params["arguments"];
    let payload = match params["name"].as_str().unwrap_or_default() {
        "processExecute" => {
            let command = arguments["command"].as_str().unwrap_or_default();
            let cwd = arguments["workingDir"].as_str().unwrap_or_default();
            let exit_code = if command.starts_with("false") { 1 } else { 0 };
            json!({
                "pid": "42",
                "name": arguments["name"],
                "command": command,
                "status": "completed",
                "exitCode": exit_code,
                "logs": format!("ran {} in {}\n", command, cwd),
            })
        }
        "fsListDirectory" => json!({
            "path": arguments["path"],
            "name": "",
            "files": [{ "name": "notes.txt", "size": 12 }],
            "subdirectories": [{ "name": "home", "path": "/home" }],
        }),
        other => {
            return json!({
                "isError": true,
                "content": [{ "type": "text", "text": format!("unknown tool {}", other) }],
            });
        }
    };
    json!({ "content": [{ "type": "text", "text": payload.to_string() }] })
}

/// WebSocket MCP server with a `/health` endpoint.
#[derive(Default)]
pub struct WsServer {
    pub connections: AtomicUsize,
    pub health_status: AtomicU16,
    /// Hang up instead of answering `tools/call` on the first connection.
    pub drop_first_call: AtomicBool,
    /// Hang up on every `tools/call`.
    pub drop_every_call: AtomicBool,
}

impl WsServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            health_status: AtomicU16::new(200),
            ..Self::default()
        })
    }

    fn should_drop(&self, connection: usize) -> bool {
        self.drop_every_call.load(Ordering::SeqCst)
            || (connection == 1 && self.drop_first_call.load(Ordering::SeqCst))
    }
}

pub async fn start_ws_server(state: Arc<WsServer>) -> String {
    let app = Router::new()
        .route("/", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state);
    serve(app).await
}

async fn health(State(state): State<Arc<WsServer>>) -> StatusCode {
    StatusCode::from_u16(state.health_status.load(Ordering::SeqCst)).unwrap()
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<WsServer>>) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(mut socket: WebSocket, state: Arc<WsServer>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let request: Value = serde_json::from_str(text.as_str()).unwrap();
        if request["method"] == "tools/call" && state.should_drop(connection) {
            return;
        }
        if let Some(reply) = answer(&request) {
            if socket
                .send(WsMessage::Text(reply.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

/// Streamable HTTP MCP server on `/mcp`.
#[derive(Default)]
pub struct HttpServer {
    pub sessions: AtomicUsize,
    pub current: Mutex<Option<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub api_keys: Mutex<Vec<String>>,
    /// Forget the current session before the next request that carries one.
    pub expire_session: AtomicBool,
}

impl HttpServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub async fn start_http_server(state: Arc<HttpServer>) -> String {
    let app = Router::new()
        .route("/", get(|| async { "MCP streamable HTTP endpoint" }))
        .route("/mcp", axum::routing::post(http_mcp).delete(http_delete))
        .with_state(state);
    serve(app).await
}

async fn http_mcp(
    State(state): State<Arc<HttpServer>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: Value = serde_json::from_str(&body).unwrap();
    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(key) = headers.get("x-blaxel-api-key").and_then(|v| v.to_str().ok()) {
        state.api_keys.lock().unwrap().push(key.to_string());
    }

    if request["method"] == "initialize" {
        let id = format!("session-{}", state.sessions.fetch_add(1, Ordering::SeqCst) + 1);
        *state.current.lock().unwrap() = Some(id.clone());
        let reply = answer(&request).unwrap();
        return (
            [
                (header::CONTENT_TYPE, "application/json".to_string()),
                (header::HeaderName::from_static("mcp-session-id"), id),
            ],
            reply.to_string(),
        )
            .into_response();
    }

    let Some(session) = session else {
        return (StatusCode::BAD_REQUEST, "missing session").into_response();
    };
    if state.expire_session.swap(false, Ordering::SeqCst) {
        *state.current.lock().unwrap() = None;
    }
    if state.current.lock().unwrap().as_deref() != Some(session.as_str()) {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    }

    match answer(&request) {
        None => StatusCode::ACCEPTED.into_response(),
        Some(reply) if request["method"] == "tools/call" => (
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("event: message\ndata: {}\n\n", reply),
        )
            .into_response(),
        Some(reply) => (
            [(header::CONTENT_TYPE, "application/json")],
            reply.to_string(),
        )
            .into_response(),
    }
}

async fn http_delete(State(state): State<Arc<HttpServer>>, headers: HeaderMap) -> StatusCode {
    if let Some(id) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) {
        state.deleted.lock().unwrap().push(id.to_string());
    }
    StatusCode::OK
}
