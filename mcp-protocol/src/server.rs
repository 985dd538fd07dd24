//! JSON-RPC 2.0 over HTTP.
//!
//! A single POST endpoint multiplexes every tool family. The inner tool
//! result is the standardized envelope, serialized as a text content item
//! per the MCP wire format.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::error::McpError;
use crate::registry;
use crate::state::AppState;

/// Protocol version advertised to clients
pub const PROTOCOL_VERSION: &str = "2025-06-18";
/// Header carrying the client's protocol version
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Shared server context behind the router.
pub struct ServerContext {
    pub state: AppState,
    pub request_timeout: Duration,
}

/// The MCP server over an assembled service graph.
pub struct McpServer {
    context: Arc<ServerContext>,
}

impl McpServer {
    pub fn new(state: AppState, request_timeout: Duration) -> Self {
        Self {
            context: Arc::new(ServerContext {
                state,
                request_timeout,
            }),
        }
    }

    /// Bind and serve until shutdown.
    ///
    /// Binding and serving both fail with I/O errors; anything richer is
    /// the binary's concern.
    pub async fn serve(self, addr: &str) -> std::io::Result<()> {
        let router = self.router();
        info!(addr, "starting MCP server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await
    }

    /// Router with the RPC endpoint and the liveness probe.
    pub fn router(self) -> Router {
        Router::new()
            .route("/mcp/", post(rpc_handler))
            .route("/mcp", post(rpc_handler))
            .route("/health", get(health_handler))
            .with_state(self.context)
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn rpc_handler(
    State(context): State<Arc<ServerContext>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    let id = request.get("id").cloned();

    if let Err(err) = validate_headers(&headers) {
        return Json(err.to_json_rpc_error(id));
    }

    let method = match request.get("method").and_then(|v| v.as_str()) {
        Some(method) => method,
        None => {
            let err = McpError::Protocol(
                "Missing or invalid 'method' field in JSON-RPC request".to_string(),
            );
            return Json(err.to_json_rpc_error(id));
        }
    };
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    Json(handle_method(&context, method, params, id).await)
}

/// Accept must admit JSON or an event stream, and the protocol version
/// header must be present.
fn validate_headers(headers: &HeaderMap) -> Result<(), McpError> {
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !(accept.contains("application/json")
        || accept.contains("text/event-stream")
        || accept.contains("*/*"))
    {
        return Err(McpError::Protocol(
            "Accept header must admit application/json or text/event-stream".to_string(),
        ));
    }

    match headers.get(PROTOCOL_VERSION_HEADER) {
        Some(version) => {
            let version = version.to_str().unwrap_or("");
            if version != PROTOCOL_VERSION {
                warn!(client_version = version, "client protocol version differs");
            }
            Ok(())
        }
        None => Err(McpError::Protocol(format!(
            "Missing required header '{PROTOCOL_VERSION_HEADER}'"
        ))),
    }
}

/// Route one JSON-RPC method. Exposed for in-process test harnesses.
pub async fn handle_method(
    context: &ServerContext,
    method: &str,
    params: Value,
    id: Option<Value>,
) -> Value {
    match method {
        "initialize" => success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "lattice-mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            }),
        ),
        "ping" => success(id, json!({})),
        "tools/list" => success(id, registry::listing()),
        "tools/call" => tools_call(context, params, id).await,
        method if method.starts_with("notifications/") => success(id, json!({})),
        other => McpError::UnknownMethod(other.to_string()).to_json_rpc_error(id),
    }
}

async fn tools_call(context: &ServerContext, params: Value, id: Option<Value>) -> Value {
    let tool = match params.get("name").and_then(|v| v.as_str()) {
        Some(tool) => tool.to_string(),
        None => {
            let err = McpError::Protocol("Missing tool 'name' in tools/call".to_string());
            return err.to_json_rpc_error(id);
        }
    };
    let args: Map<String, Value> = match params.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            let err = McpError::Protocol("'arguments' must be an object".to_string());
            return err.to_json_rpc_error(id);
        }
    };

    let action = args
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or("call")
        .to_string();
    let started = std::time::Instant::now();

    // Every call runs under the configured execution budget
    let envelope = match tokio::time::timeout(
        context.request_timeout,
        registry::dispatch(&context.state, &tool, &args),
    )
    .await
    {
        Ok(Ok(envelope)) => envelope,
        Ok(Err(protocol_err)) => return protocol_err.to_json_rpc_error(id),
        Err(_elapsed) => Envelope::new(&tool, &action).failure(
            &lattice_core::LatticeError::Timeout(format!(
                "tool call exceeded the {}s execution budget",
                context.request_timeout.as_secs()
            )),
        ),
    };

    let is_error = envelope
        .get("success")
        .and_then(|v| v.as_bool())
        .map(|success| !success)
        .unwrap_or(true);
    info!(
        tool = %tool,
        action = %action,
        operation_id = %envelope["operation_id"].as_str().unwrap_or(""),
        success = !is_error,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "tool call handled"
    );

    let text = envelope.to_string();
    success(
        id,
        json!({
            "content": [ { "type": "text", "text": text } ],
            "isError": is_error,
        }),
    )
}

fn success(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}
