use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gantry_core::{Ack, Connection, CoreError, ProtocolCore, PushSink};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::catalogue::{validate_arguments, ToolCatalogue};
use crate::rpc::{self, Inbound, RpcRequest, RpcResponse};

/// MCP revision this core speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity reported in the `initialize` result.
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "gantry".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Tool-serving MCP engine. One instance serves every connection.
pub struct McpCore {
    catalogue: Arc<ToolCatalogue>,
    info: ServerInfo,
}

impl McpCore {
    pub fn new(catalogue: ToolCatalogue) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
            info: ServerInfo::default(),
        }
    }

    /// Build a connection without going through the trait object.
    pub fn connect(&self, sink: Arc<dyn PushSink>) -> McpConnection {
        McpConnection {
            sink,
            catalogue: Arc::clone(&self.catalogue),
            info: self.info.clone(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            client_name: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProtocolCore for McpCore {
    async fn establish(&self, sink: Arc<dyn PushSink>) -> Result<Arc<dyn Connection>, CoreError> {
        Ok(Arc::new(self.connect(sink)))
    }
}

/// One MCP conversation bound to a push sink.
pub struct McpConnection {
    sink: Arc<dyn PushSink>,
    catalogue: Arc<ToolCatalogue>,
    info: ServerInfo,
    initialized: AtomicBool,
    closed: AtomicBool,
    client_name: Mutex<Option<String>>,
}

impl McpConnection {
    /// Whether the client has sent `notifications/initialized`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn client_name(&self) -> Option<String> {
        self.client_name.lock().clone()
    }

    fn push(&self, response: &RpcResponse) -> Result<Ack, CoreError> {
        let json = serde_json::to_string(response)?;
        self.sink.push(json)?;
        Ok(Ack::Queued)
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => {
                self.initialized.store(true, Ordering::Release);
                info!(client = ?self.client_name(), "protocol handshake complete");
            }
            "notifications/cancelled" => debug!("client cancelled a request"),
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.unwrap_or(Value::Null);
        let params = request.params.unwrap_or_else(|| json!({}));
        match request.method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize(&params)),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => RpcResponse::success(
                id,
                json!({ "tools": self.catalogue.definitions() }),
            ),
            "tools/call" => self.call_tool(id, &params).await,
            other => RpcResponse::method_not_found(id, other),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let client = params
            .get("clientInfo")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(name) = &client {
            debug!(client = %name, "initialize");
        }
        *self.client_name.lock() = client;
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": self.info,
        })
    }

    async fn call_tool(&self, id: Value, params: &Value) -> RpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return RpcResponse::invalid_params(id, "Missing required parameter: name");
        };
        let Some(tool) = self.catalogue.get(name) else {
            return RpcResponse::invalid_params(id, format!("Unknown tool: {name}"));
        };
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let outcome = match validate_arguments(&tool.input_schema(), &args) {
            Ok(()) => tool.call(args).await,
            Err(e) => Err(e),
        };
        let result = match outcome {
            Ok(value) => tool_result(&value, false),
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                tool_result(&Value::String(e.to_string()), true)
            }
        };
        RpcResponse::success(id, result)
    }
}

/// Wrap a tool's output as an MCP text content block.
fn tool_result(value: &Value, is_error: bool) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

#[async_trait]
impl Connection for McpConnection {
    async fn handle_inbound(&self, raw: &str) -> Result<Ack, CoreError> {
        if self.is_closed() {
            return Err(CoreError::Closed);
        }
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return self.push(&RpcResponse::parse_error());
        };
        match rpc::classify(value) {
            Inbound::Response => Ok(Ack::Accepted),
            Inbound::Invalid { id } => self.push(&RpcResponse::invalid_request(id)),
            Inbound::Request(request) if request.is_notification() => {
                self.handle_notification(&request.method);
                Ok(Ack::Accepted)
            }
            Inbound::Request(request) => {
                let response = self.dispatch(request).await;
                self.push(&response)
            }
        }
    }

    fn close(&self) -> Result<(), CoreError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(client = ?self.client_name(), "connection closed");
        }
        Ok(())
    }
}
