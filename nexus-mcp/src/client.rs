//! MCP client: handshake, tool listing, and tool calls against one external
//! server over any [`Transport`].

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, IncomingKind, InitializeParams, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, McpTool, RequestId, ServerInfo, classify,
};
use crate::transport::Transport;

/// Upper bound on `tools/list` pages followed for one server.
const MAX_TOOL_PAGES: usize = 32;

/// MCP client state for a single server connection.
pub struct McpClient {
    initialized: bool,
    server_info: Option<ServerInfo>,
    available_tools: Vec<McpTool>,
    next_id: AtomicI64,
    handshake_timeout: Option<Duration>,
}

impl McpClient {
    pub fn new() -> Self {
        Self {
            initialized: false,
            server_info: None,
            available_tools: Vec::new(),
            next_id: AtomicI64::new(1),
            handshake_timeout: None,
        }
    }

    /// Bound every read during `initialize` and `tools/list`. Tool calls are
    /// never bounded here; the caller owns their lifetime.
    pub fn with_handshake_timeout(mut self, limit: Option<Duration>) -> Self {
        self.handshake_timeout = limit;
        self
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn available_tools(&self) -> &[McpTool] {
        &self.available_tools
    }

    /// Perform the initialization handshake and send `notifications/initialized`.
    pub async fn initialize<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<ServerInfo, McpError> {
        let params = serde_json::to_value(InitializeParams::for_client(env!("CARGO_PKG_VERSION")))?;
        let result = self
            .request(transport, "initialize", params, self.handshake_timeout)
            .await?;
        let server_info = ServerInfo::from_initialize_result(&result);

        info!(
            server = %server_info.name,
            version = %server_info.version,
            protocol = %server_info.protocol_version,
            "MCP client initialized"
        );

        send(transport, &JsonRpcNotification::new("notifications/initialized")).await?;
        self.server_info = Some(server_info.clone());
        self.initialized = true;
        Ok(server_info)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn discover_tools<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<Vec<McpTool>, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self
                .request(transport, "tools/list", params, self.handshake_timeout)
                .await?;
            let page = result["tools"]
                .as_array()
                .ok_or_else(|| McpError::InternalError {
                    message: "tools/list result has no tools array".into(),
                })?;
            tools.extend(page.iter().filter_map(|raw| {
                serde_json::from_value::<McpTool>(raw.clone())
                    .inspect_err(|e| warn!(error = %e, "Skipping malformed tool entry"))
                    .ok()
            }));

            cursor = result["nextCursor"].as_str().map(String::from);
            if cursor.is_none() {
                break;
            }
        }
        if cursor.is_some() {
            warn!(pages = MAX_TOOL_PAGES, "Stopped following tools/list pagination");
        }

        debug!(count = tools.len(), "Discovered tools from MCP server");
        self.available_tools = tools.clone();
        Ok(tools)
    }

    /// Call a tool. JSON-RPC level failures become [`McpError::ToolError`];
    /// tool-level failures come back as a result with `is_error` set.
    pub async fn call_tool<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_string(),
            arguments: Some(arguments),
        })?;
        let result = self
            .request(transport, "tools/call", params, None)
            .await
            .map_err(|e| match e {
                McpError::ServerError { code, message } => McpError::ToolError {
                    message: format!("Tool '{tool_name}' failed: {message} (code {code})"),
                },
                other => other,
            })?;

        serde_json::from_value(result).map_err(|e| McpError::ParseError {
            message: format!("Invalid tools/call result from '{tool_name}': {e}"),
        })
    }

    /// Send a request and wait for its response.
    async fn request<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        method: &str,
        params: Value,
        read_timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = self.next_id();
        send(transport, &JsonRpcRequest::new(id.clone(), method, params)).await?;

        let response = self.read_response(transport, &id, method, read_timeout).await?;
        if let Some(error) = response.error {
            return Err(McpError::ServerError {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or_else(|| McpError::InternalError {
            message: format!("{method} response has no result"),
        })
    }

    /// Read until the response carrying `id` arrives, skipping server
    /// notifications and server-initiated requests.
    async fn read_response<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        id: &RequestId,
        method: &str,
        read_timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, McpError> {
        loop {
            let raw = match read_timeout {
                Some(limit) => tokio::time::timeout(limit, transport.read_message())
                    .await
                    .map_err(|_| McpError::Timeout {
                        operation: method.to_string(),
                        secs: limit.as_secs(),
                    })??,
                None => transport.read_message().await?,
            }
            .ok_or_else(|| McpError::TransportError {
                message: format!("Transport closed while waiting for {method} response"),
            })?;

            let value: Value = serde_json::from_str(&raw).map_err(|e| McpError::ParseError {
                message: format!("Invalid JSON-RPC message: {e}"),
            })?;
            if let IncomingKind::ServerMessage { method: incoming } = classify(&value) {
                debug!(method = %incoming, "Skipping server-initiated message");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(|e| McpError::ParseError {
                    message: format!("Invalid JSON-RPC response: {e}"),
                })?;
            if &response.id != id {
                warn!(expected = %id, received = %response.id, "Discarding unmatched response");
                continue;
            }
            if let Some(ref error) = response.error {
                warn!(
                    code = error.code,
                    message = %error.message,
                    method,
                    "MCP server returned error"
                );
            }
            return Ok(response);
        }
    }
}

impl Default for McpClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn send<T: Transport + ?Sized, M: Serialize>(
    transport: &mut T,
    message: &M,
) -> Result<(), McpError> {
    transport
        .write_message(&serde_json::to_string(message)?)
        .await
}
