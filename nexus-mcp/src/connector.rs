//! The production [`SessionConnector`]: opens MCP connections to every
//! resolved server and exposes their tools as [`AgentTool`]s.

use async_trait::async_trait;
use nexus_core::config::{GatewayConfig, ServerTransport, ToolServerConfig};
use nexus_core::gateway::{ConnectStrategy, SessionConnector, ToolSession};
use nexus_core::tools::{AgentTool, ToolInvoker};
use nexus_core::GatewayError;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::McpClient;
use crate::error::McpError;
use crate::transport::{ProcessTransport, SseTransport, ThreadedProcessTransport, Transport};

/// Opens the raw transport for one server.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        server: &ToolServerConfig,
        strategy: ConnectStrategy,
    ) -> Result<Box<dyn Transport>, McpError>;
}

/// Spawns stdio servers as child processes and dials SSE servers over HTTP.
///
/// The alternate strategy spawns stdio servers with blocking pump threads
/// instead of async pipes. SSE is the same under both strategies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransports;

#[async_trait]
impl TransportFactory for SystemTransports {
    async fn open(
        &self,
        server: &ToolServerConfig,
        strategy: ConnectStrategy,
    ) -> Result<Box<dyn Transport>, McpError> {
        match (&server.transport, strategy) {
            (ServerTransport::Stdio { command, args, env }, ConnectStrategy::Primary) => {
                Ok(Box::new(ProcessTransport::spawn(command, args, env)?))
            }
            (ServerTransport::Stdio { command, args, env }, ConnectStrategy::Alternate) => {
                Ok(Box::new(ThreadedProcessTransport::spawn(command, args, env)?))
            }
            (ServerTransport::Sse { url }, _) => Ok(Box::new(SseTransport::connect(url).await?)),
        }
    }
}

/// Connects to MCP servers and aggregates them into one [`McpSession`].
pub struct McpSessionConnector {
    factory: Arc<dyn TransportFactory>,
    handshake_timeout: Option<Duration>,
}

impl McpSessionConnector {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(SystemTransports))
    }

    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            handshake_timeout: None,
        }
    }

    /// Connector with the per-read handshake bound from configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new().with_handshake_timeout(config.protocol_read_timeout())
    }

    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        self.handshake_timeout = Some(limit);
        self
    }
}

impl Default for McpSessionConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionConnector for McpSessionConnector {
    async fn connect(
        &self,
        servers: &[ToolServerConfig],
        strategy: ConnectStrategy,
    ) -> Result<Box<dyn ToolSession>, GatewayError> {
        // Dropping a partially built session kills or disconnects every
        // transport it holds, so early returns and cancellation are clean.
        let mut session = McpSession::default();
        for server in servers {
            let transport = self
                .factory
                .open(server, strategy)
                .await
                .map_err(|e| e.into_connect_error(&server.name))?;
            session
                .attach(&server.name, transport, self.handshake_timeout)
                .await
                .map_err(|e| e.into_connect_error(&server.name))?;
        }
        info!(
            servers = servers.len(),
            tools = session.tools.len(),
            "MCP session established"
        );
        Ok(Box::new(session))
    }
}

struct ServerConnection {
    name: String,
    client: McpClient,
    transport: Mutex<Box<dyn Transport>>,
    closed: AtomicBool,
}

/// Live connections to one or more MCP servers.
#[derive(Default)]
pub struct McpSession {
    connections: Vec<Arc<ServerConnection>>,
    tools: Vec<AgentTool>,
}

impl McpSession {
    async fn attach(
        &mut self,
        server: &str,
        mut transport: Box<dyn Transport>,
        handshake_timeout: Option<Duration>,
    ) -> Result<(), McpError> {
        let mut client = McpClient::new().with_handshake_timeout(handshake_timeout);
        client.initialize(&mut transport).await?;
        let listed = client.discover_tools(&mut transport).await?;
        debug!(server, count = listed.len(), "Listed tools");

        let connection = Arc::new(ServerConnection {
            name: server.to_string(),
            client,
            transport: Mutex::new(transport),
            closed: AtomicBool::new(false),
        });
        for tool in listed {
            let invoker = Arc::new(McpToolInvoker {
                connection: Arc::clone(&connection),
                tool: tool.name.clone(),
            });
            let agent_tool =
                AgentTool::new(tool.name, tool.description.unwrap_or_default(), invoker);
            self.tools.push(match tool.input_schema {
                Value::Null => agent_tool,
                schema => agent_tool.with_schema(schema),
            });
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.name.as_str()).collect()
    }
}

#[async_trait]
impl ToolSession for McpSession {
    fn tools(&self) -> Vec<AgentTool> {
        self.tools.clone()
    }

    async fn close(self: Box<Self>) {
        for connection in &self.connections {
            connection.closed.store(true, Ordering::SeqCst);
            let mut transport = connection.transport.lock().await;
            if let Err(e) = transport.close().await {
                warn!(server = %connection.name, error = %e, "Failed to close MCP transport");
            }
        }
        debug!(servers = ?self.server_names(), "MCP session closed");
    }
}

/// Forwards an [`AgentTool`] call to `tools/call` on its server.
struct McpToolInvoker {
    connection: Arc<ServerConnection>,
    tool: String,
}

#[async_trait]
impl ToolInvoker for McpToolInvoker {
    async fn invoke(&self, args: Value) -> Result<Value, GatewayError> {
        let mut transport = self.connection.transport.lock().await;
        if self.connection.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::SessionClosed);
        }

        let tool_error = |message: String| GatewayError::ToolCall {
            name: self.tool.clone(),
            message,
        };
        let result = self
            .connection
            .client
            .call_tool(&mut *transport, &self.tool, args)
            .await
            .map_err(|e| tool_error(e.to_string()))?;

        if result.is_error() {
            return Err(tool_error(result.text()));
        }
        let text = result.text();
        if text.is_empty() {
            serde_json::to_value(&result).map_err(|e| tool_error(e.to_string()))
        } else {
            Ok(Value::String(text))
        }
    }
}
