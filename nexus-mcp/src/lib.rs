//! # ResearchNexus MCP
//!
//! Model Context Protocol client side for ResearchNexus: JSON-RPC 2.0 wire
//! types, stdio and SSE transports, the session connector the gateway uses
//! to attach external tools to workflow steps, and one-shot tool discovery.

pub mod client;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::McpClient;
pub use connector::{McpSession, McpSessionConnector, SystemTransports, TransportFactory};
pub use discovery::{discover_all, discover_server_tools, system_gateway};
pub use error::McpError;
pub use protocol::{MCP_PROTOCOL_VERSION, McpTool, ServerInfo};
pub use transport::{
    ChannelTransport, ProcessTransport, SseTransport, ThreadedProcessTransport, Transport,
};
