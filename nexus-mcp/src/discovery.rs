//! One-shot tool discovery: list a server's tools without keeping a session.
//!
//! Used to populate prompt context and the `nexus tools discover` command.
//! Configuration mistakes are errors; runtime failures (spawn errors,
//! timeouts, protocol errors) are logged by the gateway and yield an empty
//! list.

use nexus_core::config::{GatewayConfig, ToolServerConfig, ToolServerDescriptor};
use nexus_core::gateway::Gateway;
use nexus_core::tools::ToolDescriptor;
use nexus_core::ConfigError;
use std::sync::Arc;
use tracing::info;

use crate::connector::McpSessionConnector;

/// Gateway wired to real MCP transports with the configured timeouts.
pub fn system_gateway(config: &GatewayConfig) -> Gateway {
    Gateway::new(Arc::new(McpSessionConnector::from_config(config)), config)
}

/// List the tools of a single declared server.
pub async fn discover_server_tools(
    descriptor: &ToolServerDescriptor,
    config: &GatewayConfig,
) -> Result<Vec<ToolDescriptor>, ConfigError> {
    let server = descriptor.validate()?;
    Ok(system_gateway(config).discover(&server).await)
}

/// List the tools of every server, one server at a time.
///
/// Tools outside a server's enabled set are still reported; enablement only
/// matters when tools are attached to a step.
pub async fn discover_all(gateway: &Gateway, servers: &[ToolServerConfig]) -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();
    for server in servers {
        let listed = gateway.discover(server).await;
        info!(server = %server.name, count = listed.len(), "Discovered tools");
        tools.extend(listed);
    }
    tools
}
