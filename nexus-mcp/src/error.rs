//! MCP client error types.

use nexus_core::GatewayError;

/// Errors raised while talking to an external MCP server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Server returned error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("Tool execution failed: {message}")]
    ToolError { message: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Transport not supported: {message}")]
    Unsupported { message: String },

    #[error("Timed out after {secs}s waiting for {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("Client not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Attribute a setup failure to `server`.
    ///
    /// Unsupported transports keep their kind so the gateway can try its
    /// alternate strategy.
    pub fn into_connect_error(self, server: &str) -> GatewayError {
        match self {
            McpError::Unsupported { message } => GatewayError::Unsupported { message },
            other => GatewayError::Connect {
                server: server.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<McpError> for GatewayError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Unsupported { message } => GatewayError::Unsupported { message },
            other => GatewayError::Protocol {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::Timeout {
            operation: "initialize".into(),
            secs: 10,
        };
        assert_eq!(err.to_string(), "Timed out after 10s waiting for initialize");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let mcp_err: McpError = io_err.into();
        assert!(matches!(mcp_err, McpError::Io(_)));
        assert_eq!(mcp_err.to_string(), "IO error: pipe broken");
    }

    #[test]
    fn test_into_gateway_error() {
        let unsupported: GatewayError = McpError::Unsupported {
            message: "no subprocess support".into(),
        }
        .into();
        assert_eq!(
            unsupported,
            GatewayError::Unsupported {
                message: "no subprocess support".into()
            }
        );

        let protocol: GatewayError = McpError::NotInitialized.into();
        assert!(matches!(protocol, GatewayError::Protocol { .. }));
    }

    #[test]
    fn test_into_connect_error() {
        let err = McpError::TransportError {
            message: "Failed to spawn npx".into(),
        }
        .into_connect_error("memory");
        assert_eq!(
            err,
            GatewayError::Connect {
                server: "memory".into(),
                message: "Transport error: Failed to spawn npx".into()
            }
        );
    }
}
