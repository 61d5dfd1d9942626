//! Tool values handed to workers.
//!
//! An [`AgentTool`] is an immutable `{name, description, invoker}` triple.
//! Annotating a tool (provenance prefix, usage hint) yields a new value; the
//! invoker is shared, never the description.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::types::AgentRole;

/// Something that can execute a tool call.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<Value, GatewayError>;
}

/// A callable tool as seen by a worker.
#[derive(Clone)]
pub struct AgentTool {
    name: String,
    description: String,
    input_schema: Value,
    invoker: Arc<dyn ToolInvoker>,
}

impl AgentTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            invoker,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// A copy of this tool with a replaced description.
    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            description: description.into(),
            input_schema: self.input_schema.clone(),
            invoker: Arc::clone(&self.invoker),
        }
    }

    /// A copy of this tool whose description names the server that provides it.
    pub fn with_provenance(&self, server: &str) -> Self {
        self.with_description(format!("Powered by '{}'.\n{}", server, self.description))
    }

    pub async fn invoke(&self, args: Value) -> Result<Value, GatewayError> {
        self.invoker.invoke(args).await
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Schema-only view of a tool, as exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool metadata listed from a tool server without keeping a session open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// Caller-supplied default tools per role (search, crawl, code execution...).
///
/// The workflow only clones these, appends external tools to them, or falls
/// back to them unchanged.
#[derive(Debug, Clone, Default)]
pub struct DefaultToolSets {
    pub researcher: Vec<AgentTool>,
    pub coder: Vec<AgentTool>,
    pub reporter: Vec<AgentTool>,
}

impl DefaultToolSets {
    pub fn for_role(&self, role: AgentRole) -> &[AgentTool] {
        match role {
            AgentRole::Researcher => &self.researcher,
            AgentRole::Coder => &self.coder,
            AgentRole::Reporter => &self.reporter,
        }
    }
}

/// Render installed tool metadata as a prompt section.
pub fn build_tools_section(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "(no external tools are currently available)".to_string();
    }
    let mut lines = vec!["Available external tools:".to_string()];
    for tool in tools {
        lines.push(format!("- `{}` ({}): {}", tool.name, tool.server, tool.description));
    }
    lines.join("\n")
}

/// Invoker that evaluates a synchronous closure. Handy for default tools
/// implemented in-process.
pub struct FnInvoker<F>(pub F);

#[async_trait]
impl<F> ToolInvoker for FnInvoker<F>
where
    F: Fn(Value) -> Result<Value, GatewayError> + Send + Sync,
{
    async fn invoke(&self, args: Value) -> Result<Value, GatewayError> {
        (self.0)(args)
    }
}
