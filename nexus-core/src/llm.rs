//! Collaborator seams: the language model, the worker agent runtime and the
//! web search backend.
//!
//! The workflow only ever talks to these traits. Concrete providers live
//! outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::RecursionLimit;
use crate::error::LlmError;
use crate::tools::{AgentTool, ToolSpec};
use crate::types::{AgentRole, ChatMessage};

/// Name of the capability the coordinator exposes to the model.
pub const HANDOFF_TO_PLANNER: &str = "handoff_to_planner";

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A model response that may contain tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Trait for chat model providers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Perform a full completion and return the response text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Perform a streaming completion, sending text chunks to the channel.
    ///
    /// The default implementation sends the full completion as one chunk.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<(), LlmError> {
        let text = self.complete(messages).await?;
        tx.send(text).await.map_err(|e| LlmError::Streaming {
            message: e.to_string(),
        })
    }

    /// Complete with a set of callable tools bound to the model.
    async fn invoke_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, LlmError>;
}

/// Input for one worker run.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Prompt/agent name, e.g. `researcher` or `enhanced_reporter`.
    pub agent: String,
    pub role: AgentRole,
    pub tools: Vec<AgentTool>,
    pub messages: Vec<ChatMessage>,
    pub recursion_limit: RecursionLimit,
}

/// A tool-using agent loop (reason, call tools, repeat) bounded by a
/// recursion budget. Returns the agent's final message.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn run(&self, request: WorkerRequest) -> Result<String, LlmError>;
}

/// Web search backend used by background investigation.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search and return the provider's raw JSON response.
    async fn search(&self, query: &str, max_results: usize) -> Result<Value, LlmError>;
}

/// Tool schema for the coordinator's handoff capability.
pub fn handoff_to_planner_spec() -> ToolSpec {
    ToolSpec {
        name: HANDOFF_TO_PLANNER.to_string(),
        description: "Handoff to planner agent to do plan.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "task_title": {
                    "type": "string",
                    "description": "The title of the task to be handed off."
                },
                "locale": {
                    "type": "string",
                    "description": "The user's detected language locale (e.g., en-US, zh-CN)."
                }
            },
            "required": ["task_title", "locale"]
        }),
    }
}
