//! # ResearchNexus Core
//!
//! Core library for the ResearchNexus research workflow.
//! Provides the plan model, the workflow controller, the step executor, tool
//! recommendation and resolution, the timeout-guarded tool session gateway,
//! configuration, and the collaborator traits for models and workers.

pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod plan;
pub mod recommend;
pub mod resolution;
pub mod tools;
pub mod types;
pub mod workflow;

// Re-export commonly used types at the crate root.
pub use config::{
    GatewayConfig, NexusConfig, PlannerMode, RecursionLimit, ServerTransport, ToolServerConfig,
    ToolServerDescriptor, ValidatedConfig, WorkflowConfig, load_config,
};
pub use error::{
    ConfigError, GatewayError, LlmError, NexusError, PlanError, Result, WorkflowError,
};
pub use gateway::{
    ConnectStrategy, FallbackReason, Gateway, LeaseSource, SessionConnector, SessionOutcome,
    ToolLease, ToolSession,
};
pub use llm::{ChatModel, ModelReply, SearchClient, ToolCall, WorkerRequest, WorkerRunner};
pub use plan::{CurrentPlan, Plan, PlanStatus, Step, StepType};
pub use recommend::{Category, Priority, Recommendation, Recommendations, recommend};
pub use resolution::{ResolvedServers, resolve_servers};
pub use tools::{AgentTool, DefaultToolSets, ToolDescriptor, ToolInvoker, ToolSpec};
pub use types::{AgentRole, ChatMessage, Role};
pub use workflow::{RunOutcome, WorkflowController, WorkflowState};
