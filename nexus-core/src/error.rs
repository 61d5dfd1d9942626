//! Error types for the ResearchNexus core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the model collaborators, configuration, plan parsing, the
//! workflow controller, and the external tool gateway.

use std::path::PathBuf;

/// Top-level error type for the ResearchNexus core library.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the language model, worker, and search collaborators.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Worker '{role}' failed: {message}")]
    Worker { role: String, message: String },

    #[error("Search failed: {message}")]
    Search { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Tool server '{server}' is missing required parameter '{param}' for {transport} transport")]
    MissingTransportParam {
        server: String,
        transport: String,
        param: String,
    },

    #[error("Invalid recursion limit override: {value}")]
    InvalidRecursionLimit { value: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from parsing and mutating plans.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Plan is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Plan failed validation: {message}")]
    Validation { message: String },

    #[error("Step '{title}' already has an execution result")]
    AlreadyExecuted { title: String },

    #[error("Step index {index} is out of range")]
    StepOutOfRange { index: usize },
}

/// Errors from the workflow controller.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The caller supplied a review token that is neither `[ACCEPTED]` nor
    /// `[EDIT_PLAN]`. This is the only error the controller does not swallow.
    #[error("Interrupt value of '{value}' is not supported")]
    UnsupportedFeedback { value: String },

    #[error("Workflow is not awaiting feedback (next node: {node})")]
    NotAwaitingFeedback { node: String },

    #[error("Workflow exceeded {max} transitions without terminating")]
    TransitionLimit { max: usize },

    #[error("Checkpoint not found: {thread_id}")]
    CheckpointNotFound { thread_id: uuid::Uuid },

    #[error("Checkpoint persistence failed: {message}")]
    Persistence { message: String },
}

/// Errors raised while opening external tool sessions.
///
/// These never reach the controller: the gateway converts every one of them
/// into the default-tools fallback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport not supported in this process: {message}")]
    Unsupported { message: String },

    #[error("Connection to tool server '{server}' failed: {message}")]
    Connect { server: String, message: String },

    #[error("Tool server protocol error: {message}")]
    Protocol { message: String },

    #[error("Tool session is closed")]
    SessionClosed,

    #[error("Tool '{name}' failed: {message}")]
    ToolCall { name: String, message: String },
}

/// A type alias for results using the top-level `NexusError`.
pub type Result<T> = std::result::Result<T, NexusError>;
