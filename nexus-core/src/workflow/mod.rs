//! Plan-execution workflow for ResearchNexus.
//!
//! A research request moves through coordinator, planning, plan review,
//! step execution and reporting. Steps run strictly one after another on a
//! single thread state; independent threads share nothing but configuration.

pub mod checkpoint;
pub mod controller;
pub mod executor;
pub mod feedback;
pub mod prompts;
pub mod state;

pub use checkpoint::{CheckpointStore, WorkflowCheckpoint};
pub use controller::{DEFAULT_MAX_TRANSITIONS, RunOutcome, WorkflowController, route_research_team};
pub use executor::StepExecutor;
pub use feedback::ReviewToken;
pub use prompts::{BasicPrompts, PromptRenderer, PromptVars};
pub use state::{Command, DEFAULT_LOCALE, Node, StatePatch, StepResult, WorkflowFlags, WorkflowState};
