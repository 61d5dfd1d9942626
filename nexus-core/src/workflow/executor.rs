//! Step executor: runs the next plan step on a worker with the tools the
//! gateway leased for it.

use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{RecursionLimit, ToolServerConfig};
use crate::error::LlmError;
use crate::gateway::{Gateway, LeaseSource, StepContext, ToolLease};
use crate::llm::{WorkerRequest, WorkerRunner};
use crate::plan::{Step, StepType};
use crate::recommend::recommend;
use crate::resolution::resolve_servers;
use crate::tools::AgentTool;
use crate::types::{AgentRole, ChatMessage};
use crate::workflow::prompts::{enhanced_report_input, step_input};
use crate::workflow::state::{Command, Node, StatePatch, StepResult, WorkflowState};

pub const ENHANCED_REPORT_STEP_TITLE: &str = "Generate Enhanced Research Report";
pub const ENHANCED_REPORT_STEP_DESCRIPTION: &str = "Create a comprehensive research report using \
available tools for fact-checking and information enhancement";

/// Runs worker steps with leased tools.
pub struct StepExecutor {
    gateway: Gateway,
    servers: Arc<[ToolServerConfig]>,
    worker: Arc<dyn WorkerRunner>,
    recursion_limit: RecursionLimit,
}

impl StepExecutor {
    pub fn new(
        gateway: Gateway,
        servers: Vec<ToolServerConfig>,
        worker: Arc<dyn WorkerRunner>,
        recursion_limit: RecursionLimit,
    ) -> Self {
        Self {
            gateway,
            servers: servers.into(),
            worker,
            recursion_limit,
        }
    }

    pub fn servers(&self) -> &[ToolServerConfig] {
        &self.servers
    }

    /// Resolve servers for `role` and lease tools for a step.
    async fn lease_for(&self, role: AgentRole, step: &Step, defaults: &[AgentTool]) -> ToolLease {
        let recs = recommend(&step.title, &step.description, role);
        debug!(
            role = %role,
            categories = ?recs.keys().collect::<Vec<_>>(),
            "Tool recommendations for step"
        );
        let resolved = resolve_servers(&self.servers, role, &recs);
        self.gateway
            .acquire(
                &resolved,
                defaults,
                StepContext {
                    role,
                    step_title: &step.title,
                    recommendations: &recs,
                },
            )
            .await
    }

    /// Run the worker and release the lease whatever the outcome.
    ///
    /// A failed run that had external tools attached is retried once with
    /// `defaults` alone.
    async fn run_worker(
        &self,
        agent: &str,
        role: AgentRole,
        lease: ToolLease,
        defaults: &[AgentTool],
        messages: Vec<ChatMessage>,
    ) -> Result<String, LlmError> {
        let had_external = matches!(lease.source(), LeaseSource::External { attached, .. } if *attached > 0);
        let request = WorkerRequest {
            agent: agent.to_string(),
            role,
            tools: lease.tools().to_vec(),
            messages: messages.clone(),
            recursion_limit: self.recursion_limit,
        };
        let outcome = self.worker.run(request).await;
        lease.release().await;

        match outcome {
            Err(e) if had_external => {
                warn!(
                    role = %role,
                    error = %e,
                    "Worker failed with external tools, retrying with default tools"
                );
                self.worker
                    .run(WorkerRequest {
                        agent: agent.to_string(),
                        role,
                        tools: defaults.to_vec(),
                        messages,
                        recursion_limit: self.recursion_limit,
                    })
                    .await
            }
            outcome => outcome,
        }
    }

    /// Execute the first unexecuted step of the approved plan as `role`.
    ///
    /// Always routes back to the research team. Without an unexecuted step
    /// this is a no-op.
    pub async fn execute(
        &self,
        role: AgentRole,
        defaults: &[AgentTool],
        state: &WorkflowState,
    ) -> Result<Command, LlmError> {
        let Some((plan, (index, step))) = state
            .current_plan
            .approved()
            .and_then(|plan| plan.next_unexecuted().map(|found| (plan, found)))
        else {
            warn!(role = %role, "No unexecuted step found");
            return Ok(Command::goto(Node::ResearchTeam));
        };

        let span = info_span!("step", role = %role, index, title = %step.title);
        async {
            info!("Executing step");
            let lease = self.lease_for(role, step, defaults).await;
            let messages = step_input(plan, index, &state.locale, role);
            let content = self.run_worker(role.as_str(), role, lease, defaults, messages).await?;
            info!("Step execution completed");

            Ok::<_, LlmError>(Command::with_patch(
                StatePatch {
                    step_result: Some(StepResult {
                        index,
                        role,
                        content,
                    }),
                    ..Default::default()
                },
                Node::ResearchTeam,
            ))
        }
        .instrument(span)
        .await
    }

    /// Write the final report with the reporter role, attaching any external
    /// tools bound to it.
    pub async fn execute_report(
        &self,
        defaults: &[AgentTool],
        state: &WorkflowState,
    ) -> Result<String, LlmError> {
        let step = Step::new(
            ENHANCED_REPORT_STEP_TITLE,
            ENHANCED_REPORT_STEP_DESCRIPTION,
            StepType::Research,
        );
        let role = AgentRole::Reporter;
        async {
            let lease = self.lease_for(role, &step, defaults).await;
            let messages = vec![enhanced_report_input(state)];
            self.run_worker("enhanced_reporter", role, lease, defaults, messages)
                .await
        }
        .instrument(info_span!("step", role = %role, title = %step.title))
        .await
    }
}
