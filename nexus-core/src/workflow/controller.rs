//! The workflow controller: a state machine over [`Node`]s.
//!
//! Each node reads the current [`WorkflowState`] and returns a [`Command`]
//! (a patch plus the next node). The controller applies patches one at a
//! time, so a thread's state is never touched concurrently. A run stops when
//! it reaches [`Node::Terminal`] or suspends at [`Node::HumanFeedback`]
//! waiting for a review token.

use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{PlannerMode, ValidatedConfig, WorkflowConfig};
use crate::error::{LlmError, PlanError, Result, WorkflowError};
use crate::gateway::{Gateway, SessionConnector};
use crate::llm::{ChatModel, HANDOFF_TO_PLANNER, SearchClient, WorkerRunner, handoff_to_planner_spec};
use crate::plan::{CurrentPlan, Plan, StepType, parse_plan_json};
use crate::tools::{DefaultToolSets, ToolDescriptor, build_tools_section};
use crate::types::{AgentRole, ChatMessage};
use crate::workflow::checkpoint::{CheckpointStore, WorkflowCheckpoint};
use crate::workflow::executor::StepExecutor;
use crate::workflow::feedback::ReviewToken;
use crate::workflow::prompts::{BasicPrompts, PromptRenderer, PromptVars, reporter_messages};
use crate::workflow::state::{Command, Node, StatePatch, WorkflowFlags, WorkflowState};

/// Upper bound on node transitions in a single run.
pub const DEFAULT_MAX_TRANSITIONS: usize = 256;

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Suspended at plan review.
    AwaitingFeedback(WorkflowCheckpoint),
    /// Reached the terminal node.
    Finished { thread_id: Uuid, state: WorkflowState },
}

impl RunOutcome {
    pub fn thread_id(&self) -> Uuid {
        match self {
            RunOutcome::AwaitingFeedback(cp) => cp.thread_id,
            RunOutcome::Finished { thread_id, .. } => *thread_id,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        match self {
            RunOutcome::AwaitingFeedback(cp) => &cp.state,
            RunOutcome::Finished { state, .. } => state,
        }
    }

    pub fn final_report(&self) -> Option<&str> {
        self.state().final_report.as_deref()
    }
}

/// Which node follows the research team, given the current plan.
///
/// Goes back to the planner when there is no approved plan, the plan has no
/// steps, or every step already has a result.
pub fn route_research_team(state: &WorkflowState) -> Node {
    let Some(plan) = state.current_plan.approved() else {
        return Node::Planner;
    };
    match plan.next_unexecuted() {
        None => Node::Planner,
        Some((_, step)) => match step.step_type {
            StepType::Research => Node::Researcher,
            StepType::Processing => Node::Coder,
        },
    }
}

/// Drives research threads through the workflow graph.
pub struct WorkflowController {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn SearchClient>,
    prompts: Arc<dyn PromptRenderer>,
    executor: StepExecutor,
    defaults: DefaultToolSets,
    config: WorkflowConfig,
    tools_section: String,
    checkpoints: Option<CheckpointStore>,
    max_transitions: usize,
}

impl WorkflowController {
    pub fn new(
        config: &ValidatedConfig,
        model: Arc<dyn ChatModel>,
        worker: Arc<dyn WorkerRunner>,
        search: Arc<dyn SearchClient>,
        connector: Arc<dyn SessionConnector>,
        defaults: DefaultToolSets,
    ) -> Self {
        let gateway = Gateway::new(connector, &config.gateway);
        let configured_tools: Vec<ToolDescriptor> = config
            .servers
            .iter()
            .flat_map(|server| {
                server.enabled_tools.iter().map(|tool| ToolDescriptor {
                    server: server.name.clone(),
                    name: tool.clone(),
                    description: format!("Tool {} from server {}", tool, server.name),
                    input_schema: Value::Null,
                })
            })
            .collect();

        Self {
            model,
            search,
            prompts: Arc::new(BasicPrompts),
            executor: StepExecutor::new(
                gateway,
                config.servers.clone(),
                worker,
                config.recursion_limit,
            ),
            defaults,
            config: config.workflow.clone(),
            tools_section: build_tools_section(&configured_tools),
            checkpoints: None,
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptRenderer>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Persist suspended threads to `store` and allow resuming them by id.
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Replace the configured tool names in prompt context with discovered
    /// tool metadata.
    pub fn with_installed_tools(mut self, tools: &[ToolDescriptor]) -> Self {
        self.tools_section = build_tools_section(tools);
        self
    }

    pub fn with_max_transitions(mut self, max: usize) -> Self {
        self.max_transitions = max;
        self
    }

    fn vars(&self) -> PromptVars<'_> {
        PromptVars {
            config: &self.config,
            tools_section: &self.tools_section,
        }
    }

    /// Start a new thread for `query`.
    pub async fn run(&self, query: &str) -> Result<RunOutcome> {
        let thread_id = Uuid::new_v4();
        let state = WorkflowState::new(query, WorkflowFlags::from(&self.config));
        self.drive(thread_id, state, Node::Coordinator)
            .instrument(info_span!("workflow", %thread_id))
            .await
    }

    /// Resume a thread suspended at plan review.
    ///
    /// An unsupported review value fails before anything is changed; the
    /// checkpoint stays valid and can be resumed again.
    pub async fn resume(&self, checkpoint: &WorkflowCheckpoint, feedback: &str) -> Result<RunOutcome> {
        let thread_id = checkpoint.thread_id;
        if checkpoint.next_node != Node::HumanFeedback {
            return Err(WorkflowError::NotAwaitingFeedback {
                node: checkpoint.next_node.to_string(),
            }
            .into());
        }
        let token = ReviewToken::parse(feedback).inspect_err(|e| {
            error!(%thread_id, error = %e, "Rejecting review value");
        })?;

        async {
            let mut state = checkpoint.state.clone();
            let command = self.human_feedback(&state, Some(token));
            let next = self.apply(&mut state, command)?;
            self.drive(thread_id, state, next).await
        }
        .instrument(info_span!("workflow", %thread_id))
        .await
    }

    /// Resume a thread persisted in the checkpoint store.
    pub async fn resume_thread(&self, thread_id: Uuid, feedback: &str) -> Result<RunOutcome> {
        let store = self.checkpoints.as_ref().ok_or(WorkflowError::CheckpointNotFound { thread_id })?;
        let checkpoint = store.load(thread_id).await?;
        self.resume(&checkpoint, feedback).await
    }

    fn apply(&self, state: &mut WorkflowState, command: Command) -> Result<Node> {
        state.apply(command.patch)?;
        Ok(command.goto)
    }

    async fn drive(&self, thread_id: Uuid, mut state: WorkflowState, mut node: Node) -> Result<RunOutcome> {
        for _ in 0..self.max_transitions {
            debug!(node = %node, plan_iterations = state.plan_iterations(), "Entering node");
            let command = match node {
                Node::Terminal => {
                    if let Some(store) = &self.checkpoints {
                        store.remove(thread_id).await?;
                    }
                    info!(
                        has_report = state.final_report.is_some(),
                        observations = state.observations().len(),
                        "Workflow finished"
                    );
                    return Ok(RunOutcome::Finished { thread_id, state });
                }
                Node::HumanFeedback if !state.flags.auto_accepted_plan => {
                    let checkpoint = WorkflowCheckpoint::new(thread_id, Node::HumanFeedback, state);
                    if let Some(store) = &self.checkpoints {
                        store.save(&checkpoint).await?;
                    }
                    info!("Plan awaiting review");
                    return Ok(RunOutcome::AwaitingFeedback(checkpoint));
                }
                Node::HumanFeedback => self.human_feedback(&state, None),
                Node::Coordinator => self.coordinator(&state).await?,
                Node::BackgroundInvestigation => self.background_investigation(&state).await,
                Node::Planner => self.planner(&state).await?,
                Node::ResearchTeam => Command::goto(route_research_team(&state)),
                Node::Researcher => {
                    self.executor
                        .execute(AgentRole::Researcher, &self.defaults.researcher, &state)
                        .await?
                }
                Node::Coder => {
                    self.executor
                        .execute(AgentRole::Coder, &self.defaults.coder, &state)
                        .await?
                }
                Node::Reporter => self.reporter(&state).await?,
                Node::EnhancedReporter => self.enhanced_reporter(&state).await?,
            };
            node = self.apply(&mut state, command)?;
        }
        error!(max = self.max_transitions, "Workflow did not terminate");
        Err(WorkflowError::TransitionLimit {
            max: self.max_transitions,
        }
        .into())
    }

    async fn coordinator(&self, state: &WorkflowState) -> Result<Command> {
        info!("Coordinator talking");
        let messages = self.prompts.render("coordinator", state, self.vars());
        let reply = self
            .model
            .invoke_with_tools(&messages, &[handoff_to_planner_spec()])
            .await?;

        if reply.tool_calls.is_empty() {
            warn!("Coordinator response contains no tool calls, terminating workflow");
            debug!(response = %reply.content, "Coordinator response");
            return Ok(Command::goto(Node::Terminal));
        }

        let locale = reply
            .tool_calls
            .iter()
            .filter(|call| call.name == HANDOFF_TO_PLANNER)
            .find_map(|call| call.args.get("locale").and_then(Value::as_str))
            .filter(|locale| !locale.trim().is_empty())
            .unwrap_or(&state.locale)
            .to_string();

        let goto = if state.flags.enable_background_investigation {
            Node::BackgroundInvestigation
        } else {
            Node::Planner
        };
        Ok(Command::with_patch(
            StatePatch {
                locale: Some(locale),
                ..Default::default()
            },
            goto,
        ))
    }

    async fn background_investigation(&self, state: &WorkflowState) -> Command {
        info!("Background investigation running");
        let query = state
            .last_message()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let results = match self.search.search(query, self.config.max_search_results).await {
            Ok(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| {
                        json!({
                            "title": item.get("title").and_then(Value::as_str).unwrap_or_default(),
                            "content": item.get("content").and_then(Value::as_str).unwrap_or_default(),
                        })
                    })
                    .collect(),
            ),
            Ok(other) => {
                error!(response = %other, "Search returned malformed response");
                Value::Null
            }
            Err(e) => {
                warn!(error = %e, "Background search failed");
                Value::Null
            }
        };

        Command::with_patch(
            StatePatch {
                background_investigation_results: Some(results),
                ..Default::default()
            },
            Node::Planner,
        )
    }

    async fn collect_plan_text(&self, messages: &[ChatMessage]) -> std::result::Result<String, LlmError> {
        match self.config.planner_mode {
            PlannerMode::Structured => self.model.complete(messages).await,
            PlannerMode::Streaming => {
                let (tx, mut rx) = mpsc::channel::<String>(64);
                let collect = async {
                    let mut full = String::new();
                    while let Some(chunk) = rx.recv().await {
                        full.push_str(&chunk);
                    }
                    full
                };
                let (streamed, full) = tokio::join!(self.model.complete_streaming(messages, tx), collect);
                streamed?;
                Ok(full)
            }
        }
    }

    async fn planner(&self, state: &WorkflowState) -> Result<Command> {
        info!("Planner generating full plan");
        let iterations = state.plan_iterations();
        let report_node = state.flags.report_node();

        if iterations >= self.config.max_plan_iterations {
            info!(
                plan_iterations = iterations,
                max = self.config.max_plan_iterations,
                "Plan iteration cap reached, going to reporter"
            );
            return Ok(Command::goto(report_node));
        }

        let mut messages = self.prompts.render("planner", state, self.vars());
        if iterations == 0
            && state.flags.enable_background_investigation
            && let Some(results) = state.background_results_text()
        {
            messages.push(ChatMessage::user(format!(
                "background investigation results of user query:\n{results}\n"
            )));
        }

        let full_response = self.collect_plan_text(&messages).await?;
        info!(response = %full_response, "Planner response");

        let on_invalid = |reason: &str| {
            warn!(reason, "Planner response is not a valid plan");
            if iterations > 0 {
                Command::goto(report_node)
            } else {
                Command::goto(Node::Terminal)
            }
        };

        let value = match parse_plan_json(&full_response) {
            Ok(value) => value,
            Err(e) => return Ok(on_invalid(&e.to_string())),
        };
        let planner_message = ChatMessage::assistant(full_response.clone()).named("planner");

        let has_enough_context = value
            .get("has_enough_context")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if has_enough_context {
            let plan = match Plan::from_value(value) {
                Ok(plan) => plan,
                Err(e) => return Ok(on_invalid(&e.to_string())),
            };
            info!("Planner response has enough context");
            return Ok(Command::with_patch(
                StatePatch {
                    messages: vec![planner_message],
                    current_plan: Some(CurrentPlan::Approved(plan)),
                    ..Default::default()
                },
                report_node,
            ));
        }

        Ok(Command::with_patch(
            StatePatch {
                messages: vec![planner_message],
                current_plan: Some(CurrentPlan::Draft(full_response)),
                ..Default::default()
            },
            Node::HumanFeedback,
        ))
    }

    /// Plan review. `None` means the plan was auto-accepted.
    fn human_feedback(&self, state: &WorkflowState, token: Option<ReviewToken>) -> Command {
        match token {
            Some(ReviewToken::EditPlan(feedback)) => {
                info!("Plan edit requested");
                return Command::with_patch(
                    StatePatch {
                        messages: vec![ChatMessage::user(feedback).named("feedback")],
                        ..Default::default()
                    },
                    Node::Planner,
                );
            }
            Some(ReviewToken::Accepted(_)) => info!("Plan is accepted by user"),
            None => info!("Plan auto-accepted"),
        }

        let report_node = state.flags.report_node();
        let parsed = match &state.current_plan {
            CurrentPlan::Draft(raw) => Plan::parse(raw),
            CurrentPlan::Approved(plan) => Ok(plan.clone()),
            CurrentPlan::None => Err(PlanError::Validation {
                message: "no plan to review".into(),
            }),
        };
        let plan = match parsed {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Stored plan could not be parsed, going to reporter");
                return Command::goto(report_node);
            }
        };

        let goto = if plan.has_enough_context {
            report_node
        } else {
            Node::ResearchTeam
        };
        Command::with_patch(
            StatePatch {
                locale: Some(plan.locale.clone()),
                current_plan: Some(CurrentPlan::Approved(plan)),
                bump_plan_iterations: true,
                ..Default::default()
            },
            goto,
        )
    }

    async fn reporter(&self, state: &WorkflowState) -> Result<Command> {
        info!("Reporter writing final report");
        let messages = reporter_messages(self.prompts.as_ref(), state, self.vars());
        let report = self.model.complete(&messages).await?;
        debug!(report = %report, "Reporter response");
        Ok(Command::with_patch(
            StatePatch {
                final_report: Some(report),
                ..Default::default()
            },
            Node::Terminal,
        ))
    }

    async fn enhanced_reporter(&self, state: &WorkflowState) -> Result<Command> {
        info!("Enhanced reporter generating final report");
        let report = self
            .executor
            .execute_report(&self.defaults.reporter, state)
            .await?;
        Ok(Command::with_patch(
            StatePatch {
                final_report: Some(report),
                ..Default::default()
            },
            Node::Terminal,
        ))
    }
}
