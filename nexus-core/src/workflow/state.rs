//! Workflow state, node names and transition commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::WorkflowConfig;
use crate::error::PlanError;
use crate::plan::{CurrentPlan, Plan};
use crate::types::{AgentRole, ChatMessage, Role};

/// Locale used until the coordinator or an accepted plan says otherwise.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Named states of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Coordinator,
    BackgroundInvestigation,
    Planner,
    HumanFeedback,
    ResearchTeam,
    Researcher,
    Coder,
    Reporter,
    EnhancedReporter,
    Terminal,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Node::Coordinator => "coordinator",
            Node::BackgroundInvestigation => "background_investigation",
            Node::Planner => "planner",
            Node::HumanFeedback => "human_feedback",
            Node::ResearchTeam => "research_team",
            Node::Researcher => "researcher",
            Node::Coder => "coder",
            Node::Reporter => "reporter",
            Node::EnhancedReporter => "enhanced_reporter",
            Node::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Per-thread switches copied from configuration when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowFlags {
    pub auto_accepted_plan: bool,
    pub enable_background_investigation: bool,
    pub use_enhanced_reporter: bool,
}

impl From<&WorkflowConfig> for WorkflowFlags {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            auto_accepted_plan: config.auto_accepted_plan,
            enable_background_investigation: config.enable_background_investigation,
            use_enhanced_reporter: config.use_enhanced_reporter,
        }
    }
}

impl WorkflowFlags {
    /// The report node this thread ends in.
    pub fn report_node(&self) -> Node {
        if self.use_enhanced_reporter {
            Node::EnhancedReporter
        } else {
            Node::Reporter
        }
    }
}

/// The state of one task thread. Owned by the controller and only changed
/// through [`WorkflowState::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub messages: Vec<ChatMessage>,
    pub current_plan: CurrentPlan,
    plan_iterations: u32,
    observations: Vec<String>,
    pub locale: String,
    /// Search results gathered before planning. `Some(Value::Null)` records a
    /// malformed search response.
    #[serde(default)]
    pub background_investigation_results: Option<Value>,
    #[serde(default)]
    pub final_report: Option<String>,
    pub flags: WorkflowFlags,
}

/// A step result to write into the approved plan.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub index: usize,
    pub role: AgentRole,
    pub content: String,
}

/// Explicit changes a node asks the controller to make.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    /// Appended to `messages`.
    pub messages: Vec<ChatMessage>,
    /// Replaces the current plan slot.
    pub current_plan: Option<CurrentPlan>,
    /// Increments `plan_iterations` by one.
    pub bump_plan_iterations: bool,
    pub locale: Option<String>,
    pub background_investigation_results: Option<Value>,
    pub step_result: Option<StepResult>,
    pub final_report: Option<String>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }
}

/// A node's decision: what to change and where to go next.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub patch: StatePatch,
    pub goto: Node,
}

impl Command {
    pub fn goto(node: Node) -> Self {
        Self {
            patch: StatePatch::default(),
            goto: node,
        }
    }

    pub fn with_patch(patch: StatePatch, node: Node) -> Self {
        Self { patch, goto: node }
    }
}

impl WorkflowState {
    /// Start a thread from the user's request.
    pub fn new(query: impl Into<String>, flags: WorkflowFlags) -> Self {
        Self {
            messages: vec![ChatMessage::user(query)],
            current_plan: CurrentPlan::None,
            plan_iterations: 0,
            observations: Vec::new(),
            locale: DEFAULT_LOCALE.to_string(),
            background_investigation_results: None,
            final_report: None,
            flags,
        }
    }

    pub fn plan_iterations(&self) -> u32 {
        self.plan_iterations
    }

    /// Results of completed steps across every plan revision, in order.
    pub fn observations(&self) -> &[String] {
        &self.observations
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Background results worth showing the planner, if any.
    pub fn background_results_text(&self) -> Option<String> {
        self.background_investigation_results
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
    }

    /// The plan to report on: the approved plan, else a parseable draft.
    pub fn reportable_plan(&self) -> Option<Plan> {
        match &self.current_plan {
            CurrentPlan::Approved(plan) => Some(plan.clone()),
            CurrentPlan::Draft(raw) => Plan::parse(raw).ok(),
            CurrentPlan::None => None,
        }
    }

    /// Apply a patch. A step result is written into the plan and appended to
    /// the observations together, so the two never disagree.
    pub fn apply(&mut self, patch: StatePatch) -> Result<(), PlanError> {
        if let Some(result) = patch.step_result {
            let plan = self
                .current_plan
                .approved_mut()
                .ok_or(PlanError::StepOutOfRange {
                    index: result.index,
                })?;
            plan.record_step_result(result.index, result.content.clone())?;
            self.messages
                .push(ChatMessage::user(result.content.clone()).named(result.role.as_str()));
            self.observations.push(result.content);
        }

        self.messages.extend(patch.messages);
        if let Some(plan) = patch.current_plan {
            self.current_plan = plan;
        }
        if patch.bump_plan_iterations {
            self.plan_iterations += 1;
        }
        if let Some(locale) = patch.locale {
            self.locale = locale;
        }
        if let Some(results) = patch.background_investigation_results {
            self.background_investigation_results = Some(results);
        }
        if let Some(report) = patch.final_report {
            self.final_report = Some(report);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Step, StepType};
    use serde_json::json;

    fn approved_plan() -> CurrentPlan {
        CurrentPlan::Approved(Plan {
            locale: "en-US".into(),
            has_enough_context: false,
            thought: "t".into(),
            title: "Plan".into(),
            steps: vec![Step::new("A", "a", StepType::Research)],
        })
    }

    #[test]
    fn test_new_state() {
        let state = WorkflowState::new("What is Rust?", WorkflowFlags::default());
        assert_eq!(state.locale, "en-US");
        assert_eq!(state.plan_iterations(), 0);
        assert_eq!(state.last_user_message().unwrap().content, "What is Rust?");
    }

    #[test]
    fn test_apply_step_result_appends_observation() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.current_plan = approved_plan();
        state
            .apply(StatePatch {
                step_result: Some(StepResult {
                    index: 0,
                    role: AgentRole::Researcher,
                    content: "found it".into(),
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.observations(), &["found it".to_string()]);
        assert_eq!(
            state.current_plan.approved().unwrap().steps[0].execution_res(),
            Some("found it")
        );
        assert_eq!(state.last_message().unwrap().name.as_deref(), Some("researcher"));
    }

    #[test]
    fn test_apply_step_result_twice_is_rejected() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.current_plan = approved_plan();
        let patch = StatePatch {
            step_result: Some(StepResult {
                index: 0,
                role: AgentRole::Researcher,
                content: "first".into(),
            }),
            ..Default::default()
        };
        state.apply(patch.clone()).unwrap();
        assert!(state.apply(patch).is_err());
        assert_eq!(state.observations().len(), 1);
    }

    #[test]
    fn test_apply_step_result_without_plan_fails() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        let err = state.apply(StatePatch {
            step_result: Some(StepResult {
                index: 0,
                role: AgentRole::Coder,
                content: "x".into(),
            }),
            ..Default::default()
        });
        assert!(err.is_err());
        assert!(state.observations().is_empty());
    }

    #[test]
    fn test_apply_bump_and_locale() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state
            .apply(StatePatch {
                bump_plan_iterations: true,
                locale: Some("zh-CN".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.plan_iterations(), 1);
        assert_eq!(state.locale, "zh-CN");
    }

    #[test]
    fn test_background_results_text_skips_null() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.background_investigation_results = Some(Value::Null);
        assert!(state.background_results_text().is_none());
        state.background_investigation_results = Some(json!([{"title": "t", "content": "c"}]));
        assert!(state.background_results_text().unwrap().contains("\"title\""));
    }

    #[test]
    fn test_reportable_plan_from_draft() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.current_plan = CurrentPlan::Draft(
            r#"{"locale": "en-US", "has_enough_context": false, "title": "Draft", "steps": []}"#.into(),
        );
        assert_eq!(state.reportable_plan().unwrap().title, "Draft");
        state.current_plan = CurrentPlan::Draft("nonsense".into());
        assert!(state.reportable_plan().is_none());
    }

    #[test]
    fn test_report_node() {
        let flags = WorkflowFlags {
            use_enhanced_reporter: true,
            ..Default::default()
        };
        assert_eq!(flags.report_node(), Node::EnhancedReporter);
        assert_eq!(WorkflowFlags::default().report_node(), Node::Reporter);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.current_plan = approved_plan();
        let json = serde_json::to_string(&state).unwrap();
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
