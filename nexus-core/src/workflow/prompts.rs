//! Prompt rendering and worker input assembly.
//!
//! [`PromptRenderer`] produces the system prompt plus conversation for a
//! named agent. The functions below build the fixed task messages that wrap
//! plan context around it.

use chrono::Local;

use crate::config::WorkflowConfig;
use crate::plan::Plan;
use crate::types::{AgentRole, ChatMessage};
use crate::workflow::state::WorkflowState;

/// Values available to prompt templates besides the state itself.
#[derive(Debug, Clone, Copy)]
pub struct PromptVars<'a> {
    pub config: &'a WorkflowConfig,
    /// Rendered list of configured external tools, shown to the planner.
    pub tools_section: &'a str,
}

/// Renders the message list for a named agent.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, agent: &str, state: &WorkflowState, vars: PromptVars<'_>) -> Vec<ChatMessage>;
}

/// Minimal built-in prompts: a short system prompt followed by the
/// conversation so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPrompts;

impl BasicPrompts {
    fn system_prompt(agent: &str, state: &WorkflowState, vars: PromptVars<'_>) -> String {
        let now = Local::now().format("%a %b %d %Y %H:%M:%S %z");
        let body = match agent {
            "coordinator" => "You are a research coordinator. Handle greetings and small talk \
                directly. For any research question call `handoff_to_planner` with a short task \
                title and the user's locale."
                .to_string(),
            "planner" => format!(
                "You are a research planner. Produce a JSON plan with the fields locale, \
                 has_enough_context, thought, title and steps. Use at most {} steps. Each step has \
                 title, description, step_type (research or processing) and need_web_search.\n\n{}",
                vars.config.max_step_num, vars.tools_section
            ),
            "researcher" => "You are a researcher. Use the available tools to gather accurate, \
                sourced information for the current task."
                .to_string(),
            "coder" => "You are a programmer. Use the available tools to compute, analyze or \
                transform data for the current task."
                .to_string(),
            "reporter" | "enhanced_reporter" => "You are a report writer. Write a clear, \
                well-structured report grounded only in the provided findings."
                .to_string(),
            other => format!("You are the {other} agent."),
        };
        format!("---\nCURRENT_TIME: {now}\nLOCALE: {}\n---\n\n{body}", state.locale)
    }
}

impl PromptRenderer for BasicPrompts {
    fn render(&self, agent: &str, state: &WorkflowState, vars: PromptVars<'_>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(Self::system_prompt(agent, state, vars))];
        messages.extend(state.messages.iter().cloned());
        messages
    }
}

pub const CITATION_REMINDER: &str = "IMPORTANT: DO NOT include inline citations in the text. \
Instead, track all sources and include a References section at the end using link reference \
format. Include an empty line between each citation for better readability. Use this format for \
each reference:\n- [Source Title](URL)\n\n- [Another Source](URL)";

pub const REPORT_STRUCTURE_REMINDER: &str = "IMPORTANT: Structure your report according to the \
format in the prompt. Remember to include:\n\n1. Key Points - A bulleted list of the most \
important findings\n2. Overview - A brief introduction to the topic\n3. Detailed Analysis - \
Organized into logical sections\n4. Survey Note (optional) - For more comprehensive reports\n5. \
Key Citations - List all references at the end\n\nFor citations, DO NOT include inline citations \
in the text. Instead, place all citations in the 'Key Citations' section at the end using the \
format: `- [Source Title](URL)`. Include an empty line between each citation for better \
readability.\n\nPRIORITIZE USING MARKDOWN TABLES for data presentation and comparison. Use tables \
whenever presenting comparative data, statistics, features, or options. Structure tables with \
clear headers and aligned columns.";

/// Worker input for the step at `index`: earlier findings, then the task.
pub fn step_input(plan: &Plan, index: usize, locale: &str, role: AgentRole) -> Vec<ChatMessage> {
    let mut content = String::new();
    let completed: Vec<_> = plan.steps[..index.min(plan.steps.len())]
        .iter()
        .filter_map(|s| s.execution_res().map(|res| (s.title.as_str(), res)))
        .collect();
    if !completed.is_empty() {
        content.push_str("# Existing Research Findings\n\n");
        for (i, (title, res)) in completed.iter().enumerate() {
            content.push_str(&format!("## Existing Finding {}: {}\n\n", i + 1, title));
            content.push_str(&format!("<finding>\n{res}\n</finding>\n\n"));
        }
    }

    if let Some(step) = plan.steps.get(index) {
        content.push_str(&format!(
            "# Current Task\n\n## Title\n\n{}\n\n## Description\n\n{}\n\n## Locale\n\n{}",
            step.title, step.description, locale
        ));
    }

    let mut messages = vec![ChatMessage::user(content)];
    if role == AgentRole::Researcher {
        messages.push(ChatMessage::user(CITATION_REMINDER).named("system"));
    }
    messages
}

/// Title and description a report is written against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBrief {
    pub title: String,
    pub thought: String,
}

impl ReportBrief {
    /// From the approved or draft plan, else from the user's last request.
    pub fn from_state(state: &WorkflowState) -> Self {
        match state.reportable_plan() {
            Some(plan) => Self {
                title: plan.title,
                thought: plan.thought,
            },
            None => Self {
                title: state
                    .last_user_message()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                thought: String::new(),
            },
        }
    }
}

/// Messages for the plain reporter.
pub fn reporter_messages(
    prompts: &dyn PromptRenderer,
    state: &WorkflowState,
    vars: PromptVars<'_>,
) -> Vec<ChatMessage> {
    let brief = ReportBrief::from_state(state);
    let mut view = WorkflowState::new(
        format!(
            "# Research Requirements\n\n## Task\n\n{}\n\n## Description\n\n{}",
            brief.title, brief.thought
        ),
        state.flags,
    );
    view.locale = state.locale.clone();

    let mut messages = prompts.render("reporter", &view, vars);
    messages.push(ChatMessage::user(REPORT_STRUCTURE_REMINDER).named("system"));
    for observation in state.observations() {
        messages.push(
            ChatMessage::user(format!(
                "Below are some observations for the research task:\n\n{observation}"
            ))
            .named("observation"),
        );
    }
    messages
}

/// Task message for the tool-using reporter.
pub fn enhanced_report_input(state: &WorkflowState) -> ChatMessage {
    let brief = ReportBrief::from_state(state);
    let findings = state
        .observations()
        .iter()
        .enumerate()
        .map(|(i, obs)| format!("### Finding {}\n{}", i + 1, obs))
        .collect::<Vec<_>>()
        .join("\n\n");
    ChatMessage::user(format!(
        "# Report Generation Task\n\n## Research Topic\n\n{}\n\n## Research Description\n\n{}\n\n\
         ## Research Findings\n\n{}\n\n## Instructions\n\nGenerate a comprehensive research report \
         based on the above findings. Use available tools to verify key facts, fill information \
         gaps, and enhance the report quality. Ensure all information is accurate and up-to-date.\
         \n\n## Locale\n\n{}",
        brief.title, brief.thought, findings, state.locale
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CurrentPlan, Step, StepType};
    use crate::workflow::state::{StatePatch, StepResult, WorkflowFlags};

    fn plan() -> Plan {
        Plan {
            locale: "en-US".into(),
            has_enough_context: false,
            thought: "Understand EV adoption".into(),
            title: "EV report".into(),
            steps: vec![
                Step::new("Collect", "Find sales figures", StepType::Research),
                Step::new("Model", "Fit a curve", StepType::Processing),
            ],
        }
    }

    fn vars(config: &WorkflowConfig) -> PromptVars<'_> {
        PromptVars {
            config,
            tools_section: "(no external tools are currently available)",
        }
    }

    #[test]
    fn test_step_input_first_step_researcher() {
        let messages = step_input(&plan(), 0, "en-US", AgentRole::Researcher);
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].content.contains("Existing Research Findings"));
        assert!(messages[0].content.contains("## Title\n\nCollect"));
        assert!(messages[0].content.ends_with("## Locale\n\nen-US"));
        assert_eq!(messages[1].name.as_deref(), Some("system"));
    }

    #[test]
    fn test_step_input_includes_findings_for_coder() {
        let mut plan = plan();
        plan.record_step_result(0, "120k units").unwrap();
        let messages = step_input(&plan, 1, "zh-CN", AgentRole::Coder);
        assert_eq!(messages.len(), 1);
        let content = &messages[0].content;
        assert!(content.starts_with("# Existing Research Findings"));
        assert!(content.contains("## Existing Finding 1: Collect\n\n<finding>\n120k units\n</finding>"));
        assert!(content.contains("## Locale\n\nzh-CN"));
    }

    #[test]
    fn test_basic_prompts_planner_mentions_limits() {
        let config = WorkflowConfig::default();
        let state = WorkflowState::new("q", WorkflowFlags::default());
        let messages = BasicPrompts.render("planner", &state, vars(&config));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("at most 3 steps"));
        assert!(messages[0].content.contains("no external tools"));
        assert_eq!(messages[1].content, "q");
    }

    #[test]
    fn test_reporter_messages() {
        let config = WorkflowConfig::default();
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.current_plan = CurrentPlan::Approved(plan());
        state
            .apply(StatePatch {
                step_result: Some(StepResult {
                    index: 0,
                    role: AgentRole::Researcher,
                    content: "obs one".into(),
                }),
                ..Default::default()
            })
            .unwrap();

        let messages = reporter_messages(&BasicPrompts, &state, vars(&config));
        assert!(messages[1].content.contains("## Task\n\nEV report"));
        let last = messages.last().unwrap();
        assert_eq!(last.name.as_deref(), Some("observation"));
        assert!(last.content.ends_with("obs one"));
        assert!(messages.iter().any(|m| m.content == REPORT_STRUCTURE_REMINDER));
    }

    #[test]
    fn test_brief_without_plan_uses_request() {
        let state = WorkflowState::new("Why is the sky blue?", WorkflowFlags::default());
        let brief = ReportBrief::from_state(&state);
        assert_eq!(brief.title, "Why is the sky blue?");
        assert!(brief.thought.is_empty());
    }

    #[test]
    fn test_enhanced_report_input() {
        let mut state = WorkflowState::new("q", WorkflowFlags::default());
        state.current_plan = CurrentPlan::Approved(plan());
        let msg = enhanced_report_input(&state);
        assert!(msg.content.starts_with("# Report Generation Task"));
        assert!(msg.content.contains("## Research Topic\n\nEV report"));
    }
}
