//! Plan and step model.
//!
//! A [`Plan`] is produced once by the planner and then consumed one step at a
//! time. Steps are never reordered or removed; each step's `execution_res`
//! is written exactly once.
//!
//! The planner's raw output crosses the model boundary as JSON. It is kept as
//! text ([`CurrentPlan::Draft`]) until it is validated into a typed plan
//! ([`CurrentPlan::Approved`]).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::PlanError;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").unwrap());

/// The kind of work a step performs, which decides the worker it is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// Information gathering, routed to the researcher.
    Research,
    /// Computation or code, routed to the coder.
    Processing,
}

/// One unit of work within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub description: String,
    pub step_type: StepType,
    #[serde(default)]
    pub need_web_search: bool,
    #[serde(default)]
    execution_res: Option<String>,
}

impl Step {
    pub fn new(title: impl Into<String>, description: impl Into<String>, step_type: StepType) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            step_type,
            need_web_search: false,
            execution_res: None,
        }
    }

    pub fn execution_res(&self) -> Option<&str> {
        self.execution_res.as_deref()
    }

    pub fn is_executed(&self) -> bool {
        self.execution_res.is_some()
    }

    /// Record the worker's result. Irreversible: a second write is rejected.
    pub fn record_result(&mut self, result: impl Into<String>) -> Result<(), PlanError> {
        if self.execution_res.is_some() {
            return Err(PlanError::AlreadyExecuted {
                title: self.title.clone(),
            });
        }
        self.execution_res = Some(result.into());
        Ok(())
    }
}

/// Lifecycle position of an approved plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// At least one step is still waiting for a result.
    Executing,
    /// Every step has a result, or there are no steps at all.
    Complete,
}

/// The ordered task list for one research request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub locale: String,
    pub has_enough_context: bool,
    #[serde(default)]
    pub thought: String,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Validate a parsed JSON value into a typed plan.
    ///
    /// Any `execution_res` present in model output is discarded: results are
    /// only ever written by the step executor.
    pub fn from_value(value: Value) -> Result<Self, PlanError> {
        let mut plan: Plan =
            serde_json::from_value(value).map_err(|e| PlanError::Validation {
                message: e.to_string(),
            })?;
        if plan.locale.trim().is_empty() {
            return Err(PlanError::Validation {
                message: "locale must not be empty".into(),
            });
        }
        if plan.title.trim().is_empty() {
            return Err(PlanError::Validation {
                message: "title must not be empty".into(),
            });
        }
        for step in &mut plan.steps {
            step.execution_res = None;
        }
        Ok(plan)
    }

    /// Repair, parse and validate raw planner text.
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        Self::from_value(parse_plan_json(raw)?)
    }

    pub fn status(&self) -> PlanStatus {
        if self.next_unexecuted().is_none() {
            PlanStatus::Complete
        } else {
            PlanStatus::Executing
        }
    }

    /// Index and reference of the first step without a result.
    pub fn next_unexecuted(&self) -> Option<(usize, &Step)> {
        self.steps.iter().enumerate().find(|(_, s)| !s.is_executed())
    }

    /// Steps that already carry a result, in plan order.
    pub fn completed_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.is_executed())
    }

    /// Write a result into the step at `index`.
    pub fn record_step_result(&mut self, index: usize, result: impl Into<String>) -> Result<(), PlanError> {
        self.steps
            .get_mut(index)
            .ok_or(PlanError::StepOutOfRange { index })?
            .record_result(result)
    }
}

/// What the workflow currently holds as "the plan".
///
/// A plan waiting for review is kept as raw text so the exact model output
/// can be re-parsed on acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CurrentPlan {
    #[default]
    None,
    Draft(String),
    Approved(Plan),
}

impl CurrentPlan {
    pub fn approved(&self) -> Option<&Plan> {
        match self {
            CurrentPlan::Approved(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn approved_mut(&mut self) -> Option<&mut Plan> {
        match self {
            CurrentPlan::Approved(plan) => Some(plan),
            _ => None,
        }
    }
}

/// Best-effort cleanup of near-valid JSON produced by a model.
///
/// Strips a surrounding markdown code fence, isolates the outermost object
/// or array, and drops trailing commas outside of string literals. Text with
/// no JSON structure is returned trimmed and otherwise untouched.
pub fn repair_json_output(raw: &str) -> String {
    let mut content = raw.trim();
    if let Some(caps) = CODE_FENCE.captures(content)
        && let Some(inner) = caps.get(1)
    {
        content = inner.as_str().trim();
    }

    let bounds = match (content.find(['{', '[']), content.rfind(['}', ']'])) {
        (Some(start), Some(end)) if end > start => Some((start, end)),
        _ => None,
    };
    match bounds {
        Some((start, end)) => strip_trailing_commas(&content[start..=end]),
        None => content.to_string(),
    }
}

fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Repair and parse planner output into a JSON value.
pub fn parse_plan_json(raw: &str) -> Result<Value, PlanError> {
    serde_json::from_str(&repair_json_output(raw)).map_err(|e| PlanError::InvalidJson {
        message: e.to_string(),
    })
}
