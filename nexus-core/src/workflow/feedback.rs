//! Review tokens supplied by a human when a plan is waiting for approval.

use crate::error::WorkflowError;

const ACCEPTED: &str = "[ACCEPTED]";
const EDIT_PLAN: &str = "[EDIT_PLAN]";

/// A parsed review decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewToken {
    /// Proceed with the drafted plan. Carries the full feedback text.
    Accepted(String),
    /// Send the plan back to the planner. Carries the full feedback text.
    EditPlan(String),
}

fn has_prefix(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

impl ReviewToken {
    /// Parse a review value. The prefix match is case-insensitive; anything
    /// else is a protocol violation by the caller.
    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        let trimmed = value.trim_start();
        if has_prefix(trimmed, EDIT_PLAN) {
            Ok(ReviewToken::EditPlan(trimmed.to_string()))
        } else if has_prefix(trimmed, ACCEPTED) {
            Ok(ReviewToken::Accepted(trimmed.to_string()))
        } else {
            Err(WorkflowError::UnsupportedFeedback {
                value: value.to_string(),
            })
        }
    }
}
