//! Typed payloads for structured model output.
//!
//! Model output is untrusted: every payload is deserialized into a closed
//! type and validated, and anything malformed becomes
//! `ArborError::InvalidPayload` for the calling node to record as a
//! `Validation` error.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use arbor_core::error::{ArborError, Result};
use arbor_core::state::{Action, Plan, Step, StepStatus};

pub const MIN_PLAN_STEPS: usize = 2;
pub const MAX_PLAN_STEPS: usize = 4;
pub const ROUTE_DECISION_TOOL: &str = "route_decision";

fn invalid(payload: &str, message: impl Into<String>) -> ArborError {
    ArborError::InvalidPayload {
        payload: payload.to_string(),
        message: message.into(),
    }
}

// ── Plan ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPayload {
    pub goal: String,
    pub steps: Vec<PlanStepPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStepPayload {
    pub description: String,
    #[serde(default)]
    pub status: Option<StepStatus>,
    #[serde(default)]
    pub tool_hint: Option<String>,
}

pub fn plan_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "goal": { "type": "string" },
            "steps": {
                "type": "array",
                "minItems": MIN_PLAN_STEPS,
                "items": {
                    "type": "object",
                    "properties": {
                        "description": { "type": "string" },
                        "status": { "type": "string", "enum": ["pending", "completed", "failed"] },
                        "toolHint": { "type": ["string", "null"] }
                    },
                    "required": ["description", "status"]
                }
            }
        },
        "required": ["goal", "steps"]
    })
}

/// Validated plan plus whether it had to be truncated.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub plan: Plan,
    pub truncated_from: Option<usize>,
}

/// Turn a raw plan payload into a `Plan`.
///
/// Fewer than two non-empty steps is invalid. Steps beyond the fourth are
/// dropped, every status is reset to pending and ids become `step-1..n`.
pub fn parse_plan(value: Option<&serde_json::Value>) -> Result<ValidatedPlan> {
    let value = value.ok_or_else(|| invalid("plan", "no structured output"))?;
    let payload: PlanPayload =
        serde_json::from_value(value.clone()).map_err(|e| invalid("plan", e.to_string()))?;

    let kept: Vec<&PlanStepPayload> = payload
        .steps
        .iter()
        .filter(|s| !s.description.trim().is_empty())
        .collect();
    if kept.len() < MIN_PLAN_STEPS {
        return Err(invalid(
            "plan",
            format!("plan needs at least {} steps, got {}", MIN_PLAN_STEPS, kept.len()),
        ));
    }

    let truncated_from = (kept.len() > MAX_PLAN_STEPS).then_some(kept.len());
    let steps = kept
        .into_iter()
        .take(MAX_PLAN_STEPS)
        .enumerate()
        .map(|(i, s)| Step {
            id: format!("step-{}", i + 1),
            description: s.description.trim().to_string(),
            status: StepStatus::Pending,
            tool_hint: s.tool_hint.clone().filter(|h| !h.trim().is_empty()),
        })
        .collect();

    Ok(ValidatedPlan {
        plan: Plan {
            goal: payload.goal,
            steps,
            updated_at: Utc::now(),
        },
        truncated_from,
    })
}

// ── Reasoning ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRelevance {
    Relevant,
    NotRelevant,
    NoTools,
}

impl ToolRelevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevant => "relevant",
            Self::NotRelevant => "not_relevant",
            Self::NoTools => "no_tools",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningPayload {
    pub summary: String,
    pub tool_relevance: ToolRelevance,
    pub action: Action,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn reasoning_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "toolRelevance": { "type": "string", "enum": ["relevant", "not_relevant", "no_tools"] },
            "action": { "type": "string", "enum": ["tool_use", "completed"] },
            "reason": { "type": ["string", "null"] }
        },
        "required": ["summary", "toolRelevance", "action"]
    })
}

pub fn parse_reasoning(value: Option<&serde_json::Value>) -> Result<ReasoningPayload> {
    let value = value.ok_or_else(|| invalid("reasoning", "no structured output"))?;
    let payload: ReasoningPayload =
        serde_json::from_value(value.clone()).map_err(|e| invalid("reasoning", e.to_string()))?;
    match payload.action {
        Action::ToolUse | Action::Completed => Ok(payload),
        other => Err(invalid(
            "reasoning",
            format!("action '{}' is not one of tool_use, completed", other),
        )),
    }
}

// ── Route decision ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RouteDecisionPayload {
    #[serde(default)]
    pub reason: Option<String>,
    pub action: Action,
}

pub fn route_decision_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "reason": { "type": "string" },
            "action": { "type": "string", "enum": ["plan", "completed"] }
        },
        "required": ["action"]
    })
}

pub fn parse_route_decision(args: &serde_json::Value) -> Result<RouteDecisionPayload> {
    let payload: RouteDecisionPayload = serde_json::from_value(args.clone())
        .map_err(|e| invalid(ROUTE_DECISION_TOOL, e.to_string()))?;
    match payload.action {
        Action::Plan | Action::Completed => Ok(payload),
        other => Err(invalid(
            ROUTE_DECISION_TOOL,
            format!("action '{}' is not one of plan, completed", other),
        )),
    }
}
