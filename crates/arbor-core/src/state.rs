//! The run state threaded through every graph node.
//!
//! Nodes never mutate an `AgentState`. They return a sparse `StateUpdate`
//! and the engine folds it into a new state value with `AgentState::apply`,
//! using the per-field reducers declared in [`FIELD_REDUCERS`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArborError;
use crate::types::{ChatMessage, Role, RunId, ToolCall};

/// How a field combines its prior value with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Last write wins; absent means unchanged.
    Overwrite,
    /// Last write wins but the value never decreases.
    Monotonic,
    /// New items are appended in order.
    Append,
    /// Values are added.
    Sum,
}

/// Reducer declared for each mergeable field.
pub const FIELD_REDUCERS: &[(&str, Reducer)] = &[
    ("conversation", Reducer::Append),
    ("plan", Reducer::Overwrite),
    ("decision", Reducer::Overwrite),
    ("step_count", Reducer::Monotonic),
    ("no_tool_streak", Reducer::Overwrite),
    ("tool_history", Reducer::Append),
    ("total_tokens", Reducer::Sum),
    ("errors", Reducer::Append),
    ("reasoning_summary", Reducer::Overwrite),
];

/// Status of a plan step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    #[serde(alias = "completed")]
    Done,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<Step>,
    pub updated_at: DateTime<Utc>,
}

/// Routing action carried by a decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Plan,
    ToolUse,
    #[serde(alias = "reasoning", alias = "reflect")]
    NoTool,
    Completed,
}

impl Action {
    pub const ALL: [Action; 4] = [Self::Plan, Self::ToolUse, Self::NoTool, Self::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::ToolUse => "tool_use",
            Self::NoTool => "no_tool",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
}

impl Decision {
    pub fn new(action: Action, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Ok {
        data: serde_json::Value,
        duration_ms: u64,
    },
    Failed {
        code: String,
        message: String,
        recoverable: bool,
        duration_ms: u64,
    },
}

impl ToolResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self::Ok {
            data,
            duration_ms: 0,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self::Failed {
            code: code.into(),
            message: message.into(),
            recoverable,
            duration_ms: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Ok { data, .. } => Some(data),
            Self::Failed { .. } => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Failed { code, .. } => Some(code),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Ok { duration_ms, .. } | Self::Failed { duration_ms, .. } => *duration_ms,
        }
    }

    /// Replace the recorded duration.
    pub fn with_duration(mut self, ms: u64) -> Self {
        match &mut self {
            Self::Ok { duration_ms, .. } | Self::Failed { duration_ms, .. } => *duration_ms = ms,
        }
        self
    }

    /// Text handed back to the model as the tool turn content.
    pub fn to_content(&self) -> String {
        match self {
            Self::Ok { data, .. } => match data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Failed { code, message, .. } => format!("{}: {}", code, message),
        }
    }
}

/// One recorded attempt to call a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub result: ToolResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentErrorKind {
    Model,
    Tool,
    Validation,
    Timeout,
    RateLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable,
        }
    }

    /// A failed model invocation. Always recoverable at the node boundary.
    pub fn model(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Model, message, true)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Tool, message, false)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Validation, message, false)
    }
}

impl From<&ArborError> for AgentError {
    fn from(e: &ArborError) -> Self {
        Self::new(e.agent_error_kind(), e.to_string(), e.is_recoverable())
    }
}

/// The record carried through one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub agent_id: String,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub objective: String,
    pub conversation: Vec<ChatMessage>,
    pub plan: Option<Plan>,
    pub decision: Option<Decision>,
    pub step_count: u32,
    pub max_steps: u32,
    pub no_tool_streak: u32,
    pub tool_history: Vec<ToolInvocation>,
    pub total_tokens: u64,
    pub errors: Vec<AgentError>,
    pub reasoning_summary: Option<String>,
}

impl AgentState {
    /// Fresh state: zero counters, empty histories.
    pub fn new(objective: impl Into<String>, max_steps: u32) -> Self {
        Self {
            agent_id: "agent".to_string(),
            run_id: RunId::new(),
            started_at: Utc::now(),
            objective: objective.into(),
            conversation: Vec::new(),
            plan: None,
            decision: None,
            step_count: 0,
            max_steps,
            no_tool_streak: 0,
            tool_history: Vec::new(),
            total_tokens: 0,
            errors: Vec::new(),
            reasoning_summary: None,
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_conversation(mut self, messages: Vec<ChatMessage>) -> Self {
        self.conversation = messages;
        self
    }

    /// Produce the next state by folding `update` in with the field reducers.
    pub fn apply(&self, update: StateUpdate) -> AgentState {
        let mut next = self.clone();

        next.conversation.extend(update.conversation);
        if let Some(plan) = update.plan {
            next.plan = Some(plan);
        }
        if let Some(decision) = update.decision {
            next.decision = Some(decision);
        }
        if let Some(step) = update.step_count {
            next.step_count = next.step_count.max(step);
        }
        if let Some(streak) = update.no_tool_streak {
            next.no_tool_streak = streak;
        }
        next.tool_history.extend(update.tool_history);
        next.total_tokens += update.total_tokens;
        next.errors.extend(update.errors);
        if let Some(summary) = update.reasoning_summary {
            next.reasoning_summary = Some(summary);
        }

        next
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step_count >= self.max_steps
    }

    /// Text of the most recent assistant turn that has any.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.conversation
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .find(|t| !t.trim().is_empty())
    }

    /// Tool calls from the latest assistant turn that no tool turn has answered yet.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        for msg in self.conversation.iter().rev() {
            match msg.role {
                Role::Tool => return Vec::new(),
                Role::Assistant if msg.has_tool_calls() => return msg.tool_calls(),
                _ => continue,
            }
        }
        Vec::new()
    }
}

/// A sparse set of field changes produced by one node visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_tool_streak: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_history: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AgentError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the step counter by one relative to `state`.
    pub fn advance(mut self, state: &AgentState) -> Self {
        self.step_count = Some(state.step_count + 1);
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.conversation.push(message);
        self
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn decision(mut self, action: Action, reason: impl Into<String>) -> Self {
        self.decision = Some(Decision::new(action, reason));
        self
    }

    pub fn no_tool_streak(mut self, streak: u32) -> Self {
        self.no_tool_streak = Some(streak);
        self
    }

    pub fn tokens(mut self, tokens: u64) -> Self {
        self.total_tokens += tokens;
        self
    }

    pub fn error(mut self, error: AgentError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.tool_history.extend(invocations);
        self
    }

    pub fn reasoning_summary(mut self, summary: impl Into<String>) -> Self {
        self.reasoning_summary = Some(summary.into());
        self
    }

    /// Combine two sequential updates into one with the same effect.
    pub fn merge(mut self, later: StateUpdate) -> StateUpdate {
        self.conversation.extend(later.conversation);
        if later.plan.is_some() {
            self.plan = later.plan;
        }
        if later.decision.is_some() {
            self.decision = later.decision;
        }
        self.step_count = match (self.step_count, later.step_count) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => b.or(a),
        };
        if later.no_tool_streak.is_some() {
            self.no_tool_streak = later.no_tool_streak;
        }
        self.tool_history.extend(later.tool_history);
        self.total_tokens += later.total_tokens;
        self.errors.extend(later.errors);
        if later.reasoning_summary.is_some() {
            self.reasoning_summary = later.reasoning_summary;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == StateUpdate::default()
    }
}
