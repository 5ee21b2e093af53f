use futures::future::BoxFuture;
use tracing::{debug, warn};

use arbor_core::state::{Action, AgentError, AgentState, StateUpdate};
use arbor_core::types::{ChatMessage, ModelRequest};

use super::{model_error, section};
use crate::graph::node::{Node, NodeId};
use crate::model::BoundModel;
use crate::prompt::{format_plan, format_tool_history, with_context, DEFAULT_REASONING_PROMPT};
use crate::structured::{parse_reasoning, reasoning_schema};

const LOOP_GUARD_REASON: &str =
    "No tool call emitted on the previous step; completing to avoid a loop.";

/// Reflects on the plan and tool outputs, then decides whether more tool
/// data is needed.
pub struct ReasoningNode {
    model: BoundModel,
    prompt: String,
}

impl ReasoningNode {
    pub fn new(model: BoundModel) -> Self {
        Self {
            model,
            prompt: DEFAULT_REASONING_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

impl Node for ReasoningNode {
    fn id(&self) -> NodeId {
        NodeId::Reasoning
    }

    fn actions(&self) -> &'static [Action] {
        &[Action::ToolUse, Action::Completed]
    }

    fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate> {
        Box::pin(async move {
            let system = with_context(
                &self.prompt,
                &[
                    format!("Objective: {}", state.objective),
                    section("Plan", &format_plan(state.plan.as_ref())),
                    section("Tool outputs", &format_tool_history(&state.tool_history)),
                ],
            );
            let request = ModelRequest::new(system, state.conversation.clone())
                .with_structured("reasoning", reasoning_schema());

            let update = StateUpdate::new().advance(state);
            let response = match self.model.invoke(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Reasoning model call failed");
                    return update
                        .error(model_error(&e))
                        .decision(Action::Completed, "Reasoning failed; defaulting to completed.");
                }
            };
            let update = update.tokens(response.usage.total());

            let payload = match parse_reasoning(response.structured.as_ref()) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Reasoning returned an invalid payload");
                    return update.error(AgentError::from(&e)).decision(
                        Action::Completed,
                        "Reasoning payload invalid; defaulting to completed.",
                    );
                }
            };

            let (action, reason) = if payload.action == Action::ToolUse && state.no_tool_streak >= 1 {
                debug!(streak = state.no_tool_streak, "Loop guard overrode tool_use");
                (Action::Completed, LOOP_GUARD_REASON.to_string())
            } else {
                let reason = payload
                    .reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| format!("Reasoning chose {}.", payload.action));
                (payload.action, reason)
            };

            update
                .message(ChatMessage::assistant_text(format!(
                    "Reasoning: {}\nTool relevance: {}",
                    payload.summary,
                    payload.tool_relevance.as_str()
                )))
                .reasoning_summary(payload.summary)
                .decision(action, reason)
        })
    }
}
