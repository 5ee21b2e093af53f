use futures::future::BoxFuture;
use tracing::{debug, warn};

use arbor_core::state::{Action, AgentState, StateUpdate};
use arbor_core::types::{ChatMessage, ModelRequest, ToolChoice, ToolDefinition};

use super::{model_error, section};
use crate::graph::node::{Node, NodeId};
use crate::model::BoundModel;
use crate::prompt::{format_plan, format_tool_history, with_context, DEFAULT_TOOL_CALLER_PROMPT};

const LOOP_GUARD_REASON: &str =
    "No tool call emitted on this or the previous step; completing to avoid a loop.";

/// Asks the model for tool calls, offering the registry's tools.
pub struct ToolCallerNode {
    model: BoundModel,
    tools: Vec<ToolDefinition>,
    tool_choice: ToolChoice,
    prompt: String,
}

impl ToolCallerNode {
    pub fn new(model: BoundModel, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model,
            tools,
            tool_choice: ToolChoice::Auto,
            prompt: DEFAULT_TOOL_CALLER_PROMPT.to_string(),
        }
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    fn system_prompt(&self, state: &AgentState) -> String {
        with_context(
            &self.prompt,
            &[
                section("Plan", &format_plan(state.plan.as_ref())),
                section("Tool outputs", &format_tool_history(&state.tool_history)),
                section(
                    "Latest reasoning",
                    state.reasoning_summary.as_deref().unwrap_or_default(),
                ),
            ],
        )
    }
}

impl Node for ToolCallerNode {
    fn id(&self) -> NodeId {
        NodeId::ToolCaller
    }

    fn actions(&self) -> &'static [Action] {
        &[Action::ToolUse, Action::NoTool, Action::Completed]
    }

    fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate> {
        Box::pin(async move {
            let request = ModelRequest::new(self.system_prompt(state), state.conversation.clone())
                .with_tools(self.tools.clone(), self.tool_choice);

            let update = StateUpdate::new().advance(state);
            let response = match self.model.invoke(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Tool-caller model call failed");
                    return update
                        .error(model_error(&e))
                        .decision(Action::NoTool, "Tool-caller failed; defaulting to reasoning.");
                }
            };
            let update = update.tokens(response.usage.total());

            if !response.tool_calls.is_empty() {
                debug!(calls = response.tool_calls.len(), "Tool calls emitted");
                return update
                    .message(ChatMessage::assistant_with_calls(
                        response.content.clone(),
                        &response.tool_calls,
                    ))
                    .decision(Action::ToolUse, "Tool call emitted.")
                    .no_tool_streak(0);
            }

            let mut update = update.no_tool_streak(state.no_tool_streak + 1);
            if !response.content.trim().is_empty() {
                update = update.message(ChatMessage::assistant_text(response.content));
            }
            if state.no_tool_streak >= 1 {
                debug!(streak = state.no_tool_streak, "Loop guard engaged");
                update.decision(Action::Completed, LOOP_GUARD_REASON)
            } else {
                update.decision(Action::NoTool, "No tool call emitted.")
            }
        })
    }
}
