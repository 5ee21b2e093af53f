use futures::future::BoxFuture;
use tracing::{debug, warn};

use arbor_core::state::{Action, AgentError, AgentState, StateUpdate};
use arbor_core::types::{ChatMessage, ModelRequest, ToolCall, ToolChoice, ToolDefinition};

use super::{model_error, section};
use crate::graph::node::{Node, NodeId};
use crate::model::BoundModel;
use crate::prompt::{format_plan, format_tool_history, with_context, DEFAULT_STEP_EXECUTOR_PROMPT};
use crate::structured::{parse_route_decision, route_decision_schema, ROUTE_DECISION_TOOL};

/// Decider that must always call something: a real tool, or the
/// `route_decision` pseudo-tool when no tool is needed.
pub struct StepExecutorNode {
    model: BoundModel,
    tools: Vec<ToolDefinition>,
    prompt: String,
}

impl StepExecutorNode {
    pub fn new(model: BoundModel, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model,
            tools,
            prompt: DEFAULT_STEP_EXECUTOR_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    fn offered_tools(&self) -> Vec<ToolDefinition> {
        let mut tools = Vec::with_capacity(self.tools.len() + 1);
        tools.push(ToolDefinition {
            name: ROUTE_DECISION_TOOL.to_string(),
            description: "Call when no real tool is needed: choose to re-plan or to finish.".to_string(),
            input_schema: route_decision_schema(),
        });
        tools.extend(self.tools.iter().cloned());
        tools
    }
}

fn describe_calls(calls: &[ToolCall]) -> String {
    let parts: Vec<String> = calls
        .iter()
        .map(|c| format!("{} {}", c.name, c.arguments))
        .collect();
    format!("Tool calls requested: {}", parts.join("; "))
}

impl Node for StepExecutorNode {
    fn id(&self) -> NodeId {
        NodeId::StepExecutor
    }

    fn actions(&self) -> &'static [Action] {
        &[Action::ToolUse, Action::Plan, Action::Completed]
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
                .with_tools(self.offered_tools(), ToolChoice::Required);

            let update = StateUpdate::new().advance(state);
            let response = match self.model.invoke(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Step executor model call failed");
                    return update
                        .error(model_error(&e))
                        .decision(Action::Plan, "Step executor failed; defaulting to plan.");
                }
            };
            let mut update = update.tokens(response.usage.total());

            // A route decision wins over any real calls in the same turn.
            if let Some(route) = response
                .tool_calls
                .iter()
                .find(|c| c.name == ROUTE_DECISION_TOOL)
            {
                if !response.content.trim().is_empty() {
                    update = update.message(ChatMessage::assistant_text(response.content.clone()));
                }
                let update = update.no_tool_streak(state.no_tool_streak + 1);
                return match parse_route_decision(&route.arguments) {
                    Ok(payload) => {
                        debug!(action = %payload.action, "Route decision received");
                        let reason = payload
                            .reason
                            .unwrap_or_else(|| format!("Route decision: {}.", payload.action));
                        update.decision(payload.action, reason)
                    }
                    Err(e) => {
                        warn!(error = %e, "Malformed route decision");
                        update
                            .error(AgentError::from(&e))
                            .decision(Action::Plan, "Invalid route decision; defaulting to plan.")
                    }
                };
            }

            if response.tool_calls.is_empty() {
                if !response.content.trim().is_empty() {
                    update = update.message(ChatMessage::assistant_text(response.content));
                }
                return update
                    .no_tool_streak(state.no_tool_streak + 1)
                    .decision(Action::Plan, "No tool call returned; defaulting to plan.");
            }

            let reason = if response.content.trim().is_empty() {
                describe_calls(&response.tool_calls)
            } else {
                response.content.clone()
            };
            update
                .message(ChatMessage::assistant_with_calls(
                    response.content,
                    &response.tool_calls,
                ))
                .decision(Action::ToolUse, reason)
                .no_tool_streak(0)
        })
    }
}
