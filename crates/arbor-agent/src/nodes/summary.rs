use futures::future::BoxFuture;
use tracing::warn;

use arbor_core::state::{AgentState, StateUpdate};
use arbor_core::types::{ChatMessage, ModelRequest};

use super::model_error;
use crate::graph::node::{Node, NodeId};
use crate::model::BoundModel;
use crate::prompt::{format_plan, format_tool_history, DEFAULT_SUMMARY_PROMPT};

/// Terminal node: writes the final answer from what is already in state.
///
/// Does not advance the step counter. Grounding in the supplied context is
/// requested from the model, not verified.
pub struct SummaryNode {
    model: BoundModel,
    prompt: String,
}

impl SummaryNode {
    pub fn new(model: BoundModel) -> Self {
        Self {
            model,
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

fn or_placeholder(text: String, placeholder: &str) -> String {
    if text.trim().is_empty() {
        placeholder.to_string()
    } else {
        text
    }
}

fn summary_context(state: &AgentState) -> String {
    format!(
        "Objective: {}\n\nPlan:\n{}\n\nTool outputs:\n{}\n\nReasoning:\n{}",
        state.objective,
        or_placeholder(format_plan(state.plan.as_ref()), "No plan."),
        or_placeholder(format_tool_history(&state.tool_history), "No tool outputs."),
        or_placeholder(
            state.reasoning_summary.clone().unwrap_or_default(),
            "No reasoning summary available."
        ),
    )
}

impl Node for SummaryNode {
    fn id(&self) -> NodeId {
        NodeId::Summary
    }

    fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate> {
        Box::pin(async move {
            let request = ModelRequest::new(
                self.prompt.clone(),
                vec![ChatMessage::human(summary_context(state))],
            );
            match self.model.invoke(request).await {
                Ok(response) => StateUpdate::new()
                    .message(ChatMessage::assistant_text(response.content))
                    .tokens(response.usage.total()),
                Err(e) => {
                    warn!(error = %e, "Summary model call failed");
                    StateUpdate::new().error(model_error(&e))
                }
            }
        })
    }
}
