use futures::future::BoxFuture;
use tracing::{info, warn};

use arbor_core::state::{Action, AgentError, AgentState, StateUpdate};
use arbor_core::types::{ChatMessage, ModelRequest};

use super::{model_error, section};
use crate::graph::node::{Node, NodeId};
use crate::model::BoundModel;
use crate::prompt::{with_context, DEFAULT_PLANNING_PROMPT};
use crate::structured::{parse_plan, plan_schema};

/// Drafts a short plan for the objective.
///
/// A successful plan carries no decision: the edge out of the planner
/// defaults to the decider node. Failures decide `completed`.
pub struct PlannerNode {
    model: BoundModel,
    prompt: String,
    catalog: String,
}

impl PlannerNode {
    pub fn new(model: BoundModel) -> Self {
        Self {
            model,
            prompt: DEFAULT_PLANNING_PROMPT.to_string(),
            catalog: String::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// `- name: description` lines listing the tools the plan may hint at.
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }
}

impl Node for PlannerNode {
    fn id(&self) -> NodeId {
        NodeId::Planner
    }

    fn actions(&self) -> &'static [Action] {
        &[Action::Completed]
    }

    fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate> {
        Box::pin(async move {
            let system = with_context(
                &self.prompt,
                &[
                    section("Available tools", &self.catalog),
                    format!("Objective: {}", state.objective),
                ],
            );
            let request = ModelRequest::new(system, state.conversation.clone())
                .with_structured("plan", plan_schema());

            let update = StateUpdate::new().advance(state);
            let response = match self.model.invoke(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Planner model call failed");
                    return update
                        .error(model_error(&e))
                        .decision(Action::Completed, "Planning failed; defaulting to completed.");
                }
            };
            let update = update.tokens(response.usage.total());

            match parse_plan(response.structured.as_ref()) {
                Ok(validated) => {
                    if let Some(n) = validated.truncated_from {
                        warn!(steps = n, kept = validated.plan.steps.len(), "Plan truncated");
                    }
                    let outline = validated
                        .plan
                        .steps
                        .iter()
                        .map(|s| s.description.as_str())
                        .collect::<Vec<_>>()
                        .join(" | ");
                    info!(steps = validated.plan.steps.len(), "Plan created");
                    update
                        .message(ChatMessage::assistant_text(format!("Plan created: {}", outline)))
                        .plan(validated.plan)
                }
                Err(e) => {
                    warn!(error = %e, "Planner returned an invalid plan");
                    update
                        .error(AgentError::from(&e))
                        .decision(Action::Completed, "Planner produced no usable plan; defaulting to completed.")
                }
            }
        })
    }
}
