//! Assembly of a complete agent graph from models, tools and a topology choice.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use arbor_core::config::ModelRole;
use arbor_core::error::{ArborError, Result};
use arbor_core::event::EventBus;
use arbor_core::state::Action;
use arbor_core::types::ToolChoice;
use arbor_tools::{ToolExecutor, ToolRegistry};

use crate::graph::executor::{GraphBuilder, GraphEngine, DEFAULT_RECURSION_LIMIT};
use crate::graph::node::NodeId;
use crate::graph::router::{Edge, Target};
use crate::model::BoundModel;
use crate::nodes::{
    PlannerNode, ReasoningNode, StepExecutorNode, SummaryNode, ToolCallerNode, ToolsNode,
};

/// Which node picks the next tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decider {
    /// Optional tool calls; no call escalates to reasoning.
    ToolCaller,
    /// Mandatory tool calls with the `route_decision` escape hatch.
    #[default]
    StepExecutor,
}

impl Decider {
    fn node_id(&self) -> NodeId {
        match self {
            Self::ToolCaller => NodeId::ToolCaller,
            Self::StepExecutor => NodeId::StepExecutor,
        }
    }
}

/// Builder for the standard agent topology:
///
/// ```text
/// [planner] -> decider -(tool_use)-> tools -> reasoning -(tool_use)-> decider
///                  \                               \
///                   `-(completed)-> summary <-------`-(completed)
/// ```
pub struct AgentGraphBuilder {
    name: String,
    prefix: Option<String>,
    agent_id: Option<String>,
    default_model: Option<BoundModel>,
    role_models: HashMap<ModelRole, BoundModel>,
    tools: Arc<ToolRegistry>,
    decider: Decider,
    planner: bool,
    tool_choice: ToolChoice,
    prompts: HashMap<NodeId, String>,
    recursion_limit: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentGraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            agent_id: None,
            default_model: None,
            role_models: HashMap::new(),
            tools: Arc::new(ToolRegistry::new()),
            decider: Decider::default(),
            planner: false,
            tool_choice: ToolChoice::Auto,
            prompts: HashMap::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            event_bus: None,
        }
    }

    /// Model used by every role without an explicit override.
    pub fn with_model(mut self, model: BoundModel) -> Self {
        self.default_model = Some(model);
        self
    }

    pub fn with_role_model(mut self, role: ModelRole, model: BoundModel) -> Self {
        self.role_models.insert(role, model);
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_decider(mut self, decider: Decider) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_planner(mut self, enabled: bool) -> Self {
        self.planner = enabled;
        self
    }

    /// Tool-choice mode for the tool-caller. The step executor always
    /// requires a call.
    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    /// Replace the system prompt of one node.
    pub fn with_system_prompt(mut self, node: NodeId, prompt: impl Into<String>) -> Self {
        self.prompts.insert(node, prompt.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Role override, else the default model, else a configuration error.
    fn model_for(&self, role: ModelRole) -> Result<BoundModel> {
        self.role_models
            .get(&role)
            .or(self.default_model.as_ref())
            .cloned()
            .ok_or_else(|| ArborError::MissingModel(role.as_str().to_string()))
    }

    fn prompt_for(&self, node: NodeId) -> Option<&str> {
        self.prompts.get(&node).map(|p| p.as_str())
    }

    pub fn build(self) -> Result<GraphEngine> {
        let decider = self.decider.node_id();
        let entry = if self.planner { NodeId::Planner } else { decider };
        let definitions = self.tools.definitions();

        let mut executor = ToolExecutor::new(Arc::clone(&self.tools));
        if let Some(bus) = &self.event_bus {
            executor = executor.with_event_bus(Arc::clone(bus));
        }

        let mut graph = GraphBuilder::new(self.name.clone(), entry, NodeId::Summary)
            .with_recursion_limit(self.recursion_limit);

        if self.planner {
            let mut planner = PlannerNode::new(self.model_for(ModelRole::Planning)?)
                .with_catalog(self.tools.catalog_text());
            if let Some(p) = self.prompt_for(NodeId::Planner) {
                planner = planner.with_prompt(p);
            }
            graph = graph.add_node(planner).add_edge(
                NodeId::Planner,
                Edge::conditional(&[(Action::Completed, NodeId::Summary)], Some(decider)),
            );
        }

        let decider_model = self.model_for(ModelRole::ToolCaller)?;
        graph = match self.decider {
            Decider::ToolCaller => {
                let mut node = ToolCallerNode::new(decider_model, definitions)
                    .with_tool_choice(self.tool_choice);
                if let Some(p) = self.prompt_for(NodeId::ToolCaller) {
                    node = node.with_prompt(p);
                }
                graph.add_node(node).add_edge(
                    NodeId::ToolCaller,
                    Edge::conditional(
                        &[
                            (Action::ToolUse, NodeId::Tools),
                            (Action::NoTool, NodeId::Reasoning),
                            (Action::Completed, NodeId::Summary),
                        ],
                        None,
                    ),
                )
            }
            Decider::StepExecutor => {
                let mut node = StepExecutorNode::new(decider_model, definitions);
                if let Some(p) = self.prompt_for(NodeId::StepExecutor) {
                    node = node.with_prompt(p);
                }
                let replan = if self.planner { NodeId::Planner } else { NodeId::Reasoning };
                graph.add_node(node).add_edge(
                    NodeId::StepExecutor,
                    Edge::conditional(
                        &[
                            (Action::ToolUse, NodeId::Tools),
                            (Action::Plan, replan),
                            (Action::NoTool, NodeId::Reasoning),
                            (Action::Completed, NodeId::Summary),
                        ],
                        None,
                    ),
                )
            }
        };

        let mut reasoning = ReasoningNode::new(self.model_for(ModelRole::Reasoning)?);
        if let Some(p) = self.prompt_for(NodeId::Reasoning) {
            reasoning = reasoning.with_prompt(p);
        }
        let mut summary = SummaryNode::new(self.model_for(ModelRole::Answer)?);
        if let Some(p) = self.prompt_for(NodeId::Summary) {
            summary = summary.with_prompt(p);
        }

        graph = graph
            .add_node(ToolsNode::new(executor))
            .add_edge(NodeId::Tools, Edge::Static(Target::Node(NodeId::Reasoning)))
            .add_node(reasoning)
            .add_edge(
                NodeId::Reasoning,
                Edge::conditional(
                    &[
                        (Action::ToolUse, decider),
                        (Action::Completed, NodeId::Summary),
                    ],
                    None,
                ),
            )
            .add_node(summary)
            .add_edge(NodeId::Summary, Edge::Static(Target::End));

        if let Some(prefix) = self.prefix {
            graph = graph.with_prefix(prefix);
        }
        if let Some(agent_id) = self.agent_id {
            graph = graph.with_agent_id(agent_id);
        }
        if let Some(bus) = self.event_bus {
            graph = graph.with_event_bus(bus);
        }

        debug!(
            graph = %self.name,
            planner = self.planner,
            decider = %decider,
            tools = self.tools.len(),
            "Assembling agent graph"
        );
        graph.build()
    }
}
