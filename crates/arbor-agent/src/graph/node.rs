use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use arbor_core::state::{Action, AgentState, StateUpdate};

/// Identifier of a node in an agent graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Planner,
    ToolCaller,
    StepExecutor,
    Tools,
    Reasoning,
    Summary,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::ToolCaller => "tool_caller",
            Self::StepExecutor => "step_executor",
            Self::Tools => "tools",
            Self::Reasoning => "reasoning",
            Self::Summary => "summary",
        }
    }

    /// Display label, `prefix.node` when the graph carries a prefix.
    pub fn label(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(p) if !p.is_empty() => format!("{}.{}", p, self.as_str()),
            _ => self.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in the graph.
///
/// `run` must never fail: problems from external calls are folded into the
/// returned update as `errors` plus a safe-default decision.
pub trait Node: Send + Sync + 'static {
    fn id(&self) -> NodeId;

    /// Every action this node may put in its decision. The router refuses
    /// to build a graph that leaves one of these without a route.
    fn actions(&self) -> &'static [Action] {
        &[]
    }

    fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate>;
}
