use std::collections::HashMap;

use arbor_core::error::{ArborError, Result};
use arbor_core::state::{Action, AgentState, Decision};

use super::node::NodeId;

/// Where control goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    End,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{}", id),
            Self::End => f.write_str("end"),
        }
    }
}

/// Outgoing edge of one node.
#[derive(Debug, Clone)]
pub enum Edge {
    /// Always go to the same place; any decision in the update is ignored.
    Static(Target),
    /// Dispatch on the decision carried by the node's own update.
    ///
    /// `default` is taken when the update carries no decision. Without a
    /// default, a missing decision falls through to the terminal node.
    Conditional {
        routes: HashMap<Action, NodeId>,
        default: Option<NodeId>,
    },
}

impl Edge {
    pub fn conditional(routes: &[(Action, NodeId)], default: Option<NodeId>) -> Self {
        Self::Conditional {
            routes: routes.iter().copied().collect(),
            default,
        }
    }

    fn targets(&self) -> Vec<Target> {
        match self {
            Self::Static(t) => vec![*t],
            Self::Conditional { routes, default } => routes
                .values()
                .chain(default.iter())
                .map(|n| Target::Node(*n))
                .collect(),
        }
    }
}

/// Outcome of one routing evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub target: Target,
    /// The budget guard overrode the decision.
    pub forced: bool,
    /// A decision-routed node produced no decision.
    pub missing_decision: bool,
}

impl Route {
    fn to(target: Target) -> Self {
        Self {
            target,
            forced: false,
            missing_decision: false,
        }
    }
}

/// Transition table keyed by `(node, action)`.
#[derive(Debug, Clone)]
pub struct Router {
    edges: HashMap<NodeId, Edge>,
    terminal: NodeId,
}

impl Router {
    /// `terminal` is where the budget guard sends a run that is out of steps.
    pub fn new(terminal: NodeId) -> Self {
        Self {
            edges: HashMap::new(),
            terminal,
        }
    }

    pub fn terminal(&self) -> NodeId {
        self.terminal
    }

    pub fn add_edge(&mut self, from: NodeId, edge: Edge) {
        self.edges.insert(from, edge);
    }

    pub fn edge(&self, from: NodeId) -> Option<&Edge> {
        self.edges.get(&from)
    }

    /// Check the table against the nodes present and the actions each can emit.
    pub fn validate(
        &self,
        nodes: &[(NodeId, &'static [Action])],
        entry: NodeId,
    ) -> Result<()> {
        let present = |id: NodeId| nodes.iter().any(|(n, _)| *n == id);

        if !present(entry) {
            return Err(ArborError::GraphConfig(format!("entry node '{}' is not in the graph", entry)));
        }
        if !present(self.terminal) {
            return Err(ArborError::GraphConfig(format!(
                "terminal node '{}' is not in the graph",
                self.terminal
            )));
        }

        for (id, actions) in nodes {
            let edge = self
                .edges
                .get(id)
                .ok_or_else(|| ArborError::GraphConfig(format!("node '{}' has no outgoing edge", id)))?;

            for target in edge.targets() {
                if let Target::Node(next) = target {
                    if !present(next) {
                        return Err(ArborError::GraphConfig(format!(
                            "edge from '{}' targets unknown node '{}'",
                            id, next
                        )));
                    }
                }
            }

            match edge {
                Edge::Static(_) if !actions.is_empty() => {
                    return Err(ArborError::GraphConfig(format!(
                        "node '{}' emits decisions but has a static edge",
                        id
                    )));
                }
                Edge::Conditional { routes, .. } => {
                    if let Some(unmapped) = actions
                        .iter()
                        .find(|a| !routes.contains_key(*a))
                    {
                        return Err(ArborError::UnmappedAction {
                            node: id.to_string(),
                            action: unmapped.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        for from in self.edges.keys() {
            if !present(*from) {
                return Err(ArborError::GraphConfig(format!("edge declared for unknown node '{}'", from)));
            }
        }

        Ok(())
    }

    /// Choose the successor of `from`.
    ///
    /// `state` is the state after `from`'s update was merged and `decision` is
    /// the decision carried by that update, if any. The budget guard runs
    /// first for every non-terminal node.
    pub fn route(&self, from: NodeId, state: &AgentState, decision: Option<&Decision>) -> Result<Route> {
        if from != self.terminal && state.budget_exhausted() {
            return Ok(Route {
                target: Target::Node(self.terminal),
                forced: true,
                missing_decision: false,
            });
        }

        let edge = self
            .edges
            .get(&from)
            .ok_or_else(|| ArborError::GraphConfig(format!("node '{}' has no outgoing edge", from)))?;

        match edge {
            Edge::Static(target) => Ok(Route::to(*target)),
            Edge::Conditional { routes, default } => match decision {
                Some(d) => routes
                    .get(&d.action)
                    .map(|n| Route::to(Target::Node(*n)))
                    .ok_or_else(|| ArborError::UnmappedAction {
                        node: from.to_string(),
                        action: d.action.to_string(),
                    }),
                None => Ok(match default {
                    Some(n) => Route::to(Target::Node(*n)),
                    None => Route {
                        target: Target::Node(self.terminal),
                        forced: false,
                        missing_decision: true,
                    },
                }),
            },
        }
    }
}
