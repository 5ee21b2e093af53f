use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, warn};

use arbor_core::error::{ArborError, Result};
use arbor_core::event::{EventBus, TraceEvent};
use arbor_core::state::{Action, AgentError, AgentErrorKind, AgentState, StateUpdate};
use arbor_core::types::ChatMessage;

use super::node::{Node, NodeId};
use super::router::{Edge, Router, Target};

pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

/// Per-run limits.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Non-terminal node executions before the run is forced to the terminal node.
    pub max_steps: u32,
    /// Total node executions, terminal included.
    pub recursion_limit: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps: 10,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

/// What one engine step produced.
#[derive(Debug, Clone)]
pub struct StepSnapshot {
    /// `None` when the step was the recursion-limit stop rather than a node.
    pub node: Option<NodeId>,
    pub label: String,
    /// 1-based count of node executions so far.
    pub step_index: u32,
    pub delta: StateUpdate,
    pub state: AgentState,
}

/// Assembles and validates a `GraphEngine`.
pub struct GraphBuilder {
    name: String,
    prefix: Option<String>,
    agent_id: Option<String>,
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    duplicate: Option<NodeId>,
    edges: Vec<(NodeId, Edge)>,
    entry: NodeId,
    terminal: NodeId,
    recursion_limit: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, entry: NodeId, terminal: NodeId) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            agent_id: None,
            nodes: HashMap::new(),
            duplicate: None,
            edges: Vec::new(),
            entry,
            terminal,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            event_bus: None,
        }
    }

    pub fn add_node(mut self, node: impl Node) -> Self {
        self.add_node_arc(Arc::new(node));
        self
    }

    pub fn add_node_arc(&mut self, node: Arc<dyn Node>) {
        let id = node.id();
        if self.nodes.insert(id, node).is_some() {
            self.duplicate.get_or_insert(id);
        }
    }

    pub fn add_edge(mut self, from: NodeId, edge: Edge) -> Self {
        self.edges.push((from, edge));
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

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Validate the topology and produce an engine. Configuration errors
    /// surface here, before any run starts.
    pub fn build(self) -> Result<GraphEngine> {
        if let Some(id) = self.duplicate {
            return Err(ArborError::GraphConfig(format!("node '{}' added twice", id)));
        }
        if self.recursion_limit == 0 {
            return Err(ArborError::GraphConfig("recursion limit must be at least 1".into()));
        }

        let mut router = Router::new(self.terminal);
        for (from, edge) in self.edges {
            router.add_edge(from, edge);
        }

        let mut declared: Vec<(NodeId, &'static [Action])> =
            self.nodes.iter().map(|(id, n)| (*id, n.actions())).collect();
        declared.sort_by_key(|(id, _)| *id);
        router.validate(&declared, self.entry)?;

        debug!(graph = %self.name, nodes = declared.len(), entry = %self.entry, "Graph built");

        Ok(GraphEngine {
            agent_id: self.agent_id.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            prefix: self.prefix,
            nodes: self.nodes,
            router,
            entry: self.entry,
            recursion_limit: self.recursion_limit,
            event_bus: self.event_bus,
        })
    }
}

/// Progress of one run through the graph.
struct Cursor {
    state: AgentState,
    next: Target,
    executions: u32,
    limit: u32,
    started: bool,
    finished: bool,
}

/// Runs a validated graph: node, merge, route, repeat.
///
/// Execution inside one run is strictly sequential. The engine holds no
/// per-run state, so one engine can serve concurrent runs.
pub struct GraphEngine {
    name: String,
    prefix: Option<String>,
    agent_id: String,
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    router: Router,
    entry: NodeId,
    recursion_limit: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl GraphEngine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn terminal(&self) -> NodeId {
        self.router.terminal()
    }

    pub fn recursion_limit(&self) -> u32 {
        self.recursion_limit
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    fn label(&self, id: NodeId) -> String {
        id.label(self.prefix.as_deref())
    }

    /// A fresh state for this graph. An empty conversation is seeded with
    /// the objective as the first human turn.
    pub fn initial_state(
        &self,
        objective: impl Into<String>,
        conversation: Vec<ChatMessage>,
        max_steps: u32,
    ) -> AgentState {
        let objective = objective.into();
        let conversation = if conversation.is_empty() {
            vec![ChatMessage::human(objective.clone())]
        } else {
            conversation
        };
        AgentState::new(objective, max_steps)
            .with_agent_id(self.agent_id.clone())
            .with_conversation(conversation)
    }

    /// Run from objective to final state.
    pub async fn run(
        &self,
        objective: impl Into<String>,
        conversation: Vec<ChatMessage>,
        options: RunOptions,
    ) -> Result<AgentState> {
        let state = self.initial_state(objective, conversation, options.max_steps);
        self.invoke_with_limit(state, options.recursion_limit).await
    }

    /// Run a prepared state to completion with the engine's recursion limit.
    pub async fn invoke(&self, initial: AgentState) -> Result<AgentState> {
        self.invoke_with_limit(initial, self.recursion_limit).await
    }

    pub async fn invoke_with_limit(&self, initial: AgentState, limit: u32) -> Result<AgentState> {
        let mut cursor = self.start(initial, limit);
        while self.step(&mut cursor).await?.is_some() {}
        Ok(cursor.state)
    }

    /// Lazily run the graph, yielding one snapshot per step. The stream ends
    /// after the last node; a fatal routing error is yielded once, then the
    /// stream ends.
    pub fn stream(&self, initial: AgentState) -> BoxStream<'_, Result<StepSnapshot>> {
        let cursor = self.start(initial, self.recursion_limit);
        stream::unfold(Some(cursor), move |cursor| async move {
            let mut cursor = match cursor {
                Some(c) => c,
                None => return None,
            };
            match self.step(&mut cursor).await {
                Ok(Some(snapshot)) => Some((Ok(snapshot), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    fn start(&self, state: AgentState, limit: u32) -> Cursor {
        // A run that begins out of budget goes straight to the terminal node.
        let first = if state.budget_exhausted() {
            self.router.terminal()
        } else {
            self.entry
        };
        Cursor {
            state,
            next: Target::Node(first),
            executions: 0,
            limit,
            started: false,
            finished: false,
        }
    }

    async fn step(&self, cursor: &mut Cursor) -> Result<Option<StepSnapshot>> {
        if cursor.finished {
            return Ok(None);
        }
        if !cursor.started {
            cursor.started = true;
            info!(graph = %self.name, run_id = %cursor.state.run_id, max_steps = cursor.state.max_steps, "Run started");
            self.publish(TraceEvent::RunStarted {
                run_id: cursor.state.run_id.clone(),
                graph: self.name.clone(),
                objective: cursor.state.objective.clone(),
            });
        }

        let id = match cursor.next {
            Target::End => {
                self.finish(cursor);
                return Ok(None);
            }
            Target::Node(id) => id,
        };

        if cursor.executions >= cursor.limit {
            return Ok(Some(self.stop_at_limit(cursor, id)));
        }

        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| ArborError::GraphConfig(format!("node '{}' is not in the graph", id)))?;
        let label = self.label(id);

        let started = Instant::now();
        let mut delta = node.run(&cursor.state).await;
        cursor.executions += 1;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut state = cursor.state.apply(delta.clone());
        let route = self.router.route(id, &state, delta.decision.as_ref())?;

        if route.missing_decision {
            warn!(node = %label, "Node produced no decision; routing to terminal");
            let extra = StateUpdate::new().error(AgentError::validation(format!(
                "node '{}' produced no decision",
                label
            )));
            state = state.apply(extra.clone());
            delta = delta.merge(extra);
        }
        if route.forced {
            info!(node = %label, step = state.step_count, max_steps = state.max_steps, "Step budget exhausted; routing to terminal");
        }

        info!(
            node = %label,
            step = state.step_count,
            elapsed_ms,
            next = %route.target,
            errors = delta.errors.len(),
            "Node complete"
        );

        self.publish(TraceEvent::StepCompleted {
            run_id: state.run_id.clone(),
            graph: self.name.clone(),
            node: label.clone(),
            step_index: cursor.executions,
            delta: delta.clone(),
        });

        cursor.state = state;
        cursor.next = route.target;

        Ok(Some(StepSnapshot {
            node: Some(id),
            label,
            step_index: cursor.executions,
            delta,
            state: cursor.state.clone(),
        }))
    }

    fn stop_at_limit(&self, cursor: &mut Cursor, pending: NodeId) -> StepSnapshot {
        warn!(
            graph = %self.name,
            limit = cursor.limit,
            pending = %self.label(pending),
            "Recursion limit reached; stopping run"
        );
        let delta = StateUpdate::new().error(AgentError::new(
            AgentErrorKind::Timeout,
            format!(
                "recursion limit of {} reached before '{}'",
                cursor.limit,
                self.label(pending)
            ),
            false,
        ));
        cursor.state = cursor.state.apply(delta.clone());
        cursor.next = Target::End;

        self.publish(TraceEvent::StepCompleted {
            run_id: cursor.state.run_id.clone(),
            graph: self.name.clone(),
            node: "recursion_limit".to_string(),
            step_index: cursor.executions,
            delta: delta.clone(),
        });

        StepSnapshot {
            node: None,
            label: "recursion_limit".to_string(),
            step_index: cursor.executions,
            delta,
            state: cursor.state.clone(),
        }
    }

    fn finish(&self, cursor: &mut Cursor) {
        cursor.finished = true;
        let state = &cursor.state;
        info!(
            graph = %self.name,
            run_id = %state.run_id,
            steps = state.step_count,
            executions = cursor.executions,
            total_tokens = state.total_tokens,
            errors = state.errors.len(),
            "Run finished"
        );
        self.publish(TraceEvent::RunFinished {
            run_id: state.run_id.clone(),
            graph: self.name.clone(),
            steps: state.step_count,
            total_tokens: state.total_tokens,
            errors: state.errors.len(),
        });
    }

    fn publish(&self, event: TraceEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::state::Action;
    use arbor_core::types::ToolCall;
    use futures::future::BoxFuture;
    use serde_json::json;

    /// Node whose update is computed by a plain function of the state.
    struct FnNode {
        id: NodeId,
        actions: &'static [Action],
        f: fn(&AgentState) -> StateUpdate,
    }

    impl Node for FnNode {
        fn id(&self) -> NodeId {
            self.id
        }

        fn actions(&self) -> &'static [Action] {
            self.actions
        }

        fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate> {
            let update = (self.f)(state);
            Box::pin(async move { update })
        }
    }

    fn always_tool_use(state: &AgentState) -> StateUpdate {
        let call = ToolCall::new(format!("c{}", state.step_count), "echo", json!({}));
        StateUpdate::new()
            .advance(state)
            .message(ChatMessage::assistant_with_calls("", &[call]))
            .decision(Action::ToolUse, "again")
    }

    fn advance_only(state: &AgentState) -> StateUpdate {
        StateUpdate::new().advance(state)
    }

    fn answer(_: &AgentState) -> StateUpdate {
        StateUpdate::new().message(ChatMessage::assistant_text("done"))
    }

    fn looping_graph(limit: u32, caller: fn(&AgentState) -> StateUpdate) -> GraphBuilder {
        GraphBuilder::new("loop", NodeId::ToolCaller, NodeId::Summary)
            .add_node(FnNode {
                id: NodeId::ToolCaller,
                actions: &[Action::ToolUse, Action::Completed],
                f: caller,
            })
            .add_node(FnNode { id: NodeId::Tools, actions: &[], f: advance_only })
            .add_node(FnNode { id: NodeId::Summary, actions: &[], f: answer })
            .add_edge(
                NodeId::ToolCaller,
                Edge::conditional(
                    &[(Action::ToolUse, NodeId::Tools), (Action::Completed, NodeId::Summary)],
                    None,
                ),
            )
            .add_edge(NodeId::Tools, Edge::Static(Target::Node(NodeId::ToolCaller)))
            .add_edge(NodeId::Summary, Edge::Static(Target::End))
            .with_recursion_limit(limit)
    }

    #[tokio::test]
    async fn test_budget_forces_terminal() {
        let engine = looping_graph(25, always_tool_use).build().unwrap();
        let state = engine.run("loop forever", vec![], RunOptions { max_steps: 4, recursion_limit: 25 })
            .await
            .unwrap();

        assert_eq!(state.step_count, 4);
        assert_eq!(state.last_assistant_text().as_deref(), Some("done"));
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn test_recursion_limit_stops_run() {
        let engine = looping_graph(3, always_tool_use).build().unwrap();
        let state = engine.invoke(engine.initial_state("loop", vec![], 100)).await.unwrap();

        assert_eq!(state.step_count, 3);
        let last = state.errors.last().unwrap();
        assert_eq!(last.kind, AgentErrorKind::Timeout);
        assert!(!last.recoverable);
        assert_ne!(state.last_assistant_text().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_exhausted_start_goes_to_terminal() {
        let engine = looping_graph(25, always_tool_use).build().unwrap();
        let state = engine.invoke(engine.initial_state("x", vec![], 0)).await.unwrap();
        assert_eq!(state.step_count, 0);
        assert_eq!(state.last_assistant_text().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_missing_decision_routes_to_terminal() {
        let engine = looping_graph(25, advance_only).build().unwrap();
        let state = engine.invoke(engine.initial_state("x", vec![], 10)).await.unwrap();

        assert_eq!(state.step_count, 1);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].kind, AgentErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unmapped_action_is_fatal() {
        fn plan(state: &AgentState) -> StateUpdate {
            StateUpdate::new().advance(state).decision(Action::Plan, "")
        }
        let engine = looping_graph(25, plan).build().unwrap();
        let err = engine.invoke(engine.initial_state("x", vec![], 10)).await.unwrap_err();
        assert!(matches!(err, ArborError::UnmappedAction { .. }));
    }

    #[test]
    fn test_build_rejects_undeclared_route() {
        let err = GraphBuilder::new("bad", NodeId::ToolCaller, NodeId::Summary)
            .add_node(FnNode {
                id: NodeId::ToolCaller,
                actions: &[Action::ToolUse, Action::NoTool],
                f: always_tool_use,
            })
            .add_node(FnNode { id: NodeId::Summary, actions: &[], f: answer })
            .add_edge(
                NodeId::ToolCaller,
                Edge::conditional(&[(Action::ToolUse, NodeId::Summary)], None),
            )
            .add_edge(NodeId::Summary, Edge::Static(Target::End))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ArborError::UnmappedAction { .. }));
    }

    #[test]
    fn test_build_rejects_duplicate_node() {
        let result = looping_graph(25, always_tool_use)
            .add_node(FnNode { id: NodeId::Tools, actions: &[], f: advance_only })
            .build();
        assert!(matches!(result, Err(ArborError::GraphConfig(_))));
    }

    #[tokio::test]
    async fn test_stream_yields_each_step() {
        let engine = looping_graph(25, always_tool_use)
            .with_prefix("demo")
            .build()
            .unwrap();
        let snapshots: Vec<StepSnapshot> = engine
            .stream(engine.initial_state("x", vec![], 2))
            .map(|s| s.unwrap())
            .collect()
            .await;

        let labels: Vec<&str> = snapshots.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["demo.tool_caller", "demo.tools", "demo.summary"]);
        let indexes: Vec<u32> = snapshots.iter().map(|s| s.step_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(snapshots[0].delta.step_count, Some(1));
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let engine = looping_graph(25, always_tool_use)
            .with_event_bus(bus.clone())
            .build()
            .unwrap();
        engine.invoke(engine.initial_state("x", vec![], 1)).await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["run_started", "step_completed", "step_completed", "run_finished"]
        );
    }
}
