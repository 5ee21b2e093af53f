use futures::future::BoxFuture;
use tracing::warn;

use arbor_core::state::{AgentError, AgentState, StateUpdate};
use arbor_core::types::ChatMessage;
use arbor_tools::executor::result_blocks;
use arbor_tools::ToolExecutor;

use crate::graph::node::{Node, NodeId};

/// Executes the tool calls of the latest assistant turn.
///
/// Carries no decision; its edge is static.
pub struct ToolsNode {
    executor: ToolExecutor,
}

impl ToolsNode {
    pub fn new(executor: ToolExecutor) -> Self {
        Self { executor }
    }
}

impl Node for ToolsNode {
    fn id(&self) -> NodeId {
        NodeId::Tools
    }

    fn run<'a>(&'a self, state: &'a AgentState) -> BoxFuture<'a, StateUpdate> {
        Box::pin(async move {
            let update = StateUpdate::new().advance(state);
            let calls = state.pending_tool_calls();
            if calls.is_empty() {
                warn!(run_id = %state.run_id, "Tools node reached with no pending tool calls");
                return update.error(AgentError::tool("No pending tool calls to execute."));
            }

            let invocations = self
                .executor
                .execute_batch(&calls, &state.run_id, &state.agent_id)
                .await;
            update
                .message(ChatMessage::tool_results(result_blocks(&invocations)))
                .invocations(invocations)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use arbor_core::state::{AgentErrorKind, StateUpdate};
    use arbor_core::types::{ContentBlock, Role};
    use arbor_tools::ToolRegistry;
    use arbor_test_utils::{call, state, FailingTool, SlowTool};
    use serde_json::json;

    fn node() -> ToolsNode {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool::new("slow", Duration::from_millis(30)));
        registry.register(FailingTool::new("broken", "UPSTREAM_DOWN"));
        registry.register(arbor_test_utils::EchoTool);
        ToolsNode::new(ToolExecutor::new(Arc::new(registry)))
    }

    #[tokio::test]
    async fn test_results_correlate_to_calls() {
        let calls = vec![
            call("c1", "slow", json!({})),
            call("c2", "echo", json!({"x": 1})),
            call("c3", "broken", json!({})),
            call("c4", "missing", json!({})),
        ];
        let s = state("obj", 10)
            .apply(StateUpdate::new().message(ChatMessage::assistant_with_calls("", &calls)));
        let update = node().run(&s).await;

        assert_eq!(update.step_count, Some(1));
        let ids: Vec<&str> = update.tool_history.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
        assert!(update.tool_history[0].result.is_ok());
        assert_eq!(update.tool_history[1].result.data(), Some(&json!({"x": 1})));
        assert_eq!(update.tool_history[2].result.code(), Some("UPSTREAM_DOWN"));
        assert_eq!(update.tool_history[3].result.code(), Some("TOOL_NOT_FOUND"));
        // Per-tool failures are not executor-level errors
        assert!(update.errors.is_empty());

        let turn = &update.conversation[0];
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.content.len(), 4);
        assert!(matches!(
            &turn.content[2],
            ContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "c3"
        ));
    }

    #[tokio::test]
    async fn test_no_pending_calls_is_tool_error() {
        let update = node().run(&state("obj", 10)).await;
        assert_eq!(update.step_count, Some(1));
        assert!(update.tool_history.is_empty());
        assert_eq!(update.errors[0].kind, AgentErrorKind::Tool);
    }
}
