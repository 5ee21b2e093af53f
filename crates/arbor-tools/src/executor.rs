use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use arbor_core::event::{EventBus, TraceEvent};
use arbor_core::state::{ToolInvocation, ToolResult};
use arbor_core::types::{ContentBlock, RunId, ToolCall, ToolContext};

use crate::registry::{ToolRegistry, TOOL_MISSING_RESULT};

/// Runs every tool call of one assistant turn concurrently.
///
/// Results are correlated back to calls by position, so the returned
/// invocations are always in request order with one entry per call, however
/// the individual executions interleave.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch of calls. An empty batch yields an empty result.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        run_id: &RunId,
        agent_id: &str,
    ) -> Vec<ToolInvocation> {
        if calls.is_empty() {
            return Vec::new();
        }
        info!(count = calls.len(), "Executing tool batch");

        let handles: Vec<_> = calls
            .iter()
            .map(|call| {
                self.publish(TraceEvent::ToolStarted {
                    run_id: run_id.clone(),
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                });

                let registry = Arc::clone(&self.registry);
                let name = call.name.clone();
                let input = call.arguments.clone();
                let ctx = ToolContext {
                    run_id: run_id.clone(),
                    agent_id: agent_id.to_string(),
                    call_id: call.id.clone(),
                };
                let dispatched_at = Utc::now();
                let handle = tokio::spawn(async move {
                    let started_at = Utc::now();
                    let result = registry.execute(&name, input, ctx).await;
                    (started_at, result, Utc::now())
                });
                (dispatched_at, handle)
            })
            .collect();

        let (dispatched, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let outcomes = futures::future::join_all(handles).await;

        calls
            .iter()
            .zip(dispatched.into_iter().zip(outcomes))
            .map(|(call, (dispatched_at, outcome))| {
                // Timestamps come from the task itself; a task that never
                // settled keeps its dispatch time and is closed on collection.
                let (started_at, result, finished_at) = match outcome {
                    Ok(settled) => settled,
                    Err(e) => {
                        error!(tool = %call.name, call_id = %call.id, error = %e, "Tool task did not complete");
                        let finished_at = Utc::now();
                        let elapsed = (finished_at - dispatched_at).num_milliseconds().max(0) as u64;
                        (
                            dispatched_at,
                            ToolResult::failed(
                                TOOL_MISSING_RESULT,
                                format!("no result produced for call {}", call.id),
                                false,
                            )
                            .with_duration(elapsed),
                            finished_at,
                        )
                    }
                };
                debug!(tool = %call.name, ok = result.is_ok(), ms = result.duration_ms(), "Tool settled");

                self.publish(TraceEvent::ToolFinished {
                    run_id: run_id.clone(),
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                });

                ToolInvocation {
                    id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: call.arguments.clone(),
                    result,
                    started_at,
                    finished_at,
                }
            })
            .collect()
    }

    fn publish(&self, event: TraceEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Tool turn content blocks for a batch, one per invocation.
pub fn result_blocks(invocations: &[ToolInvocation]) -> Vec<ContentBlock> {
    invocations
        .iter()
        .map(|inv| ContentBlock::ToolResult {
            tool_use_id: inv.id.clone(),
            content: inv.result.to_content(),
            is_error: !inv.result.is_ok(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_test_utils::{PanickingTool, SlowTool};
    use serde_json::json;
    use std::time::Duration;

    fn executor(registry: ToolRegistry) -> ToolExecutor {
        ToolExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let exec = executor(ToolRegistry::with_builtins());
        let out = exec.execute_batch(&[], &RunId::from("r"), "a").await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let mut registry = ToolRegistry::with_builtins();
        registry.register(SlowTool::new("slow", Duration::from_millis(50)));
        let exec = executor(registry);
        let calls = vec![
            ToolCall::new("c1", "slow", json!({})),
            ToolCall::new("c2", "add", json!({"a": 1, "b": 2})),
            ToolCall::new("c3", "missing", json!({})),
        ];
        let out = exec.execute_batch(&calls, &RunId::from("r"), "a").await;
        let ids: Vec<&str> = out.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        assert!(out[0].result.is_ok());
        assert_eq!(out[1].result.data(), Some(&json!(3)));
        assert_eq!(out[2].result.code(), Some("TOOL_NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_timestamps_are_per_call() {
        let mut registry = ToolRegistry::with_builtins();
        registry.register(SlowTool::new("slow", Duration::from_millis(200)));
        let exec = executor(registry);
        let calls = vec![
            ToolCall::new("c1", "slow", json!({})),
            ToolCall::new("c2", "add", json!({"a": 1, "b": 1})),
        ];
        let out = exec.execute_batch(&calls, &RunId::from("r"), "a").await;

        let span = |inv: &ToolInvocation| (inv.finished_at - inv.started_at).num_milliseconds();
        assert!(span(&out[0]) >= 200);
        // The fast call settles long before the slow one
        assert!(span(&out[1]) < 100, "add took {}ms", span(&out[1]));
        assert!(out[1].finished_at < out[0].finished_at);
        assert!(span(&out[1]) >= out[1].result.duration_ms() as i64);
    }

    #[tokio::test]
    async fn test_panicking_tool_yields_missing_result() {
        let mut registry = ToolRegistry::with_builtins();
        registry.register(PanickingTool::new("explode"));
        let exec = executor(registry);
        let calls = vec![
            ToolCall::new("c1", "explode", json!({})),
            ToolCall::new("c2", "add", json!({"a": 2, "b": 2})),
        ];
        let out = exec.execute_batch(&calls, &RunId::from("r"), "a").await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].result.code(), Some(TOOL_MISSING_RESULT));
        assert!(out[1].result.is_ok());
    }

    #[tokio::test]
    async fn test_trace_events_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let exec = executor(ToolRegistry::with_builtins()).with_event_bus(bus);
        let calls = vec![ToolCall::new("c1", "add", json!({"a": 2, "b": 2}))];
        exec.execute_batch(&calls, &RunId::from("r"), "a").await;
        assert_eq!(rx.recv().await.unwrap().name(), "tool_started");
        assert_eq!(rx.recv().await.unwrap().name(), "tool_finished");
    }

    #[test]
    fn test_result_blocks_mark_errors() {
        let now = Utc::now();
        let inv = ToolInvocation {
            id: "c1".into(),
            tool_name: "add".into(),
            input: json!({}),
            result: ToolResult::failed("TOOL_ERROR", "bad", false),
            started_at: now,
            finished_at: now,
        };
        match &result_blocks(&[inv])[0] {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "c1");
                assert!(is_error);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }
}
