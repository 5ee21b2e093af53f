//! End-to-end agent runs against scripted models.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use arbor_agent::{AgentGraphBuilder, BoundModel, Decider, GraphEngine, RunOptions, TraceLogger};
use arbor_core::event::EventBus;
use arbor_core::state::{Action, AgentErrorKind};
use arbor_core::types::{ContentBlock, Role, RunId};
use arbor_test_utils::{call, model_config, plan_payload, reasoning_payload, FailingTool, ScriptedLlm};
use arbor_tools::builtin::arithmetic_registry;
use arbor_tools::ToolRegistry;

fn engine(llm: &ScriptedLlm, decider: Decider, tools: ToolRegistry) -> GraphEngine {
    AgentGraphBuilder::new("agent")
        .with_model(BoundModel::new(Arc::new(llm.clone()), model_config()))
        .with_tools(Arc::new(tools))
        .with_decider(decider)
        .build()
        .expect("build graph")
}

fn options(max_steps: u32) -> RunOptions {
    RunOptions {
        max_steps,
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn test_two_plus_two_with_tool_caller() {
    let llm = ScriptedLlm::new()
        .calls(vec![call("c1", "add", json!({"a": 2, "b": 2}))])
        .structured(reasoning_payload("completed", "2 + 2 = 4"))
        .text("2 + 2 = 4");
    let graph = engine(&llm, Decider::ToolCaller, arithmetic_registry());

    let state = graph.run("What is 2 + 2?", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 3);
    assert_eq!(state.tool_history.len(), 1);
    assert_eq!(state.tool_history[0].result.data(), Some(&json!(4)));
    assert!(state.errors.is_empty());
    assert!(state.last_assistant_text().unwrap().contains('4'));
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn test_two_plus_two_with_step_executor() {
    let llm = ScriptedLlm::new()
        .calls(vec![call("c1", "add", json!({"a": 2, "b": 2}))])
        .structured(reasoning_payload("completed", "2 + 2 = 4"))
        .text("The answer is 4.");
    let graph = engine(&llm, Decider::StepExecutor, arithmetic_registry());

    let state = graph.run("What is 2 + 2?", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 3);
    assert_eq!(state.tool_history.len(), 1);
    assert_eq!(state.last_assistant_text().as_deref(), Some("The answer is 4."));

    // The executor was offered route_decision first and had to call something
    let first = &llm.requests()[0];
    assert_eq!(first.tools[0].name, "route_decision");
}

#[tokio::test]
async fn test_route_decision_finishes_without_tools() {
    let llm = ScriptedLlm::new()
        .calls(vec![call(
            "r1",
            "route_decision",
            json!({"action": "completed", "reason": "Nothing to compute."}),
        )])
        .text("Hello!");
    let graph = engine(&llm, Decider::StepExecutor, arithmetic_registry());

    let state = graph.run("Say hello", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 1);
    assert!(state.tool_history.is_empty());
    assert_eq!(state.decision.as_ref().unwrap().reason, "Nothing to compute.");
    // The pseudo-tool call never lands in the conversation
    assert!(state.conversation.iter().all(|m| !m.has_tool_calls()));
    assert_eq!(state.last_assistant_text().as_deref(), Some("Hello!"));
}

#[tokio::test]
async fn test_planner_failure_goes_to_summary() {
    let llm = ScriptedLlm::new().fail("HTTP 500").text("I could not plan this.");
    let graph = AgentGraphBuilder::new("agent")
        .with_model(BoundModel::new(Arc::new(llm.clone()), model_config()))
        .with_tools(Arc::new(arithmetic_registry()))
        .with_planner(true)
        .build()
        .unwrap();

    let state = graph.run("What is 2 + 2?", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 1);
    assert!(state.tool_history.is_empty());
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, AgentErrorKind::Model);
    assert!(state.errors[0].recoverable);
    assert_eq!(state.decision.as_ref().unwrap().action, Action::Completed);
    assert_eq!(state.last_assistant_text().as_deref(), Some("I could not plan this."));
}

#[tokio::test]
async fn test_planner_then_tools() {
    let llm = ScriptedLlm::new()
        .structured(plan_payload(&["Add 2 and 2", "Report the sum"]))
        .calls(vec![call("c1", "add", json!({"a": 2, "b": 2}))])
        .structured(reasoning_payload("completed", "Sum is 4."))
        .text("4");
    let graph = AgentGraphBuilder::new("agent")
        .with_model(BoundModel::new(Arc::new(llm.clone()), model_config()))
        .with_tools(Arc::new(arithmetic_registry()))
        .with_decider(Decider::ToolCaller)
        .with_planner(true)
        .build()
        .unwrap();

    let state = graph.run("What is 2 + 2?", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 4);
    assert_eq!(state.plan.as_ref().unwrap().steps.len(), 2);
    assert_eq!(state.tool_history.len(), 1);
    // The tool-caller saw the plan in its system prompt
    assert!(llm.requests()[1].system_prompt.contains("Add 2 and 2"));
}

#[tokio::test]
async fn test_step_budget_terminates_run() {
    let llm = ScriptedLlm::new()
        .calls(vec![call("c1", "add", json!({"a": 1, "b": 1}))])
        .text("Stopped early: 1 + 1 = 2.");
    let graph = engine(&llm, Decider::StepExecutor, arithmetic_registry());

    let state = graph.run("Keep adding", vec![], options(2)).await.unwrap();

    // step executor and tools consumed the budget; reasoning never ran
    assert_eq!(state.step_count, 2);
    assert_eq!(llm.call_count(), 2);
    assert!(state.reasoning_summary.is_none());
    assert!(state.last_assistant_text().unwrap().starts_with("Stopped early"));
}

#[tokio::test]
async fn test_recursion_limit_ends_run() {
    let mut llm = ScriptedLlm::new();
    for i in 0..10 {
        llm = llm
            .calls(vec![call(&format!("c{}", i), "add", json!({"a": i, "b": 1}))])
            .structured(reasoning_payload("tool_use", "Keep going."));
    }
    let graph = engine(&llm, Decider::ToolCaller, arithmetic_registry());
    let state = graph.initial_state("Loop", vec![], 100);

    let state = graph.invoke_with_limit(state, 5).await.unwrap();

    assert_eq!(state.step_count, 5);
    let last = state.errors.last().unwrap();
    assert_eq!(last.kind, AgentErrorKind::Timeout);
    assert!(!last.recoverable);
}

#[tokio::test]
async fn test_loop_guard_completes_after_silent_turn() {
    let llm = ScriptedLlm::new()
        .text("Let me think about this.")
        .structured(reasoning_payload("tool_use", "I need data."))
        .text("Best effort answer.");
    let graph = engine(&llm, Decider::ToolCaller, arithmetic_registry());

    let state = graph.run("Something vague", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 2);
    assert_eq!(state.no_tool_streak, 1);
    let decision = state.decision.as_ref().unwrap();
    assert_eq!(decision.action, Action::Completed);
    assert!(decision.reason.contains("avoid a loop"));
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn test_parallel_calls_correlate_in_order() {
    let llm = ScriptedLlm::new()
        .calls(vec![
            call("a1", "add", json!({"a": 1, "b": 2})),
            call("p1", "prod", json!({"nums": [3, 4]})),
        ])
        .structured(reasoning_payload("completed", "3 and 12."))
        .text("3 and 12");
    let graph = engine(&llm, Decider::ToolCaller, arithmetic_registry());

    let state = graph.run("Compute both", vec![], options(10)).await.unwrap();

    let ids: Vec<&str> = state.tool_history.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "p1"]);
    assert_eq!(state.tool_history[1].result.data(), Some(&json!(12)));

    let results = state
        .conversation
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    let correlated: Vec<&str> = results
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(correlated, vec!["a1", "p1"]);
}

#[tokio::test]
async fn test_tool_failure_is_contained() {
    let mut tools = arithmetic_registry();
    tools.register(FailingTool::new("broken", "UPSTREAM_DOWN"));
    let llm = ScriptedLlm::new()
        .calls(vec![call("c1", "broken", json!({}))])
        .structured(reasoning_payload("completed", "The tool failed."))
        .text("The lookup failed; no answer available.");
    let graph = engine(&llm, Decider::ToolCaller, tools);

    let state = graph.run("Look it up", vec![], options(10)).await.unwrap();

    assert_eq!(state.tool_history[0].result.code(), Some("UPSTREAM_DOWN"));
    assert!(state.errors.is_empty());
    assert!(state.last_assistant_text().unwrap().contains("failed"));
}

#[tokio::test]
async fn test_summary_failure_keeps_state() {
    let llm = ScriptedLlm::new()
        .calls(vec![call("c1", "add", json!({"a": 2, "b": 2}))])
        .structured(reasoning_payload("completed", "2 + 2 = 4"))
        .fail("HTTP 503");
    let graph = engine(&llm, Decider::ToolCaller, arithmetic_registry());

    let state = graph.run("What is 2 + 2?", vec![], options(10)).await.unwrap();

    assert_eq!(state.step_count, 3);
    assert_eq!(state.reasoning_summary.as_deref(), Some("2 + 2 = 4"));
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, AgentErrorKind::Model);
    // Last assistant turn is still the reasoning note
    assert!(state.last_assistant_text().unwrap().starts_with("Reasoning: 2 + 2 = 4"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trace_logger_records_run() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let run_id = RunId::from("scenario-run");

    let logger = TraceLogger::new(dir.path());
    let path = logger.path_for(&run_id);
    // Same order as the CLI: start the logger, then run straight away
    let handle = logger.spawn(&bus, run_id.clone(), cancel.clone());

    let llm = ScriptedLlm::new()
        .calls(vec![call("c1", "add", json!({"a": 2, "b": 2}))])
        .structured(reasoning_payload("completed", "2 + 2 = 4"))
        .text("4");
    let graph = AgentGraphBuilder::new("agent")
        .with_model(BoundModel::new(Arc::new(llm), model_config()))
        .with_tools(Arc::new(arithmetic_registry()))
        .with_decider(Decider::ToolCaller)
        .with_event_bus(bus.clone())
        .build()
        .unwrap();
    let state = graph.initial_state("What is 2 + 2?", vec![], 10).with_run_id(run_id);
    graph.invoke(state).await.unwrap();
    cancel.cancel();
    handle.await.unwrap();

    let events: Vec<String> = std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| {
            let line: serde_json::Value = serde_json::from_str(l).unwrap();
            line["event"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(
        events,
        [
            "run_started",
            "step_completed",
            "tool_started",
            "tool_finished",
            "step_completed",
            "step_completed",
            "step_completed",
            "run_finished",
        ]
    );
}
