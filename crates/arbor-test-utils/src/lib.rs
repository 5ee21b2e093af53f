//! Mocks and fixtures shared by Arbor's test suites.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use arbor_core::config::ModelConfig;
use arbor_core::error::{ArborError, Result};
use arbor_core::state::{AgentState, ToolResult};
use arbor_core::traits::{LlmClient, Tool};
use arbor_core::types::*;

enum Scripted {
    Respond(ModelResponse),
    Fail(String),
}

/// A model client that replays a fixed script of responses.
///
/// Each `invoke` pops the next entry. Once the script runs out every call
/// fails, which surfaces unexpected extra model calls in tests.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: ModelResponse) -> Self {
        self.push(Scripted::Respond(response));
        self
    }

    /// Queue a structured JSON payload.
    pub fn structured(self, value: serde_json::Value) -> Self {
        self.respond(ModelResponse::structured(value))
    }

    pub fn text(self, content: &str) -> Self {
        self.respond(ModelResponse::text(content))
    }

    pub fn calls(self, calls: Vec<ToolCall>) -> Self {
        self.respond(ModelResponse::with_calls(calls))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Scripted::Fail(message.to_string()));
        self
    }

    fn push(&self, entry: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl LlmClient for ScriptedLlm {
    fn invoke(
        &self,
        _config: &ModelConfig,
        request: ModelRequest,
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
            match next {
                Some(Scripted::Respond(response)) => Ok(response),
                Some(Scripted::Fail(message)) => Err(ArborError::ModelRequest(message)),
                None => Err(ArborError::ModelRequest("script exhausted".into())),
            }
        })
    }
}

/// A tool that always reports a business failure with the given code.
pub struct FailingTool {
    name: String,
    code: String,
}

impl FailingTool {
    pub fn new(name: &str, code: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
        }
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::failed(self.code.clone(), "simulated failure", true)) })
    }
}

/// A tool that sleeps before answering `{"slept_ms": n}`.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Sleeps, then succeeds"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(ToolResult::ok(json!({ "slept_ms": self.delay.as_millis() as u64 })))
        })
    }
}

/// A tool whose execution panics.
pub struct PanickingTool {
    name: String,
}

impl PanickingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Tool for PanickingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Panics when executed"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { explode(&self.name) })
    }
}

fn explode(name: &str) -> Result<ToolResult> {
    panic!("tool {} exploded", name)
}

/// Returns its input unchanged.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::ok(input)) })
    }
}

// ── Fixtures ────────────────────────────────────────────────────

pub fn model_config() -> ModelConfig {
    ModelConfig::new("mock", "mock-model")
}

/// A fresh state seeded with the objective as the first human turn.
pub fn state(objective: &str, max_steps: u32) -> AgentState {
    AgentState::new(objective, max_steps)
        .with_run_id(RunId::from("test-run"))
        .with_conversation(vec![ChatMessage::human(objective)])
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

/// Structured planner payload with the given step descriptions.
pub fn plan_payload(steps: &[&str]) -> serde_json::Value {
    json!({
        "goal": "test goal",
        "steps": steps
            .iter()
            .map(|s| json!({ "id": "x", "description": s, "status": "pending" }))
            .collect::<Vec<_>>()
    })
}

/// Structured reasoning payload.
pub fn reasoning_payload(action: &str, summary: &str) -> serde_json::Value {
    json!({
        "summary": summary,
        "toolRelevance": "relevant",
        "action": action,
        "reason": "scripted"
    })
}
