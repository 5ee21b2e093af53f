use serde::Serialize;

use crate::state::{StateUpdate, ToolResult};
use crate::types::RunId;

/// Observable trace of a run. Purely additive: the engine never reads it back.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    RunStarted {
        run_id: RunId,
        graph: String,
        objective: String,
    },
    /// One node finished and its update was merged.
    StepCompleted {
        run_id: RunId,
        graph: String,
        node: String,
        step_index: u32,
        delta: StateUpdate,
    },
    ToolStarted {
        run_id: RunId,
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolFinished {
        run_id: RunId,
        call_id: String,
        name: String,
        result: ToolResult,
    },
    RunFinished {
        run_id: RunId,
        graph: String,
        steps: u32,
        total_tokens: u64,
        errors: usize,
    },
    StageCompleted {
        run_id: RunId,
        stage: String,
        steps: u32,
        total_tokens: u64,
        tool_calls: usize,
    },
}

impl TraceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::RunFinished { .. } => "run_finished",
            Self::StageCompleted { .. } => "stage_completed",
        }
    }

    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::ToolStarted { run_id, .. }
            | Self::ToolFinished { run_id, .. }
            | Self::RunFinished { run_id, .. }
            | Self::StageCompleted { run_id, .. } => run_id,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<TraceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: TraceEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TraceEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
