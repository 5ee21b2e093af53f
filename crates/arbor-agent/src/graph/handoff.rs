use serde::{Deserialize, Serialize};

use arbor_core::state::AgentState;

use crate::prompt::{extract_tool_outputs, format_tool_history};

/// A successful tool output carried across a stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub tool_name: String,
    pub data: serde_json::Value,
}

/// Condensed result of one sub-agent run, handed to the next stage instead
/// of the raw state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub summary: String,
    pub tool_outputs: Vec<ToolOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Handoff {
    /// Build from a finished run.
    ///
    /// The summary is the rendered tool history when any tool ran, otherwise
    /// the last assistant text.
    pub fn from_state(state: &AgentState) -> Self {
        let tool_text = format_tool_history(&state.tool_history);
        let summary = if tool_text.is_empty() {
            state.last_assistant_text().unwrap_or_default()
        } else {
            format!("Tool outputs:\n{}", tool_text)
        };
        Self {
            summary,
            tool_outputs: extract_tool_outputs(&state.tool_history),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Usage counters captured alongside a handoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaStats {
    pub steps: u32,
    pub total_tokens: u64,
    pub tool_calls: usize,
}

impl MetaStats {
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            steps: state.step_count,
            total_tokens: state.total_tokens,
            tool_calls: state.tool_history.len(),
        }
    }
}
