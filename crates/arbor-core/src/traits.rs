use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::state::ToolResult;
use crate::types::*;

/// Model client: the opaque inference boundary.
pub trait LlmClient: Send + Sync + 'static {
    /// Send one request and receive the complete response.
    fn invoke(
        &self,
        config: &ModelConfig,
        request: ModelRequest,
    ) -> BoxFuture<'_, Result<ModelResponse>>;
}

/// An external capability the agent can call.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool. Business failures should come back as
    /// `ToolResult::Failed`; an `Err` is treated the same way by the executor.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
