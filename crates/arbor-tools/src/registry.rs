use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use arbor_core::error::ArborError;
use arbor_core::state::ToolResult;
use arbor_core::traits::Tool;
use arbor_core::types::{ToolContext, ToolDefinition};

use crate::schema::validate_input;

pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
pub const TOOL_INPUT_INVALID: &str = "TOOL_INPUT_INVALID";
pub const TOOL_TIMEOUT: &str = "TOOL_TIMEOUT";
pub const TOOL_ERROR: &str = "TOOL_ERROR";
pub const TOOL_MISSING_RESULT: &str = "TOOL_MISSING_RESULT";

/// Registry of available tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    timeout_override: Option<u64>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout_override: None,
        }
    }

    /// Apply one timeout to every tool instead of each tool's own.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_override = Some(secs);
        self
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for sending to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// One `- name: description` line per tool, for planning prompts.
    pub fn catalog_text(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool by name.
    ///
    /// Never fails: unknown tools, invalid input, timeouts and tool errors all
    /// come back as `ToolResult::Failed`. The returned duration covers
    /// dispatch to settle.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> ToolResult {
        let start = Instant::now();
        let result = self.dispatch(name, input, ctx).await;
        result.with_duration(start.elapsed().as_millis() as u64)
    }

    async fn dispatch(&self, name: &str, input: serde_json::Value, ctx: ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Tool not found in registry");
            return ToolResult::failed(
                TOOL_NOT_FOUND,
                ArborError::ToolNotFound(name.to_string()).to_string(),
                false,
            );
        };

        if let Err(message) = validate_input(&tool.input_schema(), &input) {
            debug!(tool = %name, %message, "Rejected tool input");
            return ToolResult::failed(
                TOOL_INPUT_INVALID,
                ArborError::ToolValidation {
                    tool: name.to_string(),
                    message,
                }
                .to_string(),
                false,
            );
        }

        let timeout_secs = self.timeout_override.unwrap_or_else(|| tool.timeout_secs());
        let timeout = Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(Ok(ToolResult::Failed { code, message, .. })) => {
                // Business failures are never retryable
                ToolResult::failed(code, message, false)
            }
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                let code = match e {
                    ArborError::ToolValidation { .. } => TOOL_INPUT_INVALID,
                    _ => TOOL_ERROR,
                };
                ToolResult::failed(code, e.to_string(), false)
            }
            Err(_) => ToolResult::failed(
                TOOL_TIMEOUT,
                ArborError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs,
                }
                .to_string(),
                true,
            ),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // ── Arithmetic ──────────────────────────────────────────
        registry.register(crate::builtin::arithmetic::AddTool);
        registry.register(crate::builtin::arithmetic::ProductTool);

        // ── Mock catalog ────────────────────────────────────────
        registry.register(crate::builtin::catalog::FetchUserProfileTool);
        registry.register(crate::builtin::catalog::FetchCatalogTool);
        registry.register(crate::builtin::catalog::FetchWeatherTool);
        registry.register(crate::builtin::catalog::EstimateShippingTool);

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
