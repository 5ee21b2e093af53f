use thiserror::Error;

use crate::state::AgentErrorKind;

#[derive(Debug, Error)]
pub enum ArborError {
    // Model errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    #[error("Model rate limited: {0}")]
    RateLimited(String),

    #[error("Model request timed out after {0}s")]
    ModelTimeout(u64),

    #[error("Model provider not supported: {0}")]
    UnsupportedProvider(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {tool}: {message}")]
    ToolValidation { tool: String, message: String },

    // Payload errors
    #[error("Invalid {payload} payload: {message}")]
    InvalidPayload { payload: String, message: String },

    // Graph configuration errors (fatal, detected before a run starts where possible)
    #[error("Graph configuration error: {0}")]
    GraphConfig(String),

    #[error("Node '{node}' emitted action '{action}' with no declared route")]
    UnmappedAction { node: String, action: String },

    #[error("No model resolvable for role '{0}'")]
    MissingModel(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArborError {
    /// Map this error onto the state-level error taxonomy.
    pub fn agent_error_kind(&self) -> AgentErrorKind {
        match self {
            Self::ModelRequest(_) | Self::ModelParse(_) | Self::UnsupportedProvider(_) => {
                AgentErrorKind::Model
            }
            Self::RateLimited(_) => AgentErrorKind::RateLimit,
            Self::ModelTimeout(_) | Self::ToolTimeout { .. } => AgentErrorKind::Timeout,
            Self::ToolNotFound(_) | Self::ToolExecution { .. } => AgentErrorKind::Tool,
            Self::ToolValidation { .. } | Self::InvalidPayload { .. } | Self::Json(_) => {
                AgentErrorKind::Validation
            }
            Self::GraphConfig(_)
            | Self::UnmappedAction { .. }
            | Self::MissingModel(_)
            | Self::Config(_)
            | Self::ConfigNotFound(_)
            | Self::Io(_) => AgentErrorKind::Validation,
        }
    }

    /// Upstream conditions worth retrying: rate limiting and timeouts.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::ModelTimeout(_) | Self::ToolTimeout { .. }
        )
    }

    /// Programmer errors that must abort a run instead of degrading it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::GraphConfig(_)
                | Self::UnmappedAction { .. }
                | Self::MissingModel(_)
                | Self::Config(_)
                | Self::ConfigNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ArborError>;
