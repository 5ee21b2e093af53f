use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};
use crate::types::ToolChoice;

/// Top-level Arbor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    /// Per-role model overrides; unset roles use `model`.
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on non-terminal node executions per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Hard cap on total node executions, terminal included.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            recursion_limit: default_recursion_limit(),
            tool_timeout_secs: default_tool_timeout_secs(),
            tool_choice: ToolChoice::default(),
        }
    }
}

fn default_max_steps() -> u32 { 10 }
fn default_recursion_limit() -> u32 { 25 }
fn default_tool_timeout_secs() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_request_timeout(),
            extra_headers: HashMap::new(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openrouter".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }
fn default_request_timeout() -> u64 { 120 }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Model role inside an agent subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Planning,
    ToolCaller,
    Reasoning,
    Answer,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::ToolCaller => "tool_caller",
            Self::Reasoning => "reasoning",
            Self::Answer => "answer",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default)]
    pub planning: Option<ModelConfig>,
    #[serde(default)]
    pub tool_caller: Option<ModelConfig>,
    #[serde(default)]
    pub reasoning: Option<ModelConfig>,
    #[serde(default)]
    pub answer: Option<ModelConfig>,
}

impl RolesConfig {
    pub fn get(&self, role: ModelRole) -> Option<&ModelConfig> {
        match role {
            ModelRole::Planning => self.planning.as_ref(),
            ModelRole::ToolCaller => self.tool_caller.as_ref(),
            ModelRole::Reasoning => self.reasoning.as_ref(),
            ModelRole::Answer => self.answer.as_ref(),
        }
    }
}

/// JSONL trace logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable trace logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for trace files. Default: ./arbor-traces
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

impl LogConfig {
    pub fn dir(&self) -> PathBuf {
        self.log_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| PathBuf::from("arbor-traces"))
    }
}

fn default_log_enabled() -> bool { true }

/// Step budgets for the research → analysis → synthesis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_stage_max_steps")]
    pub research_max_steps: u32,
    #[serde(default = "default_stage_max_steps")]
    pub analysis_max_steps: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            research_max_steps: default_stage_max_steps(),
            analysis_max_steps: default_stage_max_steps(),
        }
    }
}

fn default_stage_max_steps() -> u32 { 20 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ArborError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| ArborError::Config(e.to_string()))
    }

    /// Model for a role: explicit override, else the default model.
    pub fn model_for(&self, role: ModelRole) -> &ModelConfig {
        self.roles.get(role).unwrap_or(&self.model)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${VAR}` references in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
