pub mod providers;
pub mod retry;

use std::sync::Arc;

use arbor_core::config::{AppConfig, ModelConfig};
use arbor_core::error::{ArborError, Result};
use arbor_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Providers that speak something other than the OpenAI chat-completions protocol.
const NATIVE_ONLY: &[&str] = &["bedrock", "cohere", "gemini"];

/// Create a model client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    if NATIVE_ONLY.contains(&config.provider.as_str()) {
        return Err(ArborError::UnsupportedProvider(config.provider.clone()));
    }
    // Everything else uses the OpenAI-compatible client
    Ok(Arc::new(OpenAiClient::new()))
}

/// Client for `config.model` wrapped with retry and the configured fallbacks.
pub fn create_retrying_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>> {
    let primary = create_client(&config.model)?;
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| Ok((fb.clone(), create_client(fb)?)))
        .collect::<Result<Vec<_>>>()?;
    let retry = config.model.retry.clone().unwrap_or_default();
    Ok(Arc::new(RetryingClient::new(primary, fallbacks, retry)))
}
