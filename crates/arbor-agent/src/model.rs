use std::sync::Arc;

use tracing::debug;

use arbor_core::config::ModelConfig;
use arbor_core::error::Result;
use arbor_core::traits::LlmClient;
use arbor_core::types::{ModelRequest, ModelResponse};

/// A model client paired with the configuration it should be called with.
#[derive(Clone)]
pub struct BoundModel {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl BoundModel {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse> {
        debug!(
            model = %self.config.model_id,
            messages = request.messages.len(),
            tools = request.tools.len(),
            structured = request.structured.as_ref().map(|s| s.name.as_str()).unwrap_or("none"),
            "Invoking model"
        );
        self.client.invoke(&self.config, request).await
    }
}

impl std::fmt::Debug for BoundModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundModel")
            .field("provider", &self.config.provider)
            .field("model_id", &self.config.model_id)
            .finish()
    }
}
