use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use arbor_core::config::{ModelConfig, RetryConfig};
use arbor_core::error::{ArborError, Result};
use arbor_core::traits::LlmClient;
use arbor_core::types::*;

/// A model client that retries failed requests and falls back to alternative providers.
pub struct RetryingClient {
    primary: Arc<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Arc<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Arc<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Arc<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &ArborError) -> bool {
    match e {
        ArborError::RateLimited(_) | ArborError::ModelTimeout(_) => true,
        ArborError::ModelRequest(msg) => {
            msg.contains("HTTP 500")
                || msg.contains("HTTP 502")
                || msg.contains("HTTP 503")
                || msg.contains("HTTP 504")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn invoke(
        &self,
        config: &ModelConfig,
        request: ModelRequest,
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.invoke(&config, request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying model request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted, try fallbacks
            if !self.fallbacks.is_empty() {
                info!("Primary model exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.invoke(fb_config, request.clone()).await {
                    Ok(response) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(response);
                    }
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| ArborError::ModelRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_test_utils::{model_config, ScriptedLlm};

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = retry_config();
        let d = calculate_backoff(10, &config);
        assert!(d <= Duration::from_millis(1200));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&ArborError::RateLimited("slow down".into())));
        assert!(is_retryable(&ArborError::ModelRequest("HTTP 503 Service Unavailable: x".into())));
        assert!(!is_retryable(&ArborError::ModelRequest("HTTP 400 Bad Request: x".into())));
        assert!(!is_retryable(&ArborError::ModelParse("bad json".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let llm = ScriptedLlm::new()
            .fail("HTTP 503 Service Unavailable: busy")
            .fail("HTTP 502 Bad Gateway: busy")
            .text("ok");
        let client = RetryingClient::new(Arc::new(llm.clone()), vec![], retry_config());
        let response = client
            .invoke(&model_config(), ModelRequest::new("", vec![]))
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let llm = ScriptedLlm::new().fail("HTTP 401 Unauthorized: bad key").text("never");
        let client = RetryingClient::new(Arc::new(llm.clone()), vec![], retry_config());
        let err = client
            .invoke(&model_config(), ModelRequest::new("", vec![]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_after_primary_fails() {
        let primary = ScriptedLlm::new().fail("HTTP 400 Bad Request: nope");
        let fallback = ScriptedLlm::new().text("from fallback");
        let client = RetryingClient::new(
            Arc::new(primary),
            vec![(model_config(), Arc::new(fallback) as Arc<dyn LlmClient>)],
            retry_config(),
        );
        let response = client
            .invoke(&model_config(), ModelRequest::new("", vec![]))
            .await
            .unwrap();
        assert_eq!(response.content, "from fallback");
    }
}
