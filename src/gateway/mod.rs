//! Gateway for the external reasoning service.
//!
//! The pipeline only depends on the [`ChatGateway`] trait: a system
//! instruction plus a user payload in, a single free-form text response out.
//! [`ProviderGateway`] is the production implementation, wrapping an
//! OpenAI-compatible adapter with transport-level retry. Stage-level
//! validation retry lives in the pipeline, not here; the two budgets are
//! independent.

pub mod error;
pub mod openai;
pub mod types;

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use openai::ChatProvider;

pub use error::{ErrorContext, ProviderError};
pub use openai::OpenAiAdapter;
pub use types::*;

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct ProviderGateway {
    adapter: OpenAiAdapter,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl ChatGateway for ProviderGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl ProviderGateway {
    pub fn from_env() -> Result<Self, ProviderError> {
        let adapter = OpenAiAdapter::from_env()?;
        Ok(Self {
            adapter,
            config: GatewayConfig::default(),
        })
    }

    pub fn with_config(adapter: OpenAiAdapter, config: GatewayConfig) -> Self {
        Self { adapter, config }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.adapter.chat(&req).await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        code = err.code(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transport error, retrying"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::provider("openai", "unknown error", false)))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
        // capped exponent
        assert_eq!(backoff_delay(base, 9), Duration::from_millis(3_200));
    }
}
