//! LLM provider implementations.
//!
//! `OpenAiCompatibleProvider` talks to any endpoint that follows the OpenAI
//! chat completions API (OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio).
//! Use `create_provider()` to pick the implementation from config.

pub mod openai_compat;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `RateLimited` (respecting `retry_after_secs`), `Streaming`,
/// `Connection` and `Timeout`. Other errors return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::Streaming { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
    )
}

fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err {
        LlmError::RateLimited { retry_after_secs } => {
            retry_after_secs.saturating_mul(1000).max(computed)
        }
        _ => computed,
    }
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        capped + (capped as f64 * 0.25 * rand::random::<f64>()) as u64
    } else {
        capped
    }
}

/// Create an LLM provider based on the configuration.
///
/// `"mock"` selects the offline `MockLlmProvider`; every other provider name
/// is treated as OpenAI-compatible.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        _ => Ok(Arc::new(OpenAiCompatibleProvider::new(config)?)),
    }
}
