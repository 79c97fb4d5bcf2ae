//! Configuration system for deepsift.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/deepsift/config.toml` and/or `.deepsift/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::search::SearchConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepsiftConfig {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub search: SearchConfig,
}

/// Configuration for the fast LLM used for rewriting and verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name. Only OpenAI-compatible endpoints are built in.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 1024,
            temperature: 0.0,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings for transient LLM errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Knobs of the expanded-retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Truncation cap applied to each expanded query's raw retrieval.
    pub max_retrieval_results: usize,
    /// Truncation cap applied after reranking.
    pub max_reranked_results: usize,
    /// Compute fit statistics for every expanded query.
    pub enable_retrieval_stats: bool,
    /// Compute fit statistics for the rerank step.
    pub enable_rerank_stats: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_retrieval_results: 15,
            max_reranked_results: 10,
            enable_retrieval_stats: false,
            enable_rerank_stats: false,
        }
    }
}

impl RetrievalConfig {
    /// Reject settings that would make every run return nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retrieval_results == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.max_retrieval_results must be at least 1".to_string(),
            });
        }
        if self.max_reranked_results == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.max_reranked_results must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DEEPSIFT_`)
/// 3. Workspace-local config (`.deepsift/config.toml`)
/// 4. User config (`~/.config/deepsift/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepsiftConfig>,
) -> Result<DeepsiftConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DeepsiftConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "deepsift", "deepsift") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepsift").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPSIFT_RETRIEVAL__MAX_RERANKED_RESULTS, DEEPSIFT_LLM__MODEL, ...
    figment = figment.merge(Env::prefixed("DEEPSIFT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "deepsift", "deepsift")
        && config_dir.config_dir().join("config.toml").exists()
    {
        return true;
    }

    workspace.is_some_and(|ws| ws.join(".deepsift").join("config.toml").exists())
}
