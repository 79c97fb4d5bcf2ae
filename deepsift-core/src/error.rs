//! Error types for the deepsift core library.
//!
//! Uses `thiserror` for public API error types. Only configuration errors
//! abort a unit of work; backend failures are caught at the fan-out task level
//! and converted into neutral contributions (empty results, "not relevant").

use std::path::PathBuf;

/// Top-level error type for the deepsift core library.
#[derive(Debug, thiserror::Error)]
pub enum DeepsiftError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Rerank error: {0}")]
    Rerank(#[from] RerankError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the retrieval backend.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Search backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the reranking backend.
#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("Rerank model '{model}' failed: {message}")]
    ModelFailed { model: String, message: String },

    #[error("Rerank model not available: {model}")]
    ModelUnavailable { model: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },
}

/// Errors raised by the pipeline orchestrator itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid sub-question id '{value}': expected '<level>_<question_nr>'")]
    InvalidSubQuestionId { value: String },

    #[error("Stage '{stage}' finished without producing its output")]
    MissingStageOutput { stage: &'static str },
}

/// A type alias for results using the top-level `DeepsiftError`.
pub type Result<T> = std::result::Result<T, DeepsiftError>;
