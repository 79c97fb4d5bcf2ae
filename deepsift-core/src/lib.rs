//! # Deepsift Core
//!
//! Expanded-retrieval orchestration: rewrite a question into several search
//! queries, retrieve for each in parallel, verify every candidate with a fast
//! LLM, rerank the survivors and report per-query results plus retrieval
//! quality statistics. Progress (rewrite tokens, backend responses) streams to
//! an [`EventSink`] while the pipeline runs.

pub mod brain;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod rerank;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{DeepsiftConfig, LlmConfig, RetrievalConfig, RetryConfig};
pub use error::{DeepsiftError, Result};
pub use events::{
    ChannelEventSink, EventSink, ExtendedToolResponse, NoOpEventSink, PipelineEvent,
    RecordingEventSink, SubQueryPiece,
};
pub use models::{
    AgentChunkStats, ChunkKey, ExpandedRetrievalResult, InferenceChunk, InferenceSection,
    QueryResult, RetrievalFitStats, SubQuestionId,
};
pub use pipeline::{ExpandedRetrieval, ExpandedRetrievalInput};
pub use rerank::{EmbeddingReranker, Reranker, RerankSettings};
pub use search::{SearchOptions, SearchTool, SearchToolResponse, SectionIndex};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StreamEvent, TokenUsage};
