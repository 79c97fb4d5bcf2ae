//! Expanded retrieval pipeline.
//!
//! Given one question and its `(level, question_nr)` identity the pipeline:
//!
//! 1. rewrites the question into several search queries with the fast LLM,
//!    streaming the rewrite tokens to the event sink;
//! 2. retrieves sections for every query concurrently;
//! 3. asks the fast LLM whether each distinct retrieved section is relevant,
//!    concurrently;
//! 4. reranks the relevant sections when a reranking model is configured;
//! 5. bundles the per-query results, final documents and statistics.
//!
//! Every stage is an async function from a view of [`PipelineState`] to an
//! update fragment; [`ExpandedRetrieval`] sequences the stages and merges the
//! fragments.

pub mod engine;
pub mod expansion;
pub mod prompts;
pub mod reranking;
pub mod retrieval;
pub mod state;
pub mod stats;
pub mod verification;

pub use engine::{ExpandedRetrieval, fan_out, format_results};
pub use expansion::{StreamAccumulator, SubQueryDispatcher, expand_queries};
pub use retrieval::{RetrievalInput, dispatch_retrievals, retrieve_documents};
pub use reranking::rerank_documents;
pub use state::{
    ExpandedRetrievalInput, MergeRule, PipelineContext, PipelineState, SearchRequest, StateField,
    StateUpdate, SubgraphConfig,
};
pub use stats::{calculate_sub_question_retrieval_stats, get_fit_scores};
pub use verification::{DocVerificationInput, dispatch_verifications, verify_document};
