//! The expanded-retrieval orchestrator.
//!
//! Stages run in a fixed order:
//!
//! ```text
//! expand ──► retrieve ×N ──► verify ×M ──► rerank ──► format
//!            (join_all)      (join_all)
//! ```
//!
//! Fan-out stages complete fully before the next stage starts. Their outputs
//! are folded into the state with append merges, so completion order does not
//! matter.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::expansion::expand_queries;
use super::retrieval::{dispatch_retrievals, retrieve_documents};
use super::reranking::rerank_documents;
use super::state::{
    ExpandedRetrievalInput, ExpandedRetrievalUpdate, PipelineContext, PipelineState,
    SearchRequest, StateUpdate, SubgraphConfig,
};
use super::stats::calculate_sub_question_retrieval_stats;
use super::verification::{dispatch_verifications, verify_document};
use crate::brain::LlmProvider;
use crate::config::RetrievalConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, NoOpEventSink};
use crate::models::ExpandedRetrievalResult;
use crate::rerank::Reranker;
use crate::search::SearchTool;

/// Run `node` over every work item concurrently and wait for all of them.
///
/// Results come back in work-item order.
pub async fn fan_out<I, U, F, Fut>(items: Vec<I>, node: F) -> Vec<U>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = U>,
{
    join_all(items.into_iter().map(node)).await
}

/// Assemble the result bundle from the state after reranking.
pub fn format_results(state: &PipelineState) -> ExpandedRetrievalUpdate {
    let sub_question_retrieval_stats = calculate_sub_question_retrieval_stats(
        &state.verified_documents,
        &state.expanded_retrieval_results,
    );
    ExpandedRetrievalUpdate {
        expanded_retrieval_result: ExpandedRetrievalResult {
            expanded_queries_results: state.expanded_retrieval_results.clone(),
            all_documents: state.reranked_documents.clone(),
            sub_question_retrieval_stats,
            rerank_stats: state.sub_question_retrieval_stats.clone(),
        },
    }
}

/// Expanded retrieval for one unit of work.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> deepsift_core::Result<()> {
/// use std::sync::Arc;
/// use deepsift_core::{ExpandedRetrieval, ExpandedRetrievalInput, MockLlmProvider};
/// use deepsift_core::search::{SearchConfig, SectionIndex};
///
/// let index = SectionIndex::build(SearchConfig::default(), vec![])?;
/// let pipeline = ExpandedRetrieval::new(
///     Arc::new(MockLlmProvider::with_response("refund policy")),
///     Arc::new(index),
/// )
/// .with_chat_session(uuid::Uuid::new_v4())
/// .with_search_request("What is the refund policy?");
///
/// let result = pipeline.run(ExpandedRetrievalInput::default()).await?;
/// println!("{} documents", result.all_documents.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExpandedRetrieval {
    ctx: PipelineContext,
}

impl ExpandedRetrieval {
    pub fn new(fast_llm: Arc<dyn LlmProvider>, search_tool: Arc<dyn SearchTool>) -> Self {
        Self {
            ctx: PipelineContext {
                config: SubgraphConfig::default(),
                fast_llm,
                search_tool,
                reranker: None,
                events: Arc::new(NoOpEventSink),
            },
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.ctx.reranker = Some(reranker);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.ctx.events = events;
        self
    }

    pub fn with_retrieval_config(mut self, config: RetrievalConfig) -> Self {
        self.ctx.config.retrieval = config;
        self
    }

    pub fn with_chat_session(mut self, chat_session_id: Uuid) -> Self {
        self.ctx.config.chat_session_id = Some(chat_session_id);
        self
    }

    /// The original search request; its query stands in for a missing question.
    pub fn with_search_request(mut self, query: impl Into<String>) -> Self {
        self.ctx.config.search_request = SearchRequest {
            query: query.into(),
        };
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run every stage and return the result bundle.
    ///
    /// Only configuration errors abort the run; backend failures degrade to
    /// empty or "not relevant" contributions.
    pub async fn run(&self, input: ExpandedRetrievalInput) -> Result<ExpandedRetrievalResult> {
        let ctx = &self.ctx;
        ctx.config.retrieval.validate()?;

        let mut state = PipelineState::new(input, &ctx.config);
        info!(
            sub_question = %state.sub_question_id,
            question = %state.question,
            "Starting expanded retrieval"
        );

        let expansion = expand_queries(ctx, &state).await?;
        state.apply(expansion);

        let retrievals = fan_out(dispatch_retrievals(&state), |item| {
            retrieve_documents(ctx, item)
        })
        .await;
        state.apply_all(retrievals);
        debug!(
            sub_question = %state.sub_question_id,
            queries = state.expanded_retrieval_results.len(),
            documents = state.retrieved_documents.len(),
            "Retrieval stage complete"
        );

        let verifications = fan_out(dispatch_verifications(&state), |item| {
            verify_document(ctx, item)
        })
        .await;
        state.apply_all(verifications);
        debug!(
            sub_question = %state.sub_question_id,
            verified = state.verified_documents.len(),
            "Verification stage complete"
        );

        let reranking = rerank_documents(ctx, &state).await;
        state.apply(reranking);

        format_results(&state).merge_into(&mut state);
        let result = state
            .expanded_retrieval_result
            .take()
            .ok_or(PipelineError::MissingStageOutput { stage: "format_results" })?;

        info!(
            sub_question = %state.sub_question_id,
            queries = result.expanded_queries_results.len(),
            documents = result.all_documents.len(),
            verified = result.sub_question_retrieval_stats.verified_count,
            rejected = result.sub_question_retrieval_stats.rejected_count,
            "Expanded retrieval complete"
        );
        Ok(result)
    }
}
