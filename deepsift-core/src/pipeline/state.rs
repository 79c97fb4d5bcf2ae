//! Pipeline state, update fragments and merge rules.
//!
//! Nodes never touch the shared accumulator. Each returns an update fragment
//! and the orchestrator folds fragments into `PipelineState` according to the
//! per-field rule in [`StateField::merge_rule`]. Append and replace are both
//! insensitive to the completion order of fan-out tasks writing disjoint
//! fields, and append is the only rule used by fan-out outputs.

use std::sync::Arc;
use uuid::Uuid;

use crate::brain::LlmProvider;
use crate::config::RetrievalConfig;
use crate::events::EventSink;
use crate::models::{
    ExpandedRetrievalResult, InferenceSection, QueryResult, RetrievalFitStats, SubQuestionId,
};
use crate::rerank::Reranker;
use crate::search::SearchTool;

/// How a field absorbs a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    Append,
    Replace,
}

/// Fields of `PipelineState` that fragments write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    ExpandedQueries,
    ExpandedRetrievalResults,
    RetrievedDocuments,
    VerifiedDocuments,
    RerankedDocuments,
    SubQuestionRetrievalStats,
    ExpandedRetrievalResult,
}

impl StateField {
    pub const fn merge_rule(self) -> MergeRule {
        match self {
            StateField::ExpandedRetrievalResults
            | StateField::RetrievedDocuments
            | StateField::VerifiedDocuments => MergeRule::Append,
            StateField::ExpandedQueries
            | StateField::RerankedDocuments
            | StateField::SubQuestionRetrievalStats
            | StateField::ExpandedRetrievalResult => MergeRule::Replace,
        }
    }
}

fn merge_list<T>(field: StateField, target: &mut Vec<T>, value: Vec<T>) {
    match field.merge_rule() {
        MergeRule::Append => target.extend(value),
        MergeRule::Replace => *target = value,
    }
}

/// The original search request a unit of work belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
}

/// Per-run configuration shared by every node.
#[derive(Debug, Clone, Default)]
pub struct SubgraphConfig {
    pub search_request: SearchRequest,
    /// Required: events are attributed to this chat session.
    pub chat_session_id: Option<Uuid>,
    pub retrieval: RetrievalConfig,
}

/// Collaborators and configuration handed to every node.
///
/// Everything is behind `Arc`, so concurrently running node instances share
/// nothing mutable.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: SubgraphConfig,
    pub fast_llm: Arc<dyn LlmProvider>,
    pub search_tool: Arc<dyn SearchTool>,
    pub reranker: Option<Arc<dyn Reranker>>,
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("fast_llm", &self.fast_llm.model_name())
            .field(
                "reranker",
                &self.reranker.as_ref().map(|r| r.model_name().to_string()),
            )
            .finish()
    }
}

/// Input of one expanded-retrieval run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedRetrievalInput {
    /// Question to expand; `None` means the original search request's query.
    pub question: Option<String>,
    /// `None` means the original question, `(0, 0)`.
    pub sub_question_id: Option<SubQuestionId>,
}

/// Accumulator threaded through all stages of one unit of work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    pub question: String,
    pub sub_question_id: SubQuestionId,
    pub expanded_queries: Vec<String>,
    pub expanded_retrieval_results: Vec<QueryResult>,
    pub retrieved_documents: Vec<InferenceSection>,
    pub verified_documents: Vec<InferenceSection>,
    pub reranked_documents: Vec<InferenceSection>,
    pub sub_question_retrieval_stats: RetrievalFitStats,
    pub expanded_retrieval_result: Option<ExpandedRetrievalResult>,
}

impl PipelineState {
    /// Seed the state for `input`.
    pub fn new(input: ExpandedRetrievalInput, config: &SubgraphConfig) -> Self {
        Self {
            question: input
                .question
                .unwrap_or_else(|| config.search_request.query.clone()),
            sub_question_id: input.sub_question_id.unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Fold one fragment into the state.
    pub fn apply(&mut self, update: impl StateUpdate) {
        update.merge_into(self);
    }

    /// Fold every fragment of a fan-out stage into the state.
    pub fn apply_all<U: StateUpdate>(&mut self, updates: impl IntoIterator<Item = U>) {
        for update in updates {
            update.merge_into(self);
        }
    }
}

/// A fragment a node returns for the orchestrator to merge.
pub trait StateUpdate {
    fn merge_into(self, state: &mut PipelineState);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryExpansionUpdate {
    pub expanded_queries: Vec<String>,
}

impl StateUpdate for QueryExpansionUpdate {
    fn merge_into(self, state: &mut PipelineState) {
        merge_list(
            StateField::ExpandedQueries,
            &mut state.expanded_queries,
            self.expanded_queries,
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocRetrievalUpdate {
    pub expanded_retrieval_results: Vec<QueryResult>,
    pub retrieved_documents: Vec<InferenceSection>,
}

impl StateUpdate for DocRetrievalUpdate {
    fn merge_into(self, state: &mut PipelineState) {
        merge_list(
            StateField::ExpandedRetrievalResults,
            &mut state.expanded_retrieval_results,
            self.expanded_retrieval_results,
        );
        merge_list(
            StateField::RetrievedDocuments,
            &mut state.retrieved_documents,
            self.retrieved_documents,
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocVerificationUpdate {
    pub verified_documents: Vec<InferenceSection>,
}

impl StateUpdate for DocVerificationUpdate {
    fn merge_into(self, state: &mut PipelineState) {
        merge_list(
            StateField::VerifiedDocuments,
            &mut state.verified_documents,
            self.verified_documents,
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocRerankingUpdate {
    pub reranked_documents: Vec<InferenceSection>,
    pub sub_question_retrieval_stats: RetrievalFitStats,
}

impl StateUpdate for DocRerankingUpdate {
    fn merge_into(self, state: &mut PipelineState) {
        merge_list(
            StateField::RerankedDocuments,
            &mut state.reranked_documents,
            self.reranked_documents,
        );
        debug_assert_eq!(
            StateField::SubQuestionRetrievalStats.merge_rule(),
            MergeRule::Replace
        );
        state.sub_question_retrieval_stats = self.sub_question_retrieval_stats;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedRetrievalUpdate {
    pub expanded_retrieval_result: ExpandedRetrievalResult,
}

impl StateUpdate for ExpandedRetrievalUpdate {
    fn merge_into(self, state: &mut PipelineState) {
        debug_assert_eq!(
            StateField::ExpandedRetrievalResult.merge_rule(),
            MergeRule::Replace
        );
        state.expanded_retrieval_result = Some(self.expanded_retrieval_result);
    }
}
