//! Retrieval: one backend search per expanded query.

use tracing::{debug, warn};

use super::state::{DocRetrievalUpdate, PipelineContext, PipelineState};
use super::stats::get_fit_scores;
use crate::events::{ExtendedToolResponse, PipelineEvent};
use crate::models::{QueryResult, SubQuestionId};
use crate::search::SearchOptions;

/// Work item handed to one retriever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalInput {
    pub query_to_retrieve: String,
    pub sub_question_id: SubQuestionId,
}

/// One retrieval work item per expanded query, in expansion order.
pub fn dispatch_retrievals(state: &PipelineState) -> Vec<RetrievalInput> {
    state
        .expanded_queries
        .iter()
        .map(|query| RetrievalInput {
            query_to_retrieve: query.clone(),
            sub_question_id: state.sub_question_id,
        })
        .collect()
}

fn empty_result(query: String) -> DocRetrievalUpdate {
    DocRetrievalUpdate {
        expanded_retrieval_results: vec![QueryResult {
            query,
            search_results: Vec::new(),
            stats: None,
        }],
        retrieved_documents: Vec::new(),
    }
}

/// Retrieve sections for one expanded query.
///
/// Never fails: a blank query skips the backend and a backend error is
/// logged; both contribute an empty `QueryResult`.
pub async fn retrieve_documents(ctx: &PipelineContext, input: RetrievalInput) -> DocRetrievalUpdate {
    let RetrievalInput {
        query_to_retrieve: query,
        sub_question_id,
    } = input;

    if query.trim().is_empty() {
        warn!(sub_question = %sub_question_id, "Empty query, skipping retrieval");
        return empty_result(query);
    }

    let options = SearchOptions {
        force_no_rerank: true,
    };
    let run = match ctx.search_tool.run(&query, &options).await {
        Ok(run) => run,
        Err(e) => {
            warn!(
                sub_question = %sub_question_id,
                query = %query,
                error = %e,
                "Retrieval failed, continuing without results"
            );
            return empty_result(query);
        }
    };

    for response in &run.responses {
        ctx.events.emit(PipelineEvent::ToolResponse(ExtendedToolResponse::new(
            response.clone(),
            sub_question_id,
        )));
    }

    let mut retrieved: Vec<_> = run.top_sections().map(<[_]>::to_vec).unwrap_or_default();
    retrieved.truncate(ctx.config.retrieval.max_retrieval_results);

    let stats = ctx.config.retrieval.enable_retrieval_stats.then(|| {
        let pre_rerank = run
            .retrieved_sections
            .as_deref()
            .filter(|sections| !sections.is_empty())
            .unwrap_or(&retrieved);
        get_fit_scores(pre_rerank, &retrieved)
    });

    debug!(
        sub_question = %sub_question_id,
        query = %query,
        results = retrieved.len(),
        "Retrieved sections"
    );

    DocRetrievalUpdate {
        expanded_retrieval_results: vec![QueryResult {
            query,
            search_results: retrieved.clone(),
            stats,
        }],
        retrieved_documents: retrieved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::SearchError;
    use crate::events::RecordingEventSink;
    use crate::models::{InferenceChunk, InferenceSection};
    use crate::pipeline::state::SubgraphConfig;
    use crate::search::{SearchRun, SearchTool, SearchToolResponse};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn section(doc: &str, score: f64) -> InferenceSection {
        InferenceSection::from_chunk(InferenceChunk {
            document_id: doc.into(),
            chunk_id: 0,
            score: Some(score),
            semantic_identifier: doc.into(),
            content: format!("content of {doc}"),
        })
    }

    struct FixedSearch {
        top: Vec<InferenceSection>,
        pre_rerank: Option<Vec<InferenceSection>>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedSearch {
        fn new(top: Vec<InferenceSection>) -> Self {
            Self {
                top,
                pre_rerank: None,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchTool for FixedSearch {
        async fn run(&self, _query: &str, options: &SearchOptions) -> Result<SearchRun, SearchError> {
            assert!(options.force_no_rerank);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SearchError::Unavailable("offline".into()));
            }
            Ok(SearchRun {
                responses: vec![
                    SearchToolResponse::Summary {
                        top_sections: self.top.clone(),
                        rephrased_query: None,
                    },
                    SearchToolResponse::FinalContextDocuments {
                        sections: self.top.clone(),
                    },
                ],
                retrieved_sections: self.pre_rerank.clone(),
            })
        }
    }

    fn context(
        search: Arc<FixedSearch>,
        sink: Arc<RecordingEventSink>,
        config: SubgraphConfig,
    ) -> PipelineContext {
        PipelineContext {
            config,
            fast_llm: Arc::new(MockLlmProvider::new()),
            search_tool: search,
            reranker: None,
            events: sink,
        }
    }

    fn input(query: &str) -> RetrievalInput {
        RetrievalInput {
            query_to_retrieve: query.into(),
            sub_question_id: SubQuestionId::new(1, 1),
        }
    }

    #[test]
    fn test_dispatch_one_item_per_query() {
        let state = PipelineState {
            expanded_queries: vec!["a".into(), "b".into()],
            sub_question_id: SubQuestionId::new(0, 0),
            ..Default::default()
        };
        let items = dispatch_retrievals(&state);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].query_to_retrieve, "b");
    }

    #[tokio::test]
    async fn test_retrieval_emits_tagged_responses_and_truncates() {
        let search = Arc::new(FixedSearch::new(vec![
            section("a", 0.9),
            section("b", 0.5),
            section("c", 0.1),
        ]));
        let sink = Arc::new(RecordingEventSink::new());
        let mut config = SubgraphConfig::default();
        config.retrieval.max_retrieval_results = 2;
        let ctx = context(search, sink.clone(), config);

        let update = retrieve_documents(&ctx, input("refund")).await;
        assert_eq!(update.retrieved_documents.len(), 2);
        assert_eq!(update.expanded_retrieval_results.len(), 1);
        assert!(update.expanded_retrieval_results[0].stats.is_none());

        let responses = sink.tool_responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, SearchToolResponse::SUMMARY_ID);
        assert!(responses.iter().all(|r| r.level == 1 && r.level_question_nr == 1));
    }

    #[tokio::test]
    async fn test_blank_query_skips_backend() {
        let search = Arc::new(FixedSearch::new(vec![section("a", 0.9)]));
        let sink = Arc::new(RecordingEventSink::new());
        let ctx = context(search.clone(), sink.clone(), SubgraphConfig::default());

        let update = retrieve_documents(&ctx, input("   ")).await;
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
        assert!(update.retrieved_documents.is_empty());
        assert!(update.expanded_retrieval_results[0].search_results.is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_fatal() {
        let mut search = FixedSearch::new(vec![section("a", 0.9)]);
        search.fail = true;
        let ctx = context(
            Arc::new(search),
            Arc::new(RecordingEventSink::new()),
            SubgraphConfig::default(),
        );
        let update = retrieve_documents(&ctx, input("refund")).await;
        assert!(update.retrieved_documents.is_empty());
        assert_eq!(update.expanded_retrieval_results[0].query, "refund");
    }

    #[tokio::test]
    async fn test_stats_without_pre_rerank_set_compare_to_self() {
        let search = Arc::new(FixedSearch::new(vec![section("a", 0.9), section("b", 0.5)]));
        let mut config = SubgraphConfig::default();
        config.retrieval.enable_retrieval_stats = true;
        let ctx = context(search, Arc::new(RecordingEventSink::new()), config);

        let update = retrieve_documents(&ctx, input("refund")).await;
        let stats = update.expanded_retrieval_results[0].stats.clone().unwrap();
        assert_eq!(stats.fit_score_lift, 0.0);
        assert_eq!(stats.rerank_effect, 0.0);
    }

    #[tokio::test]
    async fn test_stats_against_pre_rerank_set() {
        let mut search = FixedSearch::new(vec![section("b", 0.8), section("a", 0.2)]);
        search.pre_rerank = Some(vec![section("a", 0.2), section("b", 0.8)]);
        let mut config = SubgraphConfig::default();
        config.retrieval.enable_retrieval_stats = true;
        let ctx = context(Arc::new(search), Arc::new(RecordingEventSink::new()), config);

        let update = retrieve_documents(&ctx, input("refund")).await;
        let stats = update.expanded_retrieval_results[0].stats.clone().unwrap();
        assert!(stats.fit_score_lift > 0.0);
        assert_eq!(stats.rerank_effect, 1.0);
    }
}
