//! Integration tests for the expanded-retrieval pipeline.
//!
//! These drive `ExpandedRetrieval::run` end-to-end with `MockLlmProvider`, a
//! scripted search backend and a `RecordingEventSink`.

use async_trait::async_trait;
use deepsift_core::error::{ConfigError, DeepsiftError, SearchError};
use deepsift_core::events::RecordingEventSink;
use deepsift_core::models::{InferenceChunk, InferenceSection, SubQuestionId};
use deepsift_core::search::{
    SearchConfig, SearchOptions, SearchRun, SearchTool, SearchToolResponse, SectionIndex,
};
use deepsift_core::{
    EmbeddingReranker, ExpandedRetrieval, ExpandedRetrievalInput, LlmProvider, MockLlmProvider,
    RetrievalConfig, RetrievalFitStats,
};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

fn section(doc: &str, score: f64, content: &str) -> InferenceSection {
    InferenceSection::from_chunk(InferenceChunk {
        document_id: doc.to_string(),
        chunk_id: 0,
        score: Some(score),
        semantic_identifier: format!("{doc}.md"),
        content: content.to_string(),
    })
}

/// Search backend answering from a fixed query → sections table.
#[derive(Default)]
struct ScriptedSearch {
    results: HashMap<String, Vec<InferenceSection>>,
    pre_rerank: bool,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    fn with(mut self, query: &str, sections: Vec<InferenceSection>) -> Self {
        self.results.insert(query.to_string(), sections);
        self
    }

    fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchTool for ScriptedSearch {
    async fn run(&self, query: &str, options: &SearchOptions) -> Result<SearchRun, SearchError> {
        assert!(options.force_no_rerank, "retrieval must skip backend reranking");
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(query) {
            return Err(SearchError::Unavailable(format!("no shard for '{query}'")));
        }
        let top = self.results.get(query).cloned().unwrap_or_default();
        Ok(SearchRun {
            responses: vec![
                SearchToolResponse::Summary {
                    top_sections: top.clone(),
                    rephrased_query: None,
                },
                SearchToolResponse::FinalContextDocuments {
                    sections: top.clone(),
                },
            ],
            retrieved_sections: self.pre_rerank.then_some(top),
        })
    }
}

/// Rewrites into `rewrites`; answers "yes" for documents marked RELEVANT.
fn scripted_llm(rewrites: &'static str) -> MockLlmProvider {
    MockLlmProvider::with_responder(move |request| {
        let prompt = request.last_user_text().unwrap_or_default();
        if prompt.contains("DOCUMENT TEXT") {
            Ok(if prompt.contains("RELEVANT") {
                "Yes".to_string()
            } else {
                "No".to_string()
            })
        } else {
            Ok(rewrites.to_string())
        }
    })
}

fn refund_search() -> ScriptedSearch {
    ScriptedSearch::default()
        .with(
            "refund policy",
            vec![
                section("policy", 0.9, "RELEVANT: refunds are accepted within 30 days"),
                section("faq", 0.6, "Frequently asked questions about accounts"),
                section("terms", 0.4, "Terms of service for all customers"),
            ],
        )
        .with(
            "return window",
            vec![
                section("terms", 0.5, "Terms of service for all customers"),
                section("returns", 0.8, "RELEVANT: items can be returned unopened"),
                section("shipping", 0.3, "We ship with regional carriers"),
            ],
        )
}

fn pipeline(llm: Arc<dyn LlmProvider>, search: Arc<dyn SearchTool>) -> ExpandedRetrieval {
    ExpandedRetrieval::new(llm, search).with_chat_session(Uuid::new_v4())
}

#[tokio::test]
async fn test_refund_policy_end_to_end() {
    let llm = Arc::new(scripted_llm("refund policy\nreturn window"));
    let search = Arc::new(refund_search());
    let sink = Arc::new(RecordingEventSink::new());

    let result = pipeline(llm.clone(), search.clone())
        .with_event_sink(sink.clone())
        .run(ExpandedRetrievalInput {
            question: Some("What is the refund policy?".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    assert_eq!(result.expanded_queries_results.len(), 2);
    let queries: Vec<_> = result
        .expanded_queries_results
        .iter()
        .map(|r| r.query.as_str())
        .collect();
    assert_eq!(queries, vec!["refund policy", "return window"]);

    // Five distinct chunks, two of them relevant; no rerank model configured.
    let docs: Vec<_> = result
        .all_documents
        .iter()
        .map(|d| d.center_chunk.document_id.as_str())
        .collect();
    assert_eq!(docs, vec!["policy", "returns"]);

    let stats = &result.sub_question_retrieval_stats;
    assert_eq!(stats.verified_count, 2);
    assert_eq!(stats.rejected_count, 3);
    assert_eq!(stats.verified_doc_chunk_ids, vec!["policy_0", "returns_0"]);
    assert_eq!(
        stats.dismissed_doc_chunk_ids,
        vec!["faq_0", "terms_0", "shipping_0"]
    );
    assert!((stats.verified_avg_scores - 0.85).abs() < 1e-9);
    // terms averages (0.4 + 0.5) / 2 across its two retrievals.
    let rejected = stats.rejected_avg_scores.unwrap();
    assert!((rejected - (0.6 + 0.45 + 0.3) / 3.0).abs() < 1e-9);

    // One rewrite call plus one verification per distinct chunk.
    assert_eq!(llm.call_count(), 6);
    assert_eq!(search.calls(), 2);
    assert_eq!(result.rerank_stats, RetrievalFitStats::default());

    // Events: streamed rewrite pieces for both queries and two backend
    // responses per query, all attributed to the original question.
    let events = sink.events();
    assert!(events.iter().all(|e| e.sub_question().is_original()));
    let pieces = sink.query_pieces();
    let ids: HashSet<_> = pieces.iter().map(|p| p.query_id).collect();
    assert_eq!(ids, HashSet::from([1, 2]));
    assert_eq!(sink.tool_responses().len(), 4);
}

#[tokio::test]
async fn test_blank_question_short_circuits_retrieval() {
    let llm = Arc::new(scripted_llm(" \n"));
    let search = Arc::new(refund_search());

    let result = pipeline(llm, search.clone())
        .run(ExpandedRetrievalInput {
            question: Some(String::new()),
            sub_question_id: Some(SubQuestionId::new(1, 0)),
        })
        .await
        .unwrap();

    assert_eq!(search.calls(), 0);
    assert_eq!(result.expanded_queries_results.len(), 1);
    assert_eq!(result.expanded_queries_results[0].query, "");
    assert!(result.expanded_queries_results[0].search_results.is_empty());
    assert!(result.all_documents.is_empty());
    assert_eq!(result.sub_question_retrieval_stats.verified_count, 0);
    assert_eq!(result.sub_question_retrieval_stats.rejected_avg_scores, None);
}

#[tokio::test]
async fn test_blank_rewrite_line_is_kept_but_not_searched() {
    let llm = Arc::new(scripted_llm("refund policy\n\nreturn window"));
    let search = Arc::new(refund_search());
    let sink = Arc::new(RecordingEventSink::new());

    let result = pipeline(llm, search.clone())
        .with_event_sink(sink.clone())
        .run(ExpandedRetrievalInput {
            question: Some("What is the refund policy?".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    let queries: Vec<_> = result
        .expanded_queries_results
        .iter()
        .map(|r| r.query.as_str())
        .collect();
    assert_eq!(queries, vec!["refund policy", "", "return window"]);
    assert!(result.expanded_queries_results[1].search_results.is_empty());
    assert_eq!(search.calls(), 2);

    // Streamed ids still point at the query they belong to.
    for piece in sink.query_pieces() {
        let query = queries[piece.query_id - 1];
        assert!(query.contains(piece.sub_query.trim()));
    }
    let ids: HashSet<_> = sink.query_pieces().iter().map(|p| p.query_id).collect();
    assert_eq!(ids, HashSet::from([1, 3]));
    assert_eq!(result.sub_question_retrieval_stats.verified_count, 2);
}

#[tokio::test]
async fn test_missing_question_uses_search_request() {
    let llm = Arc::new(scripted_llm("refund policy"));
    let search = Arc::new(refund_search());

    let result = pipeline(llm.clone(), search)
        .with_search_request("How do refunds work?")
        .run(ExpandedRetrievalInput::default())
        .await
        .unwrap();
    assert_eq!(result.expanded_queries_results.len(), 1);
    assert_eq!(result.all_documents.len(), 1);
}

#[tokio::test]
async fn test_rerank_stats_disabled_are_zero_not_absent() {
    let llm = Arc::new(scripted_llm("refund policy\nreturn window"));
    let result = pipeline(llm, Arc::new(refund_search()))
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    assert_eq!(result.rerank_stats.fit_score_lift, 0.0);
    assert!(result.rerank_stats.fit_scores.is_empty());
    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("rerank_stats").is_some());
    assert!(
        result
            .expanded_queries_results
            .iter()
            .all(|r| r.stats.is_none())
    );
}

#[tokio::test]
async fn test_retrieval_stats_without_pre_rerank_set() {
    let llm = Arc::new(scripted_llm("refund policy\nreturn window"));
    let config = RetrievalConfig {
        enable_retrieval_stats: true,
        ..Default::default()
    };
    let result = pipeline(llm, Arc::new(refund_search()))
        .with_retrieval_config(config)
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    for query_result in &result.expanded_queries_results {
        let stats = query_result.stats.as_ref().unwrap();
        assert_eq!(stats.fit_score_lift, 0.0);
        assert_eq!(stats.fit_scores.len(), query_result.search_results.len());
    }
}

#[tokio::test]
async fn test_retrieval_results_are_truncated() {
    let llm = Arc::new(scripted_llm("refund policy"));
    let mut search = refund_search();
    search.pre_rerank = true;
    let config = RetrievalConfig {
        max_retrieval_results: 1,
        ..Default::default()
    };
    let result = pipeline(llm, Arc::new(search))
        .with_retrieval_config(config)
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();
    assert_eq!(result.expanded_queries_results[0].search_results.len(), 1);
    assert_eq!(result.sub_question_retrieval_stats.verified_count, 1);
    assert_eq!(result.sub_question_retrieval_stats.rejected_count, 0);
}

#[tokio::test]
async fn test_backend_failure_for_one_query_is_tolerated() {
    let llm = Arc::new(scripted_llm("refund policy\nreturn window"));
    let search = Arc::new(refund_search().failing_on("refund policy"));

    let result = pipeline(llm, search)
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    assert_eq!(result.expanded_queries_results.len(), 2);
    let failed = result
        .expanded_queries_results
        .iter()
        .find(|r| r.query == "refund policy")
        .unwrap();
    assert!(failed.search_results.is_empty());
    let docs: Vec<_> = result
        .all_documents
        .iter()
        .map(|d| d.center_chunk.document_id.as_str())
        .collect();
    assert_eq!(docs, vec!["returns"]);
}

#[tokio::test]
async fn test_model_outage_still_returns_bundle() {
    let llm = Arc::new(MockLlmProvider::failing("service unavailable"));
    let search = Arc::new(ScriptedSearch::default().with(
        "refunds",
        vec![section("policy", 0.9, "RELEVANT: refunds within 30 days")],
    ));

    let result = pipeline(llm, search)
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    // Rewrite fell back to the question itself; verification said "not relevant".
    assert_eq!(result.expanded_queries_results.len(), 1);
    assert_eq!(result.expanded_queries_results[0].search_results.len(), 1);
    assert!(result.all_documents.is_empty());
    assert_eq!(result.sub_question_retrieval_stats.rejected_count, 1);
}

#[tokio::test]
async fn test_missing_chat_session_is_fatal() {
    let llm = Arc::new(scripted_llm("refund policy"));
    let err = ExpandedRetrieval::new(llm, Arc::new(refund_search()))
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeepsiftError::Config(ConfigError::MissingField { ref field }) if field == "chat_session_id"
    ));
}

#[tokio::test]
async fn test_events_carry_sub_question_identity() {
    let llm = Arc::new(scripted_llm("refund policy\nreturn window"));
    let sink = Arc::new(RecordingEventSink::new());
    pipeline(llm, Arc::new(refund_search()))
        .with_event_sink(sink.clone())
        .run(ExpandedRetrievalInput {
            question: Some("refunds".into()),
            sub_question_id: Some(SubQuestionId::new(1, 2)),
        })
        .await
        .unwrap();

    let events = sink.events();
    assert!(!events.is_empty());
    assert!(
        events
            .iter()
            .all(|e| e.sub_question() == SubQuestionId::new(1, 2))
    );
    let kinds: HashSet<_> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, HashSet::from(["subqueries", "tool_response"]));

    let first_query: String = sink
        .query_pieces()
        .iter()
        .filter(|p| p.query_id == 1)
        .map(|p| p.sub_query.as_str())
        .collect();
    assert_eq!(first_query, "refund policy");
}

#[tokio::test]
async fn test_section_index_with_embedding_reranker() {
    let corpus = vec![
        section("policy", 0.0, "RELEVANT refund policy: refunds within 30 days"),
        section("damaged", 0.0, "RELEVANT damaged items get a refund"),
        section("carriers", 0.0, "RELEVANT shipping carriers and tracking refund"),
        section("hours", 0.0, "Support hours are 9 to 5"),
    ];
    let config = SearchConfig {
        rerank_model_name: Some(EmbeddingReranker::MODEL_NAME.to_string()),
        num_rerank: 10,
        ..Default::default()
    };
    let index = Arc::new(SectionIndex::build(config, corpus).unwrap());
    let llm = Arc::new(scripted_llm("refund\nrefund policy"));
    let retrieval = RetrievalConfig {
        max_reranked_results: 2,
        enable_rerank_stats: true,
        ..Default::default()
    };

    let result = pipeline(llm, index)
        .with_reranker(Arc::new(EmbeddingReranker::default()))
        .with_retrieval_config(retrieval)
        .run(ExpandedRetrievalInput {
            question: Some("refund policy".into()),
            sub_question_id: None,
        })
        .await
        .unwrap();

    assert_eq!(result.all_documents.len(), 2);
    let verified: HashSet<_> = result
        .sub_question_retrieval_stats
        .verified_doc_chunk_ids
        .iter()
        .cloned()
        .collect();
    assert!(
        result
            .all_documents
            .iter()
            .all(|d| verified.contains(&d.key().to_string()))
    );
    assert_eq!(result.all_documents[0].center_chunk.document_id, "policy");
    assert_eq!(result.rerank_stats.fit_scores.len(), 2);
}
