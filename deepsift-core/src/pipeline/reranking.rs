//! Reranking stage: reorder the verified sections and truncate.

use tracing::{info, warn};

use super::state::{DocRerankingUpdate, PipelineContext, PipelineState};
use super::stats::get_fit_scores;
use crate::models::{InferenceSection, RetrievalFitStats};
use crate::rerank::{SearchQuery, apply_rerank_scores};

/// Rerank the verified sections when a reranking model is configured.
///
/// Without active settings or without a reranker the verified order is kept.
/// A reranker failure also keeps the verified order.
pub async fn rerank_documents(ctx: &PipelineContext, state: &PipelineState) -> DocRerankingUpdate {
    let verified = &state.verified_documents;
    let search_query = SearchQuery::preprocess(&state.question, ctx.search_tool.as_ref());

    let mut reranked: Vec<InferenceSection> =
        match (search_query.active_rerank_settings(), ctx.reranker.as_ref()) {
            (Some(settings), Some(reranker)) => {
                match reranker.rerank(&search_query, verified).await {
                    Ok(scores) => {
                        info!(
                            sub_question = %state.sub_question_id,
                            model = reranker.model_name(),
                            num_rerank = settings.num_rerank,
                            scored = scores.len(),
                            "Reranked verified sections"
                        );
                        apply_rerank_scores(verified, scores)
                    }
                    Err(e) => {
                        warn!(
                            sub_question = %state.sub_question_id,
                            error = %e,
                            "Reranking failed, using unranked documents"
                        );
                        verified.clone()
                    }
                }
            }
            _ => {
                warn!(
                    sub_question = %state.sub_question_id,
                    "No reranking settings found, using unranked documents"
                );
                verified.clone()
            }
        };

    reranked.truncate(ctx.config.retrieval.max_reranked_results);

    let sub_question_retrieval_stats = if ctx.config.retrieval.enable_rerank_stats {
        get_fit_scores(verified, &reranked)
    } else {
        RetrievalFitStats::default()
    };

    DocRerankingUpdate {
        reranked_documents: reranked,
        sub_question_retrieval_stats,
    }
}
