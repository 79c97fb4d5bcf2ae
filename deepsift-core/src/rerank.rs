//! Reranking backend.
//!
//! A reranker scores a set of sections against a transient search query. It
//! answers with `(index, score)` pairs pointing into the input; indices that do
//! not resolve to an input section are malformed and get dropped when the
//! scores are applied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::RerankError;
use crate::models::InferenceSection;
use crate::search::{SearchTool, SimpleEmbedder, cosine_similarity};

/// Active reranking configuration for one search context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerankSettings {
    pub rerank_model_name: Option<String>,
    /// How many leading sections the model should rescore.
    pub num_rerank: usize,
}

impl RerankSettings {
    /// Whether a model is configured with a positive rerank count.
    pub fn is_active(&self) -> bool {
        self.rerank_model_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
            && self.num_rerank > 0
    }
}

/// Transient query object built right before reranking.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    pub rerank_settings: Option<RerankSettings>,
}

impl SearchQuery {
    /// Resolve the effective reranking context for `question`.
    pub fn preprocess(question: &str, search_tool: &dyn SearchTool) -> Self {
        Self {
            query: question.trim().to_string(),
            rerank_settings: search_tool.rerank_settings(),
        }
    }

    /// The settings to rerank with, if reranking should happen at all.
    pub fn active_rerank_settings(&self) -> Option<&RerankSettings> {
        self.rerank_settings.as_ref().filter(|s| s.is_active())
    }
}

/// One reranker verdict: the input position and its new score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub score: f64,
}

/// Trait for reranking models.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `sections` against `query`.
    async fn rerank(
        &self,
        query: &SearchQuery,
        sections: &[InferenceSection],
    ) -> Result<Vec<RerankScore>, RerankError>;

    /// Get the name of this reranker.
    fn model_name(&self) -> &str;
}

/// Apply reranker scores to `sections`.
///
/// Scored sections come first in descending score order with their center
/// chunk score replaced by the rerank score; sections the reranker did not
/// score keep their relative order behind them. Out-of-range and repeated
/// indices are dropped.
pub fn apply_rerank_scores(
    sections: &[InferenceSection],
    mut scores: Vec<RerankScore>,
) -> Vec<InferenceSection> {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = HashSet::new();
    let mut reranked = Vec::with_capacity(sections.len());
    for RerankScore { index, score } in scores {
        let Some(section) = sections.get(index) else {
            warn!(index, total = sections.len(), "Dropping malformed rerank entry");
            continue;
        };
        if !seen.insert(index) {
            debug!(index, "Dropping duplicate rerank entry");
            continue;
        }
        let mut section = section.clone();
        section.center_chunk.score = Some(score);
        reranked.push(section);
    }

    reranked.extend(
        sections
            .iter()
            .enumerate()
            .filter(|(i, _)| !seen.contains(i))
            .map(|(_, s)| s.clone()),
    );
    reranked
}

/// Reranker scoring sections by bag-of-words cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct EmbeddingReranker {
    embedder: SimpleEmbedder,
}

impl EmbeddingReranker {
    pub const MODEL_NAME: &'static str = "bow-cosine";

    pub fn new(dimensions: usize) -> Self {
        Self {
            embedder: SimpleEmbedder::new(dimensions),
        }
    }
}

impl Default for EmbeddingReranker {
    fn default() -> Self {
        Self::new(128)
    }
}

#[async_trait]
impl Reranker for EmbeddingReranker {
    async fn rerank(
        &self,
        query: &SearchQuery,
        sections: &[InferenceSection],
    ) -> Result<Vec<RerankScore>, RerankError> {
        if query.query.is_empty() {
            return Err(RerankError::ModelFailed {
                model: Self::MODEL_NAME.to_string(),
                message: "empty query".to_string(),
            });
        }

        let limit = query
            .active_rerank_settings()
            .map(|s| s.num_rerank)
            .unwrap_or(sections.len());
        let query_embedding = self.embedder.embed(&query.query);

        Ok(sections
            .iter()
            .take(limit)
            .enumerate()
            .map(|(index, section)| {
                let embedding = self.embedder.embed(&section.combined_content);
                RerankScore {
                    index,
                    score: cosine_similarity(&query_embedding, &embedding) as f64,
                }
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
}
