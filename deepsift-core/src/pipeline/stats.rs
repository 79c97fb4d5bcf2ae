//! Retrieval statistics.
//!
//! Fit scores compare two ordered document lists (before and after a step
//! such as reranking); chunk statistics summarize which retrieved chunks the
//! verifier kept.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{AgentChunkStats, ChunkKey, InferenceSection, QueryResult, RetrievalFitStats};

/// Cutoffs the fit score is averaged over.
pub const FIT_SCORE_CUTOFFS: [usize; 3] = [1, 5, 10];

/// Mean score of the first `k` positions; missing positions and unscored
/// sections count as zero.
fn fit_at(sections: &[InferenceSection], k: usize) -> f64 {
    let total: f64 = sections
        .iter()
        .take(k)
        .map(|s| s.score().unwrap_or(0.0))
        .sum();
    total / k as f64
}

fn fit_score(sections: &[InferenceSection]) -> f64 {
    FIT_SCORE_CUTOFFS
        .iter()
        .map(|&k| fit_at(sections, k))
        .sum::<f64>()
        / FIT_SCORE_CUTOFFS.len() as f64
}

/// Compare `before` and `after`.
///
/// `fit_score_lift` is the fit-score difference, `rerank_effect` the share of
/// the top positions whose chunk changed and `fit_scores` the per-chunk score
/// of the `after` list.
pub fn get_fit_scores(
    before: &[InferenceSection],
    after: &[InferenceSection],
) -> RetrievalFitStats {
    let window = FIT_SCORE_CUTOFFS[FIT_SCORE_CUTOFFS.len() - 1].min(before.len().max(after.len()));
    let rerank_effect = if window == 0 {
        0.0
    } else {
        let changed = (0..window)
            .filter(|&i| before.get(i).map(|s| s.key()) != after.get(i).map(|s| s.key()))
            .count();
        changed as f64 / window as f64
    };

    let fit_scores = after
        .iter()
        .map(|s| (s.key().to_string(), s.score().unwrap_or(0.0)))
        .collect::<BTreeMap<_, _>>();

    RetrievalFitStats {
        fit_score_lift: fit_score(after) - fit_score(before),
        rerank_effect,
        fit_scores,
    }
}

/// Partition every chunk retrieved for a unit of work into verified and
/// dismissed, and average the scores on each side.
///
/// A chunk scored by several queries contributes the mean of its scores.
/// Chunks that never received a score count toward the totals but not the
/// averages.
pub fn calculate_sub_question_retrieval_stats(
    verified_documents: &[InferenceSection],
    expanded_retrieval_results: &[QueryResult],
) -> AgentChunkStats {
    let mut order: Vec<ChunkKey> = Vec::new();
    let mut scores: HashMap<ChunkKey, Vec<f64>> = HashMap::new();
    for section in expanded_retrieval_results
        .iter()
        .flat_map(|r| r.search_results.iter())
    {
        let key = section.key();
        let entry = scores.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        if let Some(score) = section.score() {
            entry.push(score);
        }
    }

    let verified_keys: HashSet<ChunkKey> = verified_documents.iter().map(|s| s.key()).collect();

    let mean = |values: &[f64]| -> Option<f64> {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };

    let mut stats = AgentChunkStats::default();
    let mut verified_means = Vec::new();
    let mut rejected_means = Vec::new();
    for key in order {
        let key_mean = scores.get(&key).and_then(|v| mean(v.as_slice()));
        if verified_keys.contains(&key) {
            stats.verified_count += 1;
            stats.verified_doc_chunk_ids.push(key.to_string());
            verified_means.extend(key_mean);
        } else {
            stats.rejected_count += 1;
            stats.dismissed_doc_chunk_ids.push(key.to_string());
            rejected_means.extend(key_mean);
        }
    }

    stats.verified_avg_scores = mean(verified_means.as_slice()).unwrap_or(0.0);
    stats.rejected_avg_scores = mean(rejected_means.as_slice());
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InferenceChunk;

    fn section(doc: &str, score: Option<f64>) -> InferenceSection {
        InferenceSection::from_chunk(InferenceChunk {
            document_id: doc.into(),
            chunk_id: 0,
            score,
            semantic_identifier: doc.into(),
            content: String::new(),
        })
    }

    fn result(sections: Vec<InferenceSection>) -> QueryResult {
        QueryResult {
            query: "q".into(),
            search_results: sections,
            stats: None,
        }
    }

    #[test]
    fn test_identical_lists_have_no_lift() {
        let docs = vec![section("a", Some(0.9)), section("b", Some(0.5))];
        let stats = get_fit_scores(&docs, &docs);
        assert_eq!(stats.fit_score_lift, 0.0);
        assert_eq!(stats.rerank_effect, 0.0);
        assert_eq!(stats.fit_scores.len(), 2);
        assert_eq!(stats.fit_scores["a_0"], 0.9);
    }

    #[test]
    fn test_better_ordering_lifts_fit() {
        let before = vec![section("a", Some(0.1)), section("b", Some(0.9))];
        let after = vec![section("b", Some(0.9)), section("a", Some(0.1))];
        let stats = get_fit_scores(&before, &after);
        // Only fit@1 differs: (0.9 - 0.1) / 3.
        assert!((stats.fit_score_lift - 0.8 / 3.0).abs() < 1e-9);
        assert_eq!(stats.rerank_effect, 1.0);
    }

    #[test]
    fn test_empty_lists() {
        let stats = get_fit_scores(&[], &[]);
        assert_eq!(stats, RetrievalFitStats::default());
    }

    #[test]
    fn test_chunk_stats_partition() {
        let results = vec![
            result(vec![section("a", Some(0.8)), section("b", Some(0.2))]),
            result(vec![section("a", Some(0.6)), section("c", None)]),
        ];
        let verified = vec![section("a", Some(0.8))];
        let stats = calculate_sub_question_retrieval_stats(&verified, &results);

        assert_eq!(stats.verified_count, 1);
        assert_eq!(stats.rejected_count, 2);
        assert!((stats.verified_avg_scores - 0.7).abs() < 1e-9);
        assert_eq!(stats.rejected_avg_scores, Some(0.2));
        assert_eq!(stats.verified_doc_chunk_ids, vec!["a_0".to_string()]);
        assert_eq!(
            stats.dismissed_doc_chunk_ids,
            vec!["b_0".to_string(), "c_0".to_string()]
        );
    }

    #[test]
    fn test_chunk_stats_without_rejections() {
        let results = vec![result(vec![section("a", Some(0.4))])];
        let verified = vec![section("a", Some(0.4))];
        let stats = calculate_sub_question_retrieval_stats(&verified, &results);
        assert_eq!(stats.rejected_count, 0);
        assert_eq!(stats.rejected_avg_scores, None);
    }

    #[test]
    fn test_chunk_stats_empty() {
        let stats = calculate_sub_question_retrieval_stats(&[], &[]);
        assert_eq!(stats.verified_count, 0);
        assert_eq!(stats.verified_avg_scores, 0.0);
        assert_eq!(stats.rejected_avg_scores, None);
    }
}
