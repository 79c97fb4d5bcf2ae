//! Retrieval data model.
//!
//! Document sections as returned by the search backend, per-query results,
//! fit statistics and the result bundle handed back to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Identity of one unit of work: `(level, question_nr)`.
///
/// `(0, 0)` is the original question; generated sub-questions use higher
/// levels. Every streamed event carries this pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubQuestionId {
    pub level: usize,
    pub question_nr: usize,
}

impl SubQuestionId {
    pub const ORIGINAL: SubQuestionId = SubQuestionId {
        level: 0,
        question_nr: 0,
    };

    pub fn new(level: usize, question_nr: usize) -> Self {
        Self { level, question_nr }
    }

    pub fn is_original(&self) -> bool {
        *self == Self::ORIGINAL
    }
}

impl fmt::Display for SubQuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.level, self.question_nr)
    }
}

impl FromStr for SubQuestionId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::InvalidSubQuestionId {
            value: s.to_string(),
        };
        let (level, question_nr) = s.trim().split_once('_').ok_or_else(invalid)?;
        Ok(Self {
            level: level.parse().map_err(|_| invalid())?,
            question_nr: question_nr.parse().map_err(|_| invalid())?,
        })
    }
}

/// Identity of a chunk for deduplication and matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub document_id: String,
    pub chunk_id: usize,
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.document_id, self.chunk_id)
    }
}

/// The atomic retrievable unit inside a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceChunk {
    pub document_id: String,
    pub chunk_id: usize,
    /// Relevance score assigned by the backend, if any.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub semantic_identifier: String,
    #[serde(default)]
    pub content: String,
}

impl InferenceChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            document_id: self.document_id.clone(),
            chunk_id: self.chunk_id,
        }
    }
}

/// A retrieved section: a center chunk plus its surrounding context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSection {
    pub center_chunk: InferenceChunk,
    #[serde(default)]
    pub chunks: Vec<InferenceChunk>,
    pub combined_content: String,
}

impl InferenceSection {
    /// A section made of a single chunk.
    pub fn from_chunk(chunk: InferenceChunk) -> Self {
        Self {
            combined_content: chunk.content.clone(),
            chunks: vec![chunk.clone()],
            center_chunk: chunk,
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.center_chunk.key()
    }

    pub fn score(&self) -> Option<f64> {
        self.center_chunk.score
    }
}

/// Score-lift measurement between two ordered document lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalFitStats {
    pub fit_score_lift: f64,
    /// Share of top positions whose chunk changed between the two lists.
    pub rerank_effect: f64,
    /// Per-chunk score of the "after" list, keyed by `ChunkKey` string form.
    pub fit_scores: BTreeMap<String, f64>,
}

/// One expanded query and what it retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub search_results: Vec<InferenceSection>,
    /// Absent when retrieval statistics are disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RetrievalFitStats>,
}

/// Verified vs rejected chunk statistics for one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentChunkStats {
    pub verified_count: usize,
    pub verified_avg_scores: f64,
    pub rejected_count: usize,
    /// `None` when there is no scored rejected chunk.
    pub rejected_avg_scores: Option<f64>,
    pub verified_doc_chunk_ids: Vec<String>,
    pub dismissed_doc_chunk_ids: Vec<String>,
}

/// Terminal artifact of one expanded-retrieval run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandedRetrievalResult {
    pub expanded_queries_results: Vec<QueryResult>,
    pub all_documents: Vec<InferenceSection>,
    pub sub_question_retrieval_stats: AgentChunkStats,
    pub rerank_stats: RetrievalFitStats,
}
