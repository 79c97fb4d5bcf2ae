//! # Retrieval backend (Tantivy + bag-of-words)
//!
//! `SearchTool` is the interface the pipeline consumes: one call per query,
//! answered with a sequence of typed responses. `SectionIndex` implements it
//! over an in-memory Tantivy index of `InferenceSection`s and blends the
//! full-text score with a simple hashed bag-of-words cosine similarity unless
//! the caller asks for backend-side reranking to be skipped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, doc};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::models::InferenceSection;
use crate::rerank::RerankSettings;

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

/// Per-call options for a search run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Skip backend-side reranking; the caller reranks later.
    pub force_no_rerank: bool,
}

/// Typed responses yielded by a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchToolResponse {
    /// The ranked top-K sections for the query.
    Summary {
        top_sections: Vec<InferenceSection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rephrased_query: Option<String>,
    },
    /// The sections the backend would hand to an answer generator.
    FinalContextDocuments { sections: Vec<InferenceSection> },
}

impl SearchToolResponse {
    pub const SUMMARY_ID: &'static str = "search_response_summary";
    pub const FINAL_CONTEXT_DOCUMENTS_ID: &'static str = "final_context_documents";

    /// Stable response id.
    pub fn id(&self) -> &'static str {
        match self {
            SearchToolResponse::Summary { .. } => Self::SUMMARY_ID,
            SearchToolResponse::FinalContextDocuments { .. } => Self::FINAL_CONTEXT_DOCUMENTS_ID,
        }
    }
}

/// Everything one search call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRun {
    pub responses: Vec<SearchToolResponse>,
    /// Candidate set before any backend-side reranking, if the backend keeps one.
    pub retrieved_sections: Option<Vec<InferenceSection>>,
}

impl SearchRun {
    /// The top sections of the `Summary` response, if one was yielded.
    pub fn top_sections(&self) -> Option<&[InferenceSection]> {
        self.responses.iter().rev().find_map(|r| match r {
            SearchToolResponse::Summary { top_sections, .. } => Some(top_sections.as_slice()),
            SearchToolResponse::FinalContextDocuments { .. } => None,
        })
    }
}

/// Trait for retrieval backends.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Retrieve sections for one query.
    async fn run(&self, query: &str, options: &SearchOptions) -> Result<SearchRun, SearchError>;

    /// Reranking configuration active for this backend.
    fn rerank_settings(&self) -> Option<RerankSettings> {
        None
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the bundled section index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Sections returned in the summary response.
    pub max_results: usize,
    /// Full-text hits fetched before blending.
    pub candidate_pool: usize,
    /// Dimensionality of the bag-of-words vectors.
    pub vector_dimensions: usize,
    /// Weight for full-text search scores in the blended score.
    pub full_text_weight: f32,
    /// Weight for vector similarity scores in the blended score.
    pub vector_weight: f32,
    /// Reranking model the pipeline should use after verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_model_name: Option<String>,
    /// Number of leading sections the reranking model rescores.
    pub num_rerank: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            candidate_pool: 50,
            vector_dimensions: 128,
            full_text_weight: 0.5,
            vector_weight: 0.5,
            rerank_model_name: None,
            num_rerank: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Simple bag-of-words embedder
// ---------------------------------------------------------------------------

/// A minimal bag-of-words embedder using term frequency.
#[derive(Debug, Clone)]
pub struct SimpleEmbedder {
    dimensions: usize,
}

impl SimpleEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Generate an L2-normalised term-frequency vector.
    ///
    /// Each word is hashed to a dimension index and its TF is accumulated.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ---------------------------------------------------------------------------
// Section index
// ---------------------------------------------------------------------------

/// In-memory full-text index over a fixed set of sections.
pub struct SectionIndex {
    config: SearchConfig,
    index: Index,
    reader: IndexReader,
    slot_field: Field,
    content_field: Field,
    sections: Vec<InferenceSection>,
    embedder: SimpleEmbedder,
}

impl std::fmt::Debug for SectionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionIndex")
            .field("config", &self.config)
            .field("indexed_count", &self.sections.len())
            .finish()
    }
}

impl SectionIndex {
    /// Build an index over `sections`.
    pub fn build(config: SearchConfig, sections: Vec<InferenceSection>) -> Result<Self, SearchError> {
        let mut schema_builder = Schema::builder();
        let slot_field = schema_builder.add_u64_field("slot", STORED);
        let title_field = schema_builder.add_text_field("title", TEXT);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer(50_000_000) // 50MB heap
            .map_err(|e| SearchError::IndexError(format!("Failed to create writer: {}", e)))?;

        for (slot, section) in sections.iter().enumerate() {
            writer
                .add_document(doc!(
                    slot_field => slot as u64,
                    title_field => section.center_chunk.semantic_identifier.as_str(),
                    content_field => section.combined_content.as_str(),
                ))
                .map_err(|e| SearchError::IndexError(format!("Failed to add document: {}", e)))?;
        }
        writer
            .commit()
            .map_err(|e| SearchError::IndexError(format!("Failed to commit: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::IndexError(format!("Failed to create reader: {}", e)))?;
        reader
            .reload()
            .map_err(|e| SearchError::IndexError(format!("Failed to reload reader: {}", e)))?;

        debug!(sections = sections.len(), "Section index built");

        Ok(Self {
            embedder: SimpleEmbedder::new(config.vector_dimensions),
            config,
            index,
            reader,
            slot_field,
            content_field,
            sections,
        })
    }

    /// Full-text candidates for `query`, best first, scored by BM25.
    pub fn search_text(&self, query: &str) -> Result<Vec<InferenceSection>, SearchError> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (parsed, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(query, errors = errors.len(), "Query parsed leniently");
        }

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(self.config.candidate_pool.max(1)))
            .map_err(|e| SearchError::IndexError(format!("Search failed: {}", e)))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| SearchError::IndexError(format!("Failed to retrieve doc: {}", e)))?;
            let Some(section) = doc
                .get_first(self.slot_field)
                .and_then(|v| v.as_u64())
                .and_then(|slot| self.sections.get(slot as usize))
            else {
                warn!("Indexed document without a valid slot");
                continue;
            };
            let mut section = section.clone();
            section.center_chunk.score = Some(score as f64);
            results.push(section);
        }
        Ok(results)
    }

    /// Reorder candidates by the weighted full-text + vector score.
    fn blend(&self, query: &str, candidates: &[InferenceSection]) -> Vec<InferenceSection> {
        let max_text = candidates
            .iter()
            .filter_map(|s| s.score())
            .fold(0.0f64, f64::max);
        let query_embedding = self.embedder.embed(query);

        let mut blended: Vec<InferenceSection> = candidates
            .iter()
            .map(|section| {
                let text = match (section.score(), max_text > 0.0) {
                    (Some(score), true) => score / max_text,
                    _ => 0.0,
                };
                let vector = cosine_similarity(
                    &query_embedding,
                    &self.embedder.embed(&section.combined_content),
                ) as f64;
                let mut section = section.clone();
                section.center_chunk.score = Some(
                    text * self.config.full_text_weight as f64
                        + vector * self.config.vector_weight as f64,
                );
                section
            })
            .collect();

        blended.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        blended
    }

    /// Number of indexed sections.
    pub fn indexed_count(&self) -> usize {
        self.sections.len()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

#[async_trait]
impl SearchTool for SectionIndex {
    /// Searches on the calling task. The index lives in RAM so this stays
    /// short; a disk-backed index should move `search_text` onto
    /// `tokio::task::spawn_blocking`.
    async fn run(&self, query: &str, options: &SearchOptions) -> Result<SearchRun, SearchError> {
        let candidates = self.search_text(query)?;

        let mut top_sections = if options.force_no_rerank {
            candidates.clone()
        } else {
            self.blend(query, &candidates)
        };
        top_sections.truncate(self.config.max_results);

        Ok(SearchRun {
            responses: vec![
                SearchToolResponse::Summary {
                    top_sections: top_sections.clone(),
                    rephrased_query: None,
                },
                SearchToolResponse::FinalContextDocuments {
                    sections: top_sections,
                },
            ],
            retrieved_sections: Some(candidates),
        })
    }

    fn rerank_settings(&self) -> Option<RerankSettings> {
        self.config
            .rerank_model_name
            .as_ref()
            .map(|name| RerankSettings {
                rerank_model_name: Some(name.clone()),
                num_rerank: self.config.num_rerank,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
