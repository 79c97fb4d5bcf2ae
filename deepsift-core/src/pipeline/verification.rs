//! Verification: ask the fast LLM whether each retrieved section is relevant.

use std::collections::HashSet;
use tracing::{debug, warn};

use super::prompts::verifier_prompt;
use super::state::{DocVerificationUpdate, PipelineContext, PipelineState};
use crate::models::{InferenceSection, SubQuestionId};
use crate::types::CompletionRequest;

/// Work item handed to one verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DocVerificationInput {
    pub doc_to_verify: InferenceSection,
    pub question: String,
    pub sub_question_id: SubQuestionId,
}

/// One verification work item per distinct retrieved chunk; the first
/// occurrence of a chunk wins.
pub fn dispatch_verifications(state: &PipelineState) -> Vec<DocVerificationInput> {
    let mut seen = HashSet::new();
    state
        .retrieved_documents
        .iter()
        .filter(|doc| seen.insert(doc.key()))
        .map(|doc| DocVerificationInput {
            doc_to_verify: doc.clone(),
            question: state.question.clone(),
            sub_question_id: state.sub_question_id,
        })
        .collect()
}

/// Whether a verifier answer counts as "relevant".
///
/// Any answer containing "yes" (case-insensitive) qualifies.
pub fn is_relevant_answer(answer: &str) -> bool {
    answer.to_lowercase().contains("yes")
}

/// Verify one section. A model failure counts as "not relevant".
pub async fn verify_document(
    ctx: &PipelineContext,
    input: DocVerificationInput,
) -> DocVerificationUpdate {
    let DocVerificationInput {
        doc_to_verify,
        question,
        sub_question_id,
    } = input;

    let request =
        CompletionRequest::from_prompt(verifier_prompt(&question, &doc_to_verify.combined_content));
    let relevant = match ctx.fast_llm.complete(request).await {
        Ok(response) => is_relevant_answer(response.text()),
        Err(e) => {
            warn!(
                sub_question = %sub_question_id,
                chunk = %doc_to_verify.key(),
                error = %e,
                "Verification failed, treating section as not relevant"
            );
            false
        }
    };

    debug!(
        sub_question = %sub_question_id,
        chunk = %doc_to_verify.key(),
        relevant,
        "Verified section"
    );

    DocVerificationUpdate {
        verified_documents: if relevant {
            vec![doc_to_verify]
        } else {
            Vec::new()
        },
    }
}
