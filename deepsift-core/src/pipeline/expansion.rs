//! Query expansion: rewrite a question into several search queries.
//!
//! The rewrite is streamed from the fast LLM. Every token is forwarded to the
//! event sink as it arrives, attributed to the rewrite it belongs to, and the
//! full text is split into one query per line once the stream completes.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::prompts::rewrite_prompt;
use super::state::{PipelineContext, PipelineState, QueryExpansionUpdate};
use crate::error::{ConfigError, LlmError, Result};
use crate::events::{EventSink, PipelineEvent, SubQueryPiece};
use crate::models::SubQuestionId;
use crate::types::{CompletionRequest, StreamEvent};

/// Collects streamed chunks; adjacent chunks are joined with no separator.
#[derive(Debug, Default, Clone)]
pub struct StreamAccumulator {
    buffer: String,
    chunks: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        self.chunks += 1;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Flush the accumulated text.
    pub fn finish(self) -> String {
        self.buffer
    }
}

/// Forwards rewrite tokens as `QueryToken` events.
///
/// The rewrite id starts at 1 and moves to the next query whenever a token
/// contains a line break: text before the break belongs to the current query,
/// text after it to the next one. Empty pieces are not emitted.
pub struct SubQueryDispatcher<'a> {
    sink: &'a dyn EventSink,
    sub_question: SubQuestionId,
    query_id: usize,
}

impl<'a> SubQueryDispatcher<'a> {
    pub fn new(sink: &'a dyn EventSink, sub_question: SubQuestionId) -> Self {
        Self {
            sink,
            sub_question,
            query_id: 1,
        }
    }

    /// Id of the query the next piece will be attributed to.
    pub fn current_query_id(&self) -> usize {
        self.query_id
    }

    pub fn dispatch(&mut self, token: &str) {
        let mut pieces = token.split('\n');
        if let Some(first) = pieces.next() {
            self.emit(first);
        }
        for piece in pieces {
            self.query_id += 1;
            self.emit(piece);
        }
    }

    fn emit(&self, piece: &str) {
        if piece.is_empty() {
            return;
        }
        self.sink.emit(PipelineEvent::QueryToken(SubQueryPiece {
            sub_query: piece.to_string(),
            level: self.sub_question.level,
            level_question_nr: self.sub_question.question_nr,
            query_id: self.query_id,
        }));
    }
}

/// One query per line, trimmed; `[question]` when every line is blank.
///
/// Blank lines stay in place as empty queries so that entry `k - 1` is the
/// query streamed under `query_id` `k`. Retrieval skips the empty ones.
pub fn split_rewrites(text: &str, question: &str) -> Vec<String> {
    let queries: Vec<String> = text
        .split('\n')
        .map(|line| line.trim().to_string())
        .collect();
    if queries.iter().all(String::is_empty) {
        vec![question.to_string()]
    } else {
        queries
    }
}

async fn stream_rewrite(
    ctx: &PipelineContext,
    question: &str,
    sub_question: SubQuestionId,
) -> (StreamAccumulator, std::result::Result<(), LlmError>) {
    let (tx, mut rx) = mpsc::channel(64);
    let request = CompletionRequest::from_prompt(rewrite_prompt(question));

    // Producer and consumer must run concurrently or the bounded channel
    // stalls once it fills up.
    let provider = ctx.fast_llm.clone();
    let producer = tokio::spawn(async move { provider.complete_streaming(request, tx).await });

    let mut accumulator = StreamAccumulator::new();
    let mut dispatcher = SubQueryDispatcher::new(ctx.events.as_ref(), sub_question);
    let mut stream_error = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Token(token) => {
                dispatcher.dispatch(&token);
                accumulator.push(&token);
            }
            StreamEvent::Done { usage } => {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Rewrite stream complete"
                );
                break;
            }
            StreamEvent::Error(message) => {
                stream_error = Some(LlmError::Streaming { message });
                break;
            }
        }
    }

    // Unblocks a producer still sending after an early break.
    drop(rx);
    let outcome = match producer.await {
        Ok(result) => result,
        Err(e) => Err(LlmError::Streaming {
            message: format!("Streaming task panicked: {e}"),
        }),
    };
    let outcome = match stream_error {
        Some(err) => Err(err),
        None => outcome,
    };
    (accumulator, outcome)
}

/// Expand the state's question into rewritten search queries.
pub async fn expand_queries(
    ctx: &PipelineContext,
    state: &PipelineState,
) -> Result<QueryExpansionUpdate> {
    if ctx.config.chat_session_id.is_none() {
        return Err(ConfigError::MissingField {
            field: "chat_session_id".to_string(),
        }
        .into());
    }

    let question = state.question.as_str();
    let (accumulator, outcome) = stream_rewrite(ctx, question, state.sub_question_id).await;

    if let Err(e) = outcome {
        if accumulator.is_empty() {
            warn!(
                sub_question = %state.sub_question_id,
                error = %e,
                "Query rewrite failed, searching with the question itself"
            );
            return Ok(QueryExpansionUpdate {
                expanded_queries: vec![question.to_string()],
            });
        }
        warn!(
            sub_question = %state.sub_question_id,
            error = %e,
            chunks = accumulator.chunk_count(),
            "Query rewrite stream ended early, using partial output"
        );
    }

    let expanded_queries = split_rewrites(&accumulator.finish(), question);
    info!(
        sub_question = %state.sub_question_id,
        count = expanded_queries.len(),
        "Expanded question into search queries"
    );
    Ok(QueryExpansionUpdate { expanded_queries })
}
