//! Progress events emitted while a unit of work runs.
//!
//! The pipeline reports two kinds of incremental output to an external
//! observer: rewrite tokens from the query expander and raw responses from the
//! retrieval backend. Both carry the `(level, question_nr)` of the unit of work
//! that produced them. Emission is fire-and-forget.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::models::SubQuestionId;
use crate::search::SearchToolResponse;

/// One streamed piece of a rewritten query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQueryPiece {
    pub sub_query: String,
    pub level: usize,
    pub level_question_nr: usize,
    /// 1-based index of the expanded query this piece belongs to.
    pub query_id: usize,
}

/// A retrieval backend response, tagged with the unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedToolResponse {
    pub id: String,
    pub response: SearchToolResponse,
    pub level: usize,
    pub level_question_nr: usize,
}

impl ExtendedToolResponse {
    pub fn new(response: SearchToolResponse, sub_question: SubQuestionId) -> Self {
        Self {
            id: response.id().to_string(),
            response,
            level: sub_question.level,
            level_question_nr: sub_question.question_nr,
        }
    }
}

/// Closed set of events the pipeline emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum PipelineEvent {
    QueryToken(SubQueryPiece),
    ToolResponse(ExtendedToolResponse),
}

impl PipelineEvent {
    /// Stable event name.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::QueryToken(_) => "subqueries",
            PipelineEvent::ToolResponse(_) => "tool_response",
        }
    }

    pub fn sub_question(&self) -> SubQuestionId {
        match self {
            PipelineEvent::QueryToken(p) => SubQuestionId::new(p.level, p.level_question_nr),
            PipelineEvent::ToolResponse(r) => SubQuestionId::new(r.level, r.level_question_nr),
        }
    }
}

/// Receiver of pipeline progress events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Forwards events into an unbounded tokio channel.
///
/// A closed receiver is not an error; events are simply dropped.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory, for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All rewrite pieces, in emission order.
    pub fn query_pieces(&self) -> Vec<SubQueryPiece> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::QueryToken(p) => Some(p),
                PipelineEvent::ToolResponse(_) => None,
            })
            .collect()
    }

    /// All tool responses, in emission order.
    pub fn tool_responses(&self) -> Vec<ExtendedToolResponse> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::ToolResponse(r) => Some(r),
                PipelineEvent::QueryToken(_) => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
