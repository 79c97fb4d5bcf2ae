//! Brain module: LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait used by the query expander (streaming) and
//! the verifier (single-shot), plus a scriptable mock for tests and offline
//! runs.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, StreamEvent, TokenUsage};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Trait for LLM providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending events to the channel.
    ///
    /// Implementations send zero or more `StreamEvent::Token`s followed by a
    /// single `StreamEvent::Done`.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// A mock LLM provider for testing and development.
///
/// Answers from a queue of canned responses first, then from an optional
/// responder closure, then with a fixed fallback text.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<CompletionResponse>>,
    responder: Option<Responder>,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            responder: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::with_responder(move |_| Ok(text.clone()))
    }

    /// Create a MockLlmProvider that computes each answer from the request.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Create a MockLlmProvider whose every call fails.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::with_responder(move |_| {
            Err(LlmError::ApiRequest {
                message: message.clone(),
            })
        })
    }

    /// Queue a response to be returned by the next call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(response);
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Number of completions served so far (streaming or not).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            if !responses.is_empty() {
                return Ok(responses.remove(0));
            }
        }
        match &self.responder {
            Some(responder) => responder(&request).map(|text| Self::text_response(&text)),
            None => Ok(Self::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let response = self.complete(request).await?;
        // Word-sized tokens that keep their trailing whitespace, so the
        // concatenated stream reproduces the response exactly.
        for token in response.text().split_inclusive(char::is_whitespace) {
            let _ = tx.send(StreamEvent::Token(token.to_string())).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: response.usage,
            })
            .await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
