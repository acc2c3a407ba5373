//! Mock LLM Provider for Testing
//!
//! A queue-driven implementation of [`LLMProvider`] for exercising components
//! without a running backend. Responses are returned in order and every request
//! is recorded for later assertions.
//!
//! # Example
//!
//! ```rust
//! use rag_providers::{GenerationRequest, LLMProvider, MockProvider, MockResponse};
//!
//! let provider = MockProvider::new()
//!     .with_response(MockResponse::streaming(vec!["Hello, ", "world!"]))
//!     .with_response(MockResponse::failure("backend unavailable"));
//!
//! let request = GenerationRequest::new("mock-model", "Say hi");
//! let chunks: Vec<String> = provider.stream_completion(&request).collect();
//! assert_eq!(chunks, vec!["Hello, ", "world!"]);
//!
//! let result = provider.generate_completion(&request);
//! assert!(result.is_error());
//! assert_eq!(provider.request_count(), 2);
//! ```

use crate::{
    run_blocking, CompletionStream, EmbeddingResult, GenerationRequest, GenerationResult,
    LLMProvider, ProviderError, TextStream,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A mock response that can be configured for testing
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    /// Fragments yielded by `stream_completion`; concatenated for completions
    pub chunks: Vec<String>,
    /// Raised after the chunks have been produced
    pub error: Option<String>,
}

impl MockResponse {
    /// Create a simple text-only response
    pub fn text(content: &str) -> Self {
        Self {
            chunks: vec![content.to_string()],
            error: None,
        }
    }

    /// Create a streaming text response with multiple chunks
    pub fn streaming(chunks: Vec<&str>) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::from).collect(),
            error: None,
        }
    }

    /// A call that fails before producing anything
    pub fn failure(message: &str) -> Self {
        Self {
            chunks: Vec::new(),
            error: Some(message.to_string()),
        }
    }

    /// A stream that yields `chunks` and then breaks
    pub fn fail_mid_stream(chunks: Vec<&str>, message: &str) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::from).collect(),
            error: Some(message.to_string()),
        }
    }

    fn provider_error(message: &str) -> ProviderError {
        ProviderError::Api {
            provider: "mock",
            status: 500,
            message: message.to_string(),
        }
    }
}

/// A mock LLM provider for testing
///
/// Clones share the response queues and the request log, so a test can keep
/// one handle while a component owns another.
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    /// Added to every async completion; lets tests run into the timeout
    latency: Option<Duration>,
    /// Queue of responses to return (FIFO)
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Default response when queue is empty
    default_response: Option<MockResponse>,
    embeddings: Arc<Mutex<Vec<Vec<f32>>>>,
    default_embedding: Option<Vec<f32>>,
    /// All requests received (for verification)
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    embedding_requests: Arc<Mutex<Vec<(String, String)>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            latency: None,
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: None,
            embeddings: Arc::new(Mutex::new(Vec::new())),
            default_embedding: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            embedding_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add a response to the queue
    pub fn with_response(self, response: MockResponse) -> Self {
        lock(&self.responses).push(response);
        self
    }

    /// Add multiple responses to the queue
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        lock(&self.responses).extend(responses);
        self
    }

    /// Set a default response when queue is empty
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Queue an embedding. With nothing queued and no default, embeddings come
    /// back empty, as they do from a backend without embedding support.
    pub fn with_embedding(self, embedding: Vec<f32>) -> Self {
        lock(&self.embeddings).push(embedding);
        self
    }

    pub fn with_default_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.default_embedding = Some(embedding);
        self
    }

    /// Get all requests that were made to this provider
    pub fn get_requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Get the number of completion and streaming requests made
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// `(model, text)` pairs passed to `generate_embedding`
    pub fn get_embedding_requests(&self) -> Vec<(String, String)> {
        lock(&self.embedding_requests).clone()
    }

    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
        lock(&self.embedding_requests).clear();
    }

    fn record(&self, request: &GenerationRequest) -> MockResponse {
        lock(&self.requests).push(request.clone());

        let mut responses = lock(&self.responses);
        if responses.is_empty() {
            self.default_response
                .clone()
                .unwrap_or_else(|| MockResponse::text("Mock response (no responses configured)"))
        } else {
            responses.remove(0)
        }
    }

    fn complete(&self, request: &GenerationRequest) -> GenerationResult {
        let response = self.record(request);
        match response.error {
            Some(message) => {
                GenerationResult::failure(&request.model, &MockResponse::provider_error(&message))
            }
            None => GenerationResult::success(&request.model, response.chunks.concat()),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LLMProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    // The blocking methods go through the same runtime guard as the real
    // adapters so misuse shows up in tests too.
    fn generate_completion(&self, request: &GenerationRequest) -> GenerationResult {
        run_blocking(|| self.complete(request))
            .unwrap_or_else(|e| GenerationResult::failure(&request.model, &e))
    }

    async fn generate_completion_async(&self, request: &GenerationRequest) -> GenerationResult {
        if let Some(latency) = self.latency {
            let timeout = request.timeout();
            if tokio::time::timeout(timeout, tokio::time::sleep(latency))
                .await
                .is_err()
            {
                return GenerationResult::failure(&request.model, &ProviderError::Timeout(timeout));
            }
        }
        self.complete(request)
    }

    fn stream_completion(&self, request: &GenerationRequest) -> CompletionStream {
        let response = self.record(request);
        let failure = response
            .error
            .map(|message| Err(MockResponse::provider_error(&message)));
        TextStream::new(response.chunks.into_iter().map(Ok).chain(failure))
    }

    fn generate_embedding(&self, model: &str, text: &str) -> EmbeddingResult {
        run_blocking(|| {
            lock(&self.embedding_requests).push((model.to_string(), text.to_string()));

            let mut embeddings = lock(&self.embeddings);
            if embeddings.is_empty() {
                self.default_embedding.clone().unwrap_or_default()
            } else {
                embeddings.remove(0)
            }
        })
        .unwrap_or_default()
    }
}

// ============================================================================
// Preset Scenarios for Common Test Cases
// ============================================================================

/// Preset scenarios for common testing patterns
pub mod scenarios {
    use super::*;

    /// Each call returns the next response in sequence
    pub fn multi_turn(responses: Vec<&str>) -> MockProvider {
        let mock_responses: Vec<MockResponse> =
            responses.into_iter().map(MockResponse::text).collect();
        MockProvider::new().with_responses(mock_responses)
    }

    /// Every call fails and every embedding is empty
    pub fn unavailable_backend() -> MockProvider {
        MockProvider::new().with_default_response(MockResponse::failure("connection refused"))
    }
}
