#![cfg(feature = "watsonx")]
//! watsonx adapter behaviour over a fake transport
//!
//! The fake stands in for the REST API so every degraded path can be
//! triggered without credentials or network access.

use rag_providers::watsonx::{EmbeddingRequest, TextGenRequest};
use rag_providers::{
    FoundationModelApi, GenerationRequest, ImageContent, LLMProvider, ProviderError, TextStream,
    WatsonxProvider,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

enum StreamBehaviour {
    Unsupported,
    Chunks(Vec<&'static str>, Option<&'static str>),
    FailsToStart,
}

struct FakeApi {
    text: Result<&'static str, &'static str>,
    stream: StreamBehaviour,
    embedding: Option<Vec<f32>>,
    delay: Option<Duration>,
    generate_calls: Mutex<Vec<TextGenRequest>>,
    embed_calls: Mutex<Vec<EmbeddingRequest>>,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            text: Ok("Granite says hi"),
            stream: StreamBehaviour::Unsupported,
            embedding: None,
            delay: None,
            generate_calls: Mutex::new(Vec::new()),
            embed_calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &'static str) -> Self {
        Self {
            text: Err(message),
            ..Self::new()
        }
    }

    fn generate_calls(&self) -> Vec<TextGenRequest> {
        self.generate_calls.lock().unwrap().clone()
    }
}

/// Formatted log output collected in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn api_error(message: &str) -> ProviderError {
    ProviderError::Api {
        provider: "watsonx",
        status: 500,
        message: message.to_string(),
    }
}

impl FoundationModelApi for FakeApi {
    fn generate(&self, request: &TextGenRequest) -> Result<String, ProviderError> {
        self.generate_calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.text.map(String::from).map_err(api_error)
    }

    fn generate_stream(&self, _request: &TextGenRequest) -> Result<TextStream, ProviderError> {
        match &self.stream {
            StreamBehaviour::Unsupported => Err(ProviderError::Unsupported("streaming")),
            StreamBehaviour::FailsToStart => Err(api_error("stream refused")),
            StreamBehaviour::Chunks(chunks, failure) => {
                let chunks: Vec<Result<String, ProviderError>> = chunks
                    .iter()
                    .map(|c| Ok(c.to_string()))
                    .chain(failure.map(|m| Err(api_error(m))))
                    .collect();
                Ok(TextStream::new(chunks.into_iter()))
            }
        }
    }

    fn embed(&self, request: &EmbeddingRequest) -> Result<Vec<f32>, ProviderError> {
        self.embed_calls.lock().unwrap().push(request.clone());
        self.embedding
            .clone()
            .ok_or(ProviderError::Unsupported("embeddings"))
    }
}

fn provider_with(api: FakeApi) -> (WatsonxProvider, Arc<FakeApi>) {
    let api = Arc::new(api);
    (WatsonxProvider::with_api("p1", api.clone()), api)
}

fn granite_request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new("ibm/granite-13b-chat-v2", prompt)
}

#[test]
fn test_completion_is_normalized() {
    let (provider, api) = provider_with(FakeApi::new());

    let result = provider.generate_completion(&granite_request("What is AI?"));

    assert_eq!(result.response, "Granite says hi");
    assert_eq!(result.model, "ibm/granite-13b-chat-v2");
    assert!(result.done);
    assert!(result.error.is_none());

    let calls = api.generate_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].project_id, "p1");
    assert_eq!(calls[0].input, "What is AI?");
    assert_eq!(calls[0].parameters, None);
}

#[test]
fn test_sampling_parameters_are_forwarded() {
    let (provider, api) = provider_with(FakeApi::new());

    provider.generate_completion(
        &granite_request("q")
            .with_max_tokens(64)
            .with_temperature(0.3)
            .with_top_p(0.9)
            .with_top_k(40),
    );

    let params = api.generate_calls()[0].parameters.clone().unwrap();
    assert_eq!(params.max_new_tokens, Some(64));
    assert_eq!(params.temperature, Some(0.3));
    assert_eq!(params.top_p, Some(0.9));
    assert_eq!(params.top_k, Some(40));
    assert_eq!(params.decoding_method.as_deref(), Some("sample"));
}

#[test]
fn test_failed_completion_degrades() {
    let (provider, _api) = provider_with(FakeApi::failing("model overloaded"));

    let result = provider.generate_completion(&granite_request("q"));

    assert!(result.response.is_empty());
    assert!(!result.done);
    assert!(result.error.unwrap().contains("model overloaded"));
}

#[test]
fn test_images_are_dropped_and_call_succeeds() {
    let (provider, api) = provider_with(FakeApi::new());
    let request = granite_request("Describe this page")
        .with_images(vec![ImageContent::new("image/png", "aGVsbG8=".to_string())])
        .with_format("json")
        .with_thinking(true);

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, || {
        provider.generate_completion(&request)
    });
    assert_eq!(result.response, "Granite says hi");

    let output = logs.contents();
    assert!(output.contains("WARN"), "missing warning in: {}", output);
    assert!(output.contains("watsonx does not accept image input; ignoring 1 image(s)"));

    let sent = serde_json::to_value(&api.generate_calls()[0]).unwrap();
    let mut keys: Vec<&str> = sent.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["input", "model_id", "project_id"]);
}

#[test]
fn test_mid_stream_failure_ends_with_empty_chunk() {
    let api = FakeApi {
        stream: StreamBehaviour::Chunks(vec!["Hel", "lo"], Some("connection reset")),
        ..FakeApi::new()
    };
    let (provider, _api) = provider_with(api);

    let chunks: Vec<String> = provider.stream_completion(&granite_request("q")).collect();
    assert_eq!(chunks, vec!["Hel".to_string(), "lo".to_string(), String::new()]);
}

#[test]
fn test_stream_that_fails_to_start_yields_one_empty_chunk() {
    let api = FakeApi {
        stream: StreamBehaviour::FailsToStart,
        ..FakeApi::new()
    };
    let (provider, _api) = provider_with(api);

    let chunks: Vec<String> = provider.stream_completion(&granite_request("q")).collect();
    assert_eq!(chunks, vec![String::new()]);
}

#[test]
fn test_unsupported_streaming_falls_back_to_single_chunk() {
    let (provider, api) = provider_with(FakeApi::new());

    let chunks: Vec<String> = provider.stream_completion(&granite_request("q")).collect();

    assert_eq!(chunks, vec!["Granite says hi"]);
    assert_eq!(api.generate_calls().len(), 1);
}

#[test]
fn test_streams_are_independent() {
    let api = FakeApi {
        stream: StreamBehaviour::Chunks(vec!["a", "b"], None),
        ..FakeApi::new()
    };
    let (provider, _api) = provider_with(api);
    let request = granite_request("q");

    let mut first = provider.stream_completion(&request);
    assert_eq!(first.next().as_deref(), Some("a"));
    let second: Vec<String> = provider.stream_completion(&request).collect();
    assert_eq!(second, vec!["a", "b"]);
    assert_eq!(first.next().as_deref(), Some("b"));
    assert_eq!(first.next(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_completion_matches_sync() {
    let (provider, _api) = provider_with(FakeApi::new());
    let request = granite_request("What is AI?").with_max_tokens(32);

    let sync_result = provider.generate_completion(&request);
    let async_result = provider.generate_completion_async(&request).await;

    assert_eq!(sync_result, async_result);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_failure_matches_sync() {
    let (provider, _api) = provider_with(FakeApi::failing("quota exceeded"));
    let request = granite_request("q");

    let sync_result = provider.generate_completion(&request);
    let async_result = provider.generate_completion_async(&request).await;

    assert_eq!(sync_result, async_result);
    assert!(async_result.is_error());
}

#[tokio::test]
async fn test_blocking_calls_on_current_thread_runtime_degrade() {
    let api = FakeApi {
        stream: StreamBehaviour::Chunks(vec!["a"], None),
        embedding: Some(vec![0.5]),
        ..FakeApi::new()
    };
    let (provider, api) = provider_with(api);
    let request = granite_request("q");

    let result = provider.generate_completion(&request);
    assert!(result.is_error());
    assert!(!result.done);

    let chunks: Vec<String> = provider.stream_completion(&request).collect();
    assert_eq!(chunks, vec![String::new()]);
    assert!(provider.generate_embedding("ibm/slate-125m-english-rtrvr", "q").is_empty());
    assert!(api.generate_calls().is_empty());

    // The async path runs on the blocking pool and still works here
    let async_result = provider.generate_completion_async(&request).await;
    assert_eq!(async_result.response, "Granite says hi");
}

#[tokio::test]
async fn test_async_timeout_yields_timeout_result() {
    let api = FakeApi {
        delay: Some(Duration::from_millis(300)),
        ..FakeApi::new()
    };
    let (provider, _api) = provider_with(api);
    let request = granite_request("slow").with_timeout(Duration::from_millis(20));

    let result = provider.generate_completion_async(&request).await;

    assert!(result.is_timeout());
    assert!(result.response.is_empty());
    assert!(!result.done);
    assert_eq!(result.model, "ibm/granite-13b-chat-v2");
}

#[test]
fn test_embedding_success_sends_project() {
    let api = FakeApi {
        embedding: Some(vec![0.25, -0.5, 1.0]),
        ..FakeApi::new()
    };
    let (provider, api) = provider_with(api);

    let embedding = provider.generate_embedding("ibm/slate-125m-english-rtrvr", "chunk text");

    assert_eq!(embedding, vec![0.25, -0.5, 1.0]);
    let calls = api.embed_calls.lock().unwrap();
    assert_eq!(calls[0].inputs, vec!["chunk text".to_string()]);
    assert_eq!(calls[0].project_id, "p1");
    assert_eq!(calls[0].model_id, "ibm/slate-125m-english-rtrvr");
}

#[test]
fn test_embedding_failure_is_empty() {
    let (provider, _api) = provider_with(FakeApi::new());

    assert!(provider
        .generate_embedding("ibm/slate-125m-english-rtrvr", "chunk text")
        .is_empty());
}
