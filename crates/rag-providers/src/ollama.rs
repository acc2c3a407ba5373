//! Ollama adapter for a locally hosted inference server.
//!
//! Blocking calls go through `reqwest::blocking`, created lazily so the adapter
//! can be constructed from inside an async runtime, and each one runs under
//! [`run_blocking`] so it is safe to call from there too. The async variant uses the
//! native async client. Streaming reads the NDJSON body of `/api/generate` one
//! line at a time.

use async_trait::async_trait;
use reqwest::blocking::Client as BlockingClient;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error};

use crate::streaming::body_lines;
use crate::{
    run_blocking, CompletionStream, EmbeddingResult, GenerationRequest, GenerationResult,
    LLMProvider, ProviderError, TextStream,
};

/// Local models can take minutes on long prompts; the blocking client
/// otherwise defaults to 30 seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Clone)]
pub struct OllamaProvider {
    name: String,
    host: String,
    client: Client,
    blocking: Arc<OnceLock<BlockingClient>>,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new_with_name("ollama".to_string(), host)
    }

    pub fn new_with_name(name: String, host: impl Into<String>) -> Result<Self, ProviderError> {
        let host = normalize_host(&host.into())?;
        let client = Client::builder().build()?;

        debug!("Initialized Ollama provider '{}' on host: {}", name, host);

        Ok(Self {
            name,
            host,
            client,
            blocking: Arc::new(OnceLock::new()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path)
    }

    fn blocking_client(&self) -> Result<&BlockingClient, ProviderError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = BlockingClient::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(self.blocking.get_or_init(|| client))
    }

    fn try_generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ProviderError> {
        debug!("Sending completion request to Ollama: model={}", request.model);

        let body = create_request_body(request, false);
        let response = self
            .blocking_client()?
            .post(self.url("api/generate"))
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status, error_text));
        }

        into_result(request, response.json()?)
    }

    async fn try_generate_async(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ProviderError> {
        let timeout = request.timeout();
        debug!(
            "Sending async completion request to Ollama: model={}, timeout={:?}",
            request.model, timeout
        );

        let body = create_request_body(request, false);
        let response = self
            .client
            .post(self.url("api/generate"))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_timeout(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status, error_text));
        }

        let parsed = response
            .json::<OllamaGenerateResponse>()
            .await
            .map_err(|e| map_timeout(e, timeout))?;
        into_result(request, parsed)
    }

    fn try_stream(&self, request: &GenerationRequest) -> Result<TextStream, ProviderError> {
        debug!("Sending streaming request to Ollama: model={}", request.model);

        let body = create_request_body(request, true);
        let response = self
            .blocking_client()?
            .post(self.url("api/generate"))
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status, error_text));
        }

        Ok(TextStream::new(ndjson_chunks(BufReader::new(response))))
    }

    fn try_embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        debug!("Sending embedding request to Ollama: model={}", model);

        let body = OllamaEmbedRequest { model, input: text };
        let response = self
            .blocking_client()?
            .post(self.url("api/embed"))
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status, error_text));
        }

        let parsed: OllamaEmbedResponse = response.json()?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .map(|embedding| embedding.into_iter().map(|x| x as f32).collect())
            .ok_or_else(|| ProviderError::Decode("Ollama returned no embeddings".to_string()))
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_completion(&self, request: &GenerationRequest) -> GenerationResult {
        match run_blocking(|| self.try_generate(request)).and_then(|result| result) {
            Ok(result) => result,
            Err(e) => {
                error!("Error generating completion: {}", e);
                GenerationResult::failure(&request.model, &e)
            }
        }
    }

    async fn generate_completion_async(&self, request: &GenerationRequest) -> GenerationResult {
        match self.try_generate_async(request).await {
            Ok(result) => result,
            Err(e) => {
                error!("Error generating completion: {}", e);
                GenerationResult::failure(&request.model, &e)
            }
        }
    }

    fn stream_completion(&self, request: &GenerationRequest) -> CompletionStream {
        run_blocking(|| self.try_stream(request))
            .and_then(|stream| stream)
            .unwrap_or_else(TextStream::failed)
    }

    fn generate_embedding(&self, model: &str, text: &str) -> EmbeddingResult {
        match run_blocking(|| self.try_embed(model, text)).and_then(|embedding| embedding) {
            Ok(embedding) => embedding,
            Err(e) => {
                error!("Error generating embedding: {}", e);
                Vec::new()
            }
        }
    }

    fn supports_images(&self) -> bool {
        true
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    fn supports_thinking(&self) -> bool {
        true
    }
}

/// Accept `host:port` as well as full URLs, the way `OLLAMA_HOST` is usually written.
fn normalize_host(host: &str) -> Result<String, ProviderError> {
    let host = host.trim();
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    url::Url::parse(&with_scheme)
        .map_err(|e| ProviderError::InvalidConfig(format!("invalid Ollama host '{}': {}", host, e)))?;
    Ok(with_scheme.trim_end_matches('/').to_string())
}

fn map_timeout(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Http(e)
    }
}

fn api_error(status: StatusCode, body: String) -> ProviderError {
    let message = serde_json::from_str::<OllamaErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    ProviderError::Api {
        provider: "ollama",
        status: status.as_u16(),
        message,
    }
}

fn into_result(
    request: &GenerationRequest,
    parsed: OllamaGenerateResponse,
) -> Result<GenerationResult, ProviderError> {
    if let Some(message) = parsed.error {
        return Err(ProviderError::Api {
            provider: "ollama",
            status: StatusCode::OK.as_u16(),
            message,
        });
    }
    let mut result = GenerationResult::success(&request.model, parsed.response);
    result.done = parsed.done;
    Ok(result)
}

fn create_request_body(request: &GenerationRequest, stream: bool) -> OllamaGenerateRequest<'_> {
    let options = &request.options;

    let sampling = if options.has_sampling_params() {
        Some(OllamaOptions {
            num_predict: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
        })
    } else {
        None
    };

    OllamaGenerateRequest {
        model: &request.model,
        prompt: &request.prompt,
        stream,
        format: Some(options.format.as_str()).filter(|f| !f.is_empty()),
        images: options.images.iter().map(|i| i.data.as_str()).collect(),
        think: options.enable_thinking,
        options: sampling,
    }
}

/// Text fragments from an NDJSON `/api/generate` body, up to the `done` frame.
///
/// A body that ends without a `done` frame was cut off and counts as an error.
fn ndjson_chunks<R>(reader: R) -> impl Iterator<Item = Result<String, ProviderError>> + Send
where
    R: BufRead + Send + 'static,
{
    let mut lines = body_lines(reader);
    let mut finished = false;
    std::iter::from_fn(move || {
        if finished {
            return None;
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                finished = true;
                return Some(Err(e));
            }
            None => {
                finished = true;
                return Some(Err(ProviderError::Decode(
                    "stream ended before done".to_string(),
                )));
            }
        };
        match serde_json::from_str::<OllamaGenerateResponse>(&line) {
            Ok(chunk) => {
                if let Some(message) = chunk.error {
                    finished = true;
                    return Some(Err(ProviderError::Api {
                        provider: "ollama",
                        status: StatusCode::OK.as_u16(),
                        message,
                    }));
                }
                finished = chunk.done;
                Some(Ok(chunk.response))
            }
            Err(e) => {
                finished = true;
                Some(Err(e.into()))
            }
        }
    })
}

// Ollama API request/response structures
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}
