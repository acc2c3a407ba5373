//! IBM watsonx.ai adapter.
//!
//! The foundation-model service is reached through a blocking transport
//! ([`FoundationModelApi`]). The async completion path moves the blocking call
//! onto tokio's blocking pool and bounds the wait with a timeout; the worker is
//! left to finish on its own when the timeout fires. The blocking trait methods
//! run under [`run_blocking`].
//!
//! Images and the `format` hint are not supported by this backend and are
//! dropped with a log line. `enable_thinking` is ignored.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::{Client as BlockingClient, Response as BlockingResponse};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::streaming::{body_lines, parse_sse_data};
use crate::{
    run_blocking, CompletionOptions, CompletionStream, EmbeddingResult, GenerationRequest,
    GenerationResult, LLMProvider, ProviderError, TextStream,
};

pub const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";
const IAM_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";
const API_VERSION: &str = "2023-05-29";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Tokens are refreshed this long before IAM says they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Transport seam
// ─────────────────────────────────────────────────────────────────────────────

/// Blocking access to the foundation-model endpoints.
pub trait FoundationModelApi: Send + Sync {
    /// Full text of one generation.
    fn generate(&self, request: &TextGenRequest) -> Result<String, ProviderError>;

    /// Incremental generation. Transports without a streaming primitive keep
    /// this default and the adapter falls back to [`FoundationModelApi::generate`].
    fn generate_stream(&self, _request: &TextGenRequest) -> Result<TextStream, ProviderError> {
        Err(ProviderError::Unsupported("streaming"))
    }

    fn embed(&self, request: &EmbeddingRequest) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextGenRequest {
    pub model_id: String,
    pub input: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TextGenParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextGenParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoding_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl TextGenParameters {
    /// `None` when the caller set no sampling knob, so the service defaults apply.
    pub fn from_options(options: &CompletionOptions) -> Option<Self> {
        if !options.has_sampling_params() {
            return None;
        }
        // Greedy decoding ignores temperature/top_p/top_k
        let sampling = options.temperature.is_some()
            || options.top_p.is_some()
            || options.top_k.is_some();
        Some(Self {
            decoding_method: sampling.then(|| "sample".to_string()),
            max_new_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRequest {
    pub inputs: Vec<String>,
    pub model_id: String,
    pub project_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP transport
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct IamToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl IamToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// REST transport for `{url}/ml/v1/...`, authenticated with an IAM bearer token.
pub struct WatsonxHttp {
    api_key: String,
    base_url: String,
    client: OnceLock<BlockingClient>,
    token: Mutex<Option<IamToken>>,
}

impl WatsonxHttp {
    pub fn new(api_key: impl Into<String>, url: &str) -> Result<Self, ProviderError> {
        let parsed = Url::parse(url.trim()).map_err(|e| {
            ProviderError::InvalidConfig(format!("invalid watsonx URL '{}': {}", url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::InvalidConfig(format!(
                "watsonx URL must be http(s), got '{}'",
                url
            )));
        }

        Ok(Self {
            api_key: api_key.into(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            client: OnceLock::new(),
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> Result<&BlockingClient, ProviderError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = BlockingClient::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/ml/v1/{}?version={}", self.base_url, path, API_VERSION)
    }

    /// The cached token is plain data, so a panic while it was held cannot
    /// leave it half-written.
    fn token_cache(&self) -> MutexGuard<'_, Option<IamToken>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token_cache();

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Requesting IAM access token");
        let response = self
            .client()?
            .post(IAM_TOKEN_URL)
            .form(&[("grant_type", IAM_GRANT_TYPE), ("apikey", self.api_key.as_str())])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Auth(format!(
                "IAM token request failed with status {}: {}",
                status, error_text
            )));
        }

        let body: IamTokenResponse = response.json()?;
        let expires_at = Utc
            .timestamp_opt(body.expiration, 0)
            .single()
            .unwrap_or_else(Utc::now);
        debug!("IAM access token valid until {}", expires_at);

        let token = IamToken {
            access_token: body.access_token,
            expires_at,
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<BlockingResponse, ProviderError> {
        let token = self.access_token()?;
        let response = self
            .client()?
            .post(self.endpoint(path))
            .bearer_auth(token)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status, error_text));
        }
        Ok(response)
    }
}

impl FoundationModelApi for WatsonxHttp {
    fn generate(&self, request: &TextGenRequest) -> Result<String, ProviderError> {
        let response = self.post_json("text/generation", request)?;
        response.json::<TextGenResponse>()?.into_text()
    }

    fn generate_stream(&self, request: &TextGenRequest) -> Result<TextStream, ProviderError> {
        let response = self.post_json("text/generation_stream", request)?;
        Ok(TextStream::new(sse_chunks(BufReader::new(response))))
    }

    fn embed(&self, request: &EmbeddingRequest) -> Result<Vec<f32>, ProviderError> {
        let response = self.post_json("text/embeddings", request)?;
        let body: EmbeddingResponse = response.json()?;
        body.results
            .into_iter()
            .next()
            .map(|r| r.embedding.into_iter().map(|x| x as f32).collect())
            .ok_or_else(|| ProviderError::Decode("watsonx returned no embeddings".to_string()))
    }
}

fn api_error(status: StatusCode, body: String) -> ProviderError {
    let message = serde_json::from_str::<WatsonxErrorBody>(&body)
        .ok()
        .and_then(|b| b.errors.into_iter().next())
        .map(|e| e.message)
        .unwrap_or(body);
    ProviderError::Api {
        provider: "watsonx",
        status: status.as_u16(),
        message,
    }
}

/// Generated text carried by each `data:` frame of a generation stream.
fn sse_chunks<R>(reader: R) -> impl Iterator<Item = Result<String, ProviderError>> + Send
where
    R: BufRead + Send + 'static,
{
    body_lines(reader).filter_map(|line| {
        let line = match line {
            Ok(line) => line,
            Err(e) => return Some(Err(e)),
        };
        let data = parse_sse_data(&line)?;
        Some(
            serde_json::from_str::<TextGenResponse>(data)
                .map_err(ProviderError::from)
                .and_then(TextGenResponse::into_text),
        )
    })
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    expiration: i64,
}

#[derive(Debug, Deserialize)]
struct TextGenResponse {
    #[serde(default)]
    results: Vec<TextGenResult>,
    #[serde(default)]
    errors: Vec<WatsonxErrorDetail>,
}

impl TextGenResponse {
    fn into_text(self) -> Result<String, ProviderError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(ProviderError::Api {
                provider: "watsonx",
                status: StatusCode::OK.as_u16(),
                message: error.message,
            });
        }
        Ok(self
            .results
            .into_iter()
            .next()
            .map(|r| r.generated_text)
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct TextGenResult {
    #[serde(default)]
    generated_text: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    results: Vec<EmbeddingResultItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResultItem {
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct WatsonxErrorBody {
    #[serde(default)]
    errors: Vec<WatsonxErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct WatsonxErrorDetail {
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WatsonxProvider {
    name: String,
    project_id: String,
    api: Arc<dyn FoundationModelApi>,
}

impl WatsonxProvider {
    /// No network traffic happens here; the IAM token is fetched on first use.
    pub fn new(api_key: &str, project_id: &str, url: &str) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(
                "watsonx API key is empty".to_string(),
            ));
        }
        if project_id.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(
                "watsonx project ID is empty".to_string(),
            ));
        }

        let http = WatsonxHttp::new(api_key, url)?;
        debug!(
            "Initialized watsonx provider for project {} at {}",
            project_id,
            http.base_url()
        );
        Ok(Self::with_api(project_id, Arc::new(http)))
    }

    pub fn with_api(project_id: impl Into<String>, api: Arc<dyn FoundationModelApi>) -> Self {
        Self {
            name: "watsonx".to_string(),
            project_id: project_id.into(),
            api,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn build_request(&self, request: &GenerationRequest) -> TextGenRequest {
        let options = &request.options;
        if !options.images.is_empty() {
            warn!(
                "watsonx does not accept image input; ignoring {} image(s)",
                options.images.len()
            );
        }
        if !options.format.is_empty() {
            debug!("watsonx ignores the '{}' format hint", options.format);
        }

        TextGenRequest {
            model_id: request.model.clone(),
            input: request.prompt.clone(),
            project_id: self.project_id.clone(),
            parameters: TextGenParameters::from_options(options),
        }
    }
}

// Bodies of the trait methods, run on whatever thread the caller arranged.
impl WatsonxProvider {
    fn complete_blocking(&self, request: &GenerationRequest) -> GenerationResult {
        debug!("Processing watsonx completion request: model={}", request.model);

        let body = self.build_request(request);
        match self.api.generate(&body) {
            Ok(text) => GenerationResult::success(&request.model, text),
            Err(e) => {
                error!("Error generating completion: {}", e);
                GenerationResult::failure(&request.model, &e)
            }
        }
    }

    fn stream_blocking(&self, request: &GenerationRequest) -> TextStream {
        debug!("Processing watsonx streaming request: model={}", request.model);

        let body = self.build_request(request);
        match self.api.generate_stream(&body) {
            Ok(stream) => stream,
            Err(ProviderError::Unsupported(_)) => {
                debug!("Streaming unavailable, falling back to a single generation");
                match self.api.generate(&body) {
                    Ok(text) => TextStream::single(text),
                    Err(e) => TextStream::failed(e),
                }
            }
            Err(e) => TextStream::failed(e),
        }
    }

    fn embed_blocking(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            inputs: vec![text.to_string()],
            model_id: model.to_string(),
            project_id: self.project_id.clone(),
        };
        self.api.embed(&request)
    }
}

#[async_trait]
impl LLMProvider for WatsonxProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_completion(&self, request: &GenerationRequest) -> GenerationResult {
        run_blocking(|| self.complete_blocking(request)).unwrap_or_else(|e| {
            error!("Error generating completion: {}", e);
            GenerationResult::failure(&request.model, &e)
        })
    }

    async fn generate_completion_async(&self, request: &GenerationRequest) -> GenerationResult {
        let timeout = request.timeout();
        let provider = self.clone();
        let owned = request.clone();

        let handle = tokio::task::spawn_blocking(move || provider.complete_blocking(&owned));

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                let e = ProviderError::Worker(join_error.to_string());
                error!("Error generating completion: {}", e);
                GenerationResult::failure(&request.model, &e)
            }
            Err(_) => {
                let e = ProviderError::Timeout(timeout);
                error!("watsonx completion timed out after {:?}", timeout);
                GenerationResult::failure(&request.model, &e)
            }
        }
    }

    fn stream_completion(&self, request: &GenerationRequest) -> CompletionStream {
        run_blocking(|| self.stream_blocking(request)).unwrap_or_else(TextStream::failed)
    }

    fn generate_embedding(&self, model: &str, text: &str) -> EmbeddingResult {
        match run_blocking(|| self.embed_blocking(model, text)).and_then(|embedding| embedding) {
            Ok(embedding) => embedding,
            Err(e) => {
                error!("Error generating embedding: {}", e);
                Vec::new()
            }
        }
    }
}
