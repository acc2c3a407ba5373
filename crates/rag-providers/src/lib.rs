mod blocking;
mod streaming;
pub mod mock;
pub mod ollama;
#[cfg(feature = "watsonx")]
pub mod watsonx;

pub use blocking::run_blocking;
pub use mock::{MockProvider, MockResponse};
pub use ollama::OllamaProvider;
pub use streaming::{parse_sse_data, TextStream};
#[cfg(feature = "watsonx")]
pub use watsonx::{FoundationModelApi, WatsonxHttp, WatsonxProvider};

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout applied to async completions when the caller gives no hint.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability contract shared by every backend.
///
/// Generation and embedding failures never escape these methods: they come back
/// as degraded values (a failed [`GenerationResult`], an empty embedding, or a
/// stream that ends with one empty chunk). The blocking methods may be called
/// from a multi-thread tokio runtime (they step aside with `block_in_place`);
/// on a current-thread runtime they return a degraded result instead, so async
/// callers should prefer [`LLMProvider::generate_completion_async`].
#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Blocking completion
    fn generate_completion(&self, request: &GenerationRequest) -> GenerationResult;

    /// Same result as [`LLMProvider::generate_completion`] without occupying the
    /// calling task; honours `request.options.timeout`.
    async fn generate_completion_async(&self, request: &GenerationRequest) -> GenerationResult;

    /// Lazily pull text fragments as the backend produces them
    fn stream_completion(&self, request: &GenerationRequest) -> CompletionStream;

    /// Blocking embedding; empty on failure
    fn generate_embedding(&self, model: &str, text: &str) -> EmbeddingResult;

    /// Whether images in [`CompletionOptions`] reach the model
    fn supports_images(&self) -> bool {
        false
    }

    /// Whether a non-empty `format` hint is forwarded
    fn supports_structured_output(&self) -> bool {
        false
    }

    /// Whether `enable_thinking` changes anything
    fn supports_thinking(&self) -> bool {
        false
    }
}

pub type CompletionStream = TextStream;

pub type EmbeddingResult = Vec<f32>;

/// Errors raised inside an adapter. They are converted into degraded results
/// at the [`LLMProvider`] boundary, except during construction.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Failed to read response stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Decode(e.to_string())
    }
}

impl ProviderError {
    pub fn kind(&self) -> GenerationErrorKind {
        match self {
            ProviderError::Timeout(_) => GenerationErrorKind::Timeout,
            ProviderError::Http(e) if e.is_timeout() => GenerationErrorKind::Timeout,
            ProviderError::Unsupported(_) => GenerationErrorKind::Unsupported,
            _ => GenerationErrorKind::Provider,
        }
    }
}

/// Per-call knobs. Anything a backend cannot honour is ignored, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Empty means plain text; anything else is a structured-output hint (e.g. "json")
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Only consulted by the async variant
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CompletionOptions {
    pub fn has_sampling_params(&self) -> bool {
        self.max_tokens.is_some()
            || self.temperature.is_some()
            || self.top_p.is_some()
            || self.top_k.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub options: CompletionOptions,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            options: CompletionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.options.format = format.into();
        self
    }

    pub fn with_images(mut self, images: Vec<ImageContent>) -> Self {
        self.options.images = images;
        self
    }

    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.options.enable_thinking = Some(enabled);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.options.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.options.top_k = Some(top_k);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout.unwrap_or(DEFAULT_ASYNC_TIMEOUT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationErrorKind {
    Provider,
    Timeout,
    Unsupported,
}

/// Outcome of one completion call.
///
/// A failed call has an empty `response`, `done == false` and `error` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub response: String,
    pub model: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<GenerationErrorKind>,
}

impl GenerationResult {
    pub fn success(model: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            model: model.into(),
            done: true,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(model: impl Into<String>, error: &ProviderError) -> Self {
        Self {
            response: String::new(),
            model: model.into(),
            done: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(GenerationErrorKind::Timeout)
    }
}

/// Image content for multimodal prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Media type (e.g., "image/png", "image/jpeg", "image/gif", "image/webp")
    pub media_type: String,
    /// Base64-encoded image data
    pub data: String,
}

impl ImageContent {
    pub fn new(media_type: &str, data: String) -> Self {
        Self {
            media_type: media_type.to_string(),
            data,
        }
    }

    /// Encode raw image bytes, sniffing the media type from the content.
    /// Unrecognised content is labelled as PNG, the format backends expect by default.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let media_type = Self::media_type_from_bytes(bytes).unwrap_or("image/png");
        Self::new(
            media_type,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        )
    }

    /// Detect media type from file extension
    pub fn media_type_from_extension(ext: &str) -> Option<&'static str> {
        match ext.to_lowercase().as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            _ => None,
        }
    }

    /// Detect media type from image data magic bytes (file signature)
    pub fn media_type_from_bytes(bytes: &[u8]) -> Option<&'static str> {
        if bytes.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some("image/png");
        }

        // JPEG: FF D8 FF
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some("image/jpeg");
        }

        // GIF: 47 49 46 38 (GIF8)
        if bytes.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
            return Some("image/gif");
        }

        // WebP: 52 49 46 46 ... 57 45 42 50 (RIFF....WEBP)
        if bytes.starts_with(&[0x52, 0x49, 0x46, 0x46]) && &bytes[8..12] == b"WEBP" {
            return Some("image/webp");
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 12] = [
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    #[test]
    fn test_success_result_serialization_omits_error() {
        let result = GenerationResult::success("qwen3:8b", "Hello");
        let json = serde_json::to_string(&result).unwrap();

        assert!(json.contains(r#""response":"Hello""#));
        assert!(json.contains(r#""done":true"#));
        assert!(
            !json.contains("error"),
            "JSON should not contain error fields for a successful call"
        );
    }

    #[test]
    fn test_failure_result_has_empty_text_and_error() {
        let err = ProviderError::Api {
            provider: "ollama",
            status: 500,
            message: "model crashed".to_string(),
        };
        let result = GenerationResult::failure("qwen3:8b", &err);

        assert!(result.response.is_empty());
        assert!(!result.done);
        assert_eq!(result.model, "qwen3:8b");
        assert!(result.error.as_deref().unwrap().contains("model crashed"));
        assert_eq!(result.error_kind, Some(GenerationErrorKind::Provider));
        assert!(!result.is_timeout());
    }

    #[test]
    fn test_timeout_error_kind() {
        let err = ProviderError::Timeout(Duration::from_secs(5));
        let result = GenerationResult::failure("m", &err);
        assert!(result.is_timeout());
        assert_eq!(
            ProviderError::Unsupported("embeddings").kind(),
            GenerationErrorKind::Unsupported
        );
    }

    #[test]
    fn test_request_builder_sets_options() {
        let request = GenerationRequest::new("m", "p")
            .with_format("json")
            .with_thinking(false)
            .with_max_tokens(256)
            .with_temperature(0.2)
            .with_top_p(0.9)
            .with_top_k(40)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(request.options.format, "json");
        assert_eq!(request.options.enable_thinking, Some(false));
        assert_eq!(request.options.max_tokens, Some(256));
        assert_eq!(request.options.top_k, Some(40));
        assert!(request.options.has_sampling_params());
        assert_eq!(request.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_timeout() {
        let request = GenerationRequest::new("m", "p");
        assert_eq!(request.timeout(), DEFAULT_ASYNC_TIMEOUT);
        assert!(!request.options.has_sampling_params());
    }

    #[test]
    fn test_media_type_from_bytes() {
        assert_eq!(ImageContent::media_type_from_bytes(&PNG_HEADER), Some("image/png"));

        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(ImageContent::media_type_from_bytes(&jpeg), Some("image/jpeg"));

        let webp = *b"RIFF\0\0\0\0WEBP";
        assert_eq!(ImageContent::media_type_from_bytes(&webp), Some("image/webp"));

        assert_eq!(ImageContent::media_type_from_bytes(b"short"), None);
    }

    #[test]
    fn test_image_from_bytes_encodes_base64() {
        let image = ImageContent::from_bytes(&PNG_HEADER);
        assert_eq!(image.media_type, "image/png");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&image.data)
            .unwrap();
        assert_eq!(decoded, PNG_HEADER);
    }

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(ImageContent::media_type_from_extension("JPG"), Some("image/jpeg"));
        assert_eq!(ImageContent::media_type_from_extension("bmp"), None);
    }
}
