//! The two things the composition root can build.
//!
//! Both hold the same triple: the resolved pipeline settings, the backend
//! adapter, and the backend record it was built from. Retrieval and storage
//! live elsewhere; these types only own the model-facing side.

use rag_config::{LlmBackend, PipelineConfig, ProviderConfig};
use rag_providers::{
    CompletionOptions, CompletionStream, EmbeddingResult, GenerationRequest, GenerationResult,
    LLMProvider,
};
use std::fmt;
use tracing::{debug, warn};

/// A component the factory knows how to assemble.
pub trait Component: Sized {
    fn assemble(
        pipeline_config: PipelineConfig,
        provider: Box<dyn LLMProvider>,
        provider_config: ProviderConfig,
    ) -> Self;
}

/// Question answering over the configured generation model.
pub struct Agent {
    pipeline_config: PipelineConfig,
    provider: Box<dyn LLMProvider>,
    provider_config: ProviderConfig,
}

impl Agent {
    pub fn new(
        pipeline_config: PipelineConfig,
        provider: Box<dyn LLMProvider>,
        provider_config: ProviderConfig,
    ) -> Self {
        Self {
            pipeline_config,
            provider,
            provider_config,
        }
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.pipeline_config
    }

    pub fn provider(&self) -> &dyn LLMProvider {
        self.provider.as_ref()
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider_config
    }

    pub fn backend(&self) -> LlmBackend {
        self.provider_config.backend()
    }

    fn request(&self, prompt: &str, options: CompletionOptions) -> GenerationRequest {
        GenerationRequest::new(self.provider_config.generation_model(), prompt).with_options(options)
    }

    pub fn answer(&self, prompt: &str) -> GenerationResult {
        self.answer_with(prompt, CompletionOptions::default())
    }

    pub fn answer_with(&self, prompt: &str, options: CompletionOptions) -> GenerationResult {
        self.provider.generate_completion(&self.request(prompt, options))
    }

    pub async fn answer_async(&self, prompt: &str) -> GenerationResult {
        self.provider
            .generate_completion_async(&self.request(prompt, CompletionOptions::default()))
            .await
    }

    pub fn stream_answer(&self, prompt: &str) -> CompletionStream {
        self.provider
            .stream_completion(&self.request(prompt, CompletionOptions::default()))
    }
}

impl Component for Agent {
    fn assemble(
        pipeline_config: PipelineConfig,
        provider: Box<dyn LLMProvider>,
        provider_config: ProviderConfig,
    ) -> Self {
        Self::new(pipeline_config, provider, provider_config)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("provider_config", &self.provider_config)
            .field("pipeline_config", &self.pipeline_config)
            .finish()
    }
}

/// Turns document chunks into embeddings and enrichment text.
pub struct IndexingPipeline {
    pipeline_config: PipelineConfig,
    provider: Box<dyn LLMProvider>,
    provider_config: ProviderConfig,
}

impl IndexingPipeline {
    pub fn new(
        pipeline_config: PipelineConfig,
        provider: Box<dyn LLMProvider>,
        provider_config: ProviderConfig,
    ) -> Self {
        Self {
            pipeline_config,
            provider,
            provider_config,
        }
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.pipeline_config
    }

    pub fn provider(&self) -> &dyn LLMProvider {
        self.provider.as_ref()
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider_config
    }

    pub fn backend(&self) -> LlmBackend {
        self.provider_config.backend()
    }

    /// The pipeline's own embedding model, else the backend's enrichment model.
    pub fn embedding_model(&self) -> &str {
        self.pipeline_config
            .embedding_model
            .as_deref()
            .unwrap_or_else(|| self.provider_config.enrichment_model())
    }

    /// One embedding per chunk, in order. A chunk that fails to embed gets an
    /// empty vector and the rest are still processed.
    pub fn embed_chunks(&self, chunks: &[String]) -> Vec<EmbeddingResult> {
        let model = self.embedding_model();
        debug!("Embedding {} chunk(s) with {}", chunks.len(), model);

        let embeddings: Vec<EmbeddingResult> = chunks
            .iter()
            .map(|chunk| self.provider.generate_embedding(model, chunk))
            .collect();

        let failed = embeddings.iter().filter(|e| e.is_empty()).count();
        if failed > 0 {
            warn!("{} of {} chunk(s) produced no embedding", failed, chunks.len());
        }
        embeddings
    }

    /// Run a prompt through the backend's enrichment model.
    pub fn enrich(&self, prompt: &str) -> GenerationResult {
        let request = GenerationRequest::new(self.provider_config.enrichment_model(), prompt);
        self.provider.generate_completion(&request)
    }
}

impl Component for IndexingPipeline {
    fn assemble(
        pipeline_config: PipelineConfig,
        provider: Box<dyn LLMProvider>,
        provider_config: ProviderConfig,
    ) -> Self {
        Self::new(pipeline_config, provider, provider_config)
    }
}

impl fmt::Debug for IndexingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexingPipeline")
            .field("provider", &self.provider.name())
            .field("provider_config", &self.provider_config)
            .field("pipeline_config", &self.pipeline_config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_config::OllamaConfig;
    use rag_providers::{MockProvider, MockResponse};

    fn ollama_config() -> ProviderConfig {
        ProviderConfig::Ollama(OllamaConfig::default())
    }

    #[test]
    fn test_agent_uses_generation_model() {
        let mock = MockProvider::new().with_default_response(MockResponse::text("42"));
        let agent = Agent::new(PipelineConfig::default(), Box::new(mock.clone()), ollama_config());

        let result = agent.answer("What is the answer?");

        assert_eq!(result.response, "42");
        let requests = mock.get_requests();
        assert_eq!(requests[0].model, "qwen3:8b");
        assert_eq!(requests[0].prompt, "What is the answer?");
    }

    #[test]
    fn test_agent_answer_with_options_passes_them_through() {
        let mock = MockProvider::new();
        let agent = Agent::new(PipelineConfig::default(), Box::new(mock.clone()), ollama_config());

        let options = CompletionOptions {
            format: "json".to_string(),
            max_tokens: Some(16),
            ..Default::default()
        };
        agent.answer_with("q", options.clone());

        assert_eq!(mock.get_requests()[0].options, options);
    }

    #[test]
    fn test_agent_stream_answer() {
        let mock = MockProvider::new().with_response(MockResponse::streaming(vec!["a", "b"]));
        let agent = Agent::new(PipelineConfig::default(), Box::new(mock), ollama_config());

        assert_eq!(agent.stream_answer("q").collect_text(), "ab");
    }

    #[test]
    fn test_embedding_model_prefers_pipeline_setting() {
        let pipeline = PipelineConfig {
            embedding_model: Some("nomic-embed-text".to_string()),
            ..Default::default()
        };
        let indexing = IndexingPipeline::new(pipeline, Box::new(MockProvider::new()), ollama_config());
        assert_eq!(indexing.embedding_model(), "nomic-embed-text");

        let fallback =
            IndexingPipeline::new(PipelineConfig::default(), Box::new(MockProvider::new()), ollama_config());
        assert_eq!(fallback.embedding_model(), "qwen3:0.6b");
    }

    #[test]
    fn test_embed_chunks_keeps_going_after_failure() {
        let mock = MockProvider::new()
            .with_embedding(vec![1.0, 0.0])
            .with_embedding(Vec::new())
            .with_embedding(vec![0.0, 1.0]);
        let indexing =
            IndexingPipeline::new(PipelineConfig::default(), Box::new(mock.clone()), ollama_config());

        let chunks = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let embeddings = indexing.embed_chunks(&chunks);

        assert_eq!(embeddings, vec![vec![1.0, 0.0], Vec::new(), vec![0.0, 1.0]]);
        assert_eq!(mock.get_embedding_requests().len(), 3);
    }

    #[test]
    fn test_enrich_uses_enrichment_model() {
        let mock = MockProvider::new().with_default_response(MockResponse::text("summary"));
        let indexing =
            IndexingPipeline::new(PipelineConfig::default(), Box::new(mock.clone()), ollama_config());

        assert_eq!(indexing.enrich("Summarise this chunk").response, "summary");
        assert_eq!(mock.get_requests()[0].model, "qwen3:0.6b");
    }
}
