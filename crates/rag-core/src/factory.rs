//! Composition root for agents and indexing pipelines.
//!
//! Every call resolves the backend from configuration, validates it, builds a
//! fresh adapter and hands it to the component along with a private copy of
//! the mode's pipeline settings. The shared configuration is never mutated.

use rag_config::{Config, ConfigError, LlmBackend, PipelineConfig, ProviderConfig, WatsonxConfig};
use rag_providers::{LLMProvider, OllamaProvider};
use tracing::debug;

use crate::components::{Agent, Component, IndexingPipeline};
use crate::error::BuildError;

/// Which component to build when the choice is made at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Agent,
    IndexingPipeline,
}

#[derive(Debug)]
pub enum Target {
    Agent(Agent),
    IndexingPipeline(IndexingPipeline),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Agent(_) => TargetKind::Agent,
            Target::IndexingPipeline(_) => TargetKind::IndexingPipeline,
        }
    }

    pub fn provider(&self) -> &dyn LLMProvider {
        match self {
            Target::Agent(agent) => agent.provider(),
            Target::IndexingPipeline(pipeline) => pipeline.provider(),
        }
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        match self {
            Target::Agent(agent) => agent.pipeline_config(),
            Target::IndexingPipeline(pipeline) => pipeline.pipeline_config(),
        }
    }

    pub fn into_agent(self) -> Option<Agent> {
        match self {
            Target::Agent(agent) => Some(agent),
            Target::IndexingPipeline(_) => None,
        }
    }

    pub fn into_indexing_pipeline(self) -> Option<IndexingPipeline> {
        match self {
            Target::IndexingPipeline(pipeline) => Some(pipeline),
            Target::Agent(_) => None,
        }
    }
}

/// Build `C` for `mode` against `config`.
///
/// Credentials are checked before any adapter exists, so a misconfigured cloud
/// backend fails here instead of on the first request.
pub fn build<C: Component>(config: &Config, mode: &str) -> Result<C, BuildError> {
    let provider_config = config.provider_config();
    debug!("Composing for mode '{}' with backend {}", mode, provider_config.backend());

    provider_config.validate()?;
    let provider = create_provider(&provider_config)?;
    let pipeline_config = resolve_pipeline(config, mode)?;

    Ok(C::assemble(pipeline_config, provider, provider_config))
}

pub fn build_target(config: &Config, mode: &str, kind: TargetKind) -> Result<Target, BuildError> {
    match kind {
        TargetKind::Agent => build::<Agent>(config, mode).map(Target::Agent),
        TargetKind::IndexingPipeline => {
            build::<IndexingPipeline>(config, mode).map(Target::IndexingPipeline)
        }
    }
}

/// Agent for `mode` using the process-wide configuration.
pub fn get_agent(mode: &str) -> Result<Agent, BuildError> {
    build(Config::global(), mode)
}

/// Indexing pipeline for `mode` using the process-wide configuration.
pub fn get_indexing_pipeline(mode: &str) -> Result<IndexingPipeline, BuildError> {
    build(Config::global(), mode)
}

/// Copy of the pipeline record for `mode` (or "default"), with the built-in
/// storage record filled in when it has none.
pub fn resolve_pipeline(config: &Config, mode: &str) -> Result<PipelineConfig, ConfigError> {
    let mut pipeline = config
        .pipeline_for(mode)
        .cloned()
        .ok_or(ConfigError::MissingDefaultPipeline)?;

    if pipeline.ensure_storage() {
        debug!("No storage configured for mode '{}', using the built-in default", mode);
    }
    Ok(pipeline)
}

/// Construct the adapter for an already validated backend record.
pub fn create_provider(provider_config: &ProviderConfig) -> Result<Box<dyn LLMProvider>, BuildError> {
    match provider_config {
        ProviderConfig::Ollama(ollama) => {
            let provider = OllamaProvider::new(ollama.host.as_str()).map_err(|source| {
                BuildError::Client {
                    backend: LlmBackend::Ollama,
                    source,
                }
            })?;
            Ok(Box::new(provider))
        }
        ProviderConfig::Watsonx(watsonx) => create_watsonx_provider(watsonx),
    }
}

#[cfg(feature = "watsonx")]
fn create_watsonx_provider(config: &WatsonxConfig) -> Result<Box<dyn LLMProvider>, BuildError> {
    let provider =
        rag_providers::WatsonxProvider::new(&config.api_key, &config.project_id, &config.url)
            .map_err(|source| BuildError::Client {
                backend: LlmBackend::Watsonx,
                source,
            })?;
    Ok(Box::new(provider))
}

#[cfg(not(feature = "watsonx"))]
fn create_watsonx_provider(_config: &WatsonxConfig) -> Result<Box<dyn LLMProvider>, BuildError> {
    Err(ConfigError::BackendUnavailable {
        backend: LlmBackend::Watsonx,
        feature: "watsonx",
    }
    .into())
}
