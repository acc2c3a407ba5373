//! Facade over the workspace crates.
//!
//! Most callers only need [`get_agent`] / [`get_indexing_pipeline`] and the
//! [`LLMProvider`] trait; the member crates are re-exported for everything else.

pub use rag_config as config;
pub use rag_core::{factory, logging};
pub use rag_providers as providers;

pub use rag_config::{
    Config, ConfigError, LlmBackend, PipelineConfig, ProviderConfig, StorageConfig,
};
pub use rag_core::factory::{
    build, build_target, get_agent, get_indexing_pipeline, Target, TargetKind,
};
pub use rag_core::{Agent, BuildError, Component, IndexingPipeline};
pub use rag_providers::{
    CompletionOptions, CompletionStream, EmbeddingResult, GenerationRequest, GenerationResult,
    LLMProvider,
};
