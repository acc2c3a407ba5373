use rag_config::{ConfigError, LlmBackend};
use rag_providers::ProviderError;

/// Why a component could not be composed.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to construct the {backend} client: {source}")]
    Client {
        backend: LlmBackend,
        source: ProviderError,
    },
}

impl BuildError {
    /// True when the deployment is misconfigured (as opposed to the client
    /// rejecting otherwise well-formed settings).
    pub fn is_config(&self) -> bool {
        matches!(self, BuildError::Config(_))
    }
}
