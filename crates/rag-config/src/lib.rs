use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Name of the pipeline entry every table must carry.
pub const DEFAULT_PIPELINE: &str = "default";

pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";
pub const WATSONX_DEFAULT_URL: &str = "https://us-south.ml.cloud.ibm.com";

/// Environment variables consulted by [`Config::apply_env_overrides`].
pub mod env {
    pub const LLM_BACKEND: &str = "LLM_BACKEND";
    pub const OLLAMA_HOST: &str = "OLLAMA_HOST";
    pub const OLLAMA_GENERATION_MODEL: &str = "OLLAMA_GENERATION_MODEL";
    pub const WATSONX_API_KEY: &str = "WATSONX_API_KEY";
    pub const WATSONX_PROJECT_ID: &str = "WATSONX_PROJECT_ID";
    pub const WATSONX_URL: &str = "WATSONX_URL";
    pub const WATSONX_GENERATION_MODEL: &str = "WATSONX_GENERATION_MODEL";
}

const DEFAULT_CONFIG_PATHS: [&str; 3] = ["./rag.toml", "~/.config/rag/config.toml", "~/.rag.toml"];

static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Errors that mean the deployment itself is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Watson X configuration incomplete: {setting} is not set. \
         Please set WATSONX_API_KEY and WATSONX_PROJECT_ID environment variables."
    )]
    MissingSetting { setting: &'static str },

    #[error("LLM backend '{backend}' is not available in this build (enable the `{feature}` feature)")]
    BackendUnavailable {
        backend: LlmBackend,
        feature: &'static str,
    },

    #[error("pipeline configuration table has no 'default' entry")]
    MissingDefaultPipeline,
}

/// Which provider family serves the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Ollama,
    Watsonx,
}

impl LlmBackend {
    /// Only an exact (case-insensitive) "watsonx" selects the cloud backend.
    pub fn from_selector(selector: &str) -> Self {
        if selector.trim().eq_ignore_ascii_case("watsonx") {
            LlmBackend::Watsonx
        } else {
            LlmBackend::Ollama
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmBackend::Ollama => "ollama",
            LlmBackend::Watsonx => "watsonx",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline records keyed by mode name; must contain "default"
    #[serde(default = "default_pipelines")]
    pub pipelines: HashMap<String, PipelineConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend selector string as it appears in the environment
    #[serde(default)]
    pub backend: String,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub watsonx: WatsonxConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub generation_model: String,
    pub enrichment_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: OLLAMA_DEFAULT_HOST.to_string(),
            generation_model: "qwen3:8b".to_string(),
            enrichment_model: "qwen3:0.6b".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatsonxConfig {
    pub api_key: String,
    pub project_id: String,
    pub url: String,
    pub generation_model: String,
    pub enrichment_model: String,
}

impl Default for WatsonxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: String::new(),
            url: WATSONX_DEFAULT_URL.to_string(),
            generation_model: "ibm/granite-13b-chat-v2".to_string(),
            enrichment_model: "ibm/granite-3-2b-instruct".to_string(),
        }
    }
}

impl fmt::Debug for WatsonxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("WatsonxConfig")
            .field("api_key", &api_key)
            .field("project_id", &self.project_id)
            .field("url", &self.url)
            .field("generation_model", &self.generation_model)
            .field("enrichment_model", &self.enrichment_model)
            .finish()
    }
}

/// Vector store location used by the indexing pipeline and the agent's retriever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
    pub text_table_name: String,
    pub image_table_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "lancedb".to_string(),
            text_table_name: "text_pages_default".to_string(),
            image_table_name: "image_pages".to_string(),
        }
    }
}

/// Per-mode pipeline settings.
///
/// Only `storage` and `embedding_model` are interpreted here; every other
/// section (retrieval, reranker, ...) is carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PipelineConfig {
    /// Insert the built-in storage record if none is present.
    /// Returns true when something was injected.
    pub fn ensure_storage(&mut self) -> bool {
        if self.storage.is_some() {
            return false;
        }
        self.storage = Some(StorageConfig::default());
        true
    }
}

fn default_pipelines() -> HashMap<String, PipelineConfig> {
    let mut pipelines = HashMap::new();
    pipelines.insert(
        DEFAULT_PIPELINE.to_string(),
        PipelineConfig {
            storage: Some(StorageConfig::default()),
            ..Default::default()
        },
    );
    pipelines
}

/// Backend record resolved from [`LlmConfig`]; one variant per provider family.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    Ollama(OllamaConfig),
    Watsonx(WatsonxConfig),
}

impl ProviderConfig {
    pub fn backend(&self) -> LlmBackend {
        match self {
            ProviderConfig::Ollama(_) => LlmBackend::Ollama,
            ProviderConfig::Watsonx(_) => LlmBackend::Watsonx,
        }
    }

    /// Fail-fast check run before any adapter is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let ProviderConfig::Watsonx(watsonx) = self {
            if watsonx.api_key.trim().is_empty() {
                return Err(ConfigError::MissingSetting {
                    setting: env::WATSONX_API_KEY,
                });
            }
            if watsonx.project_id.trim().is_empty() {
                return Err(ConfigError::MissingSetting {
                    setting: env::WATSONX_PROJECT_ID,
                });
            }
        }
        Ok(())
    }

    pub fn generation_model(&self) -> &str {
        match self {
            ProviderConfig::Ollama(c) => &c.generation_model,
            ProviderConfig::Watsonx(c) => &c.generation_model,
        }
    }

    pub fn enrichment_model(&self) -> &str {
        match self {
            ProviderConfig::Ollama(c) => &c.enrichment_model,
            ProviderConfig::Watsonx(c) => &c.enrichment_model,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            pipelines: default_pipelines(),
        }
    }
}

impl Config {
    /// Load configuration from `config_path`, or from the first default location
    /// that exists, falling back to built-in defaults. Environment overrides are
    /// applied last.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], with overrides taken from `lookup` instead of the
    /// process environment.
    pub fn load_with<F>(config_path: Option<&str>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path_to_load = match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    anyhow::bail!("Configuration file '{}' does not exist", path);
                }
                Some(path.to_string())
            }
            None => DEFAULT_CONFIG_PATHS.iter().find_map(|path| {
                let expanded_path = shellexpand::tilde(path);
                if Path::new(expanded_path.as_ref()).exists() {
                    Some(expanded_path.to_string())
                } else {
                    None
                }
            }),
        };

        let mut config = match path_to_load {
            Some(path) => {
                debug!("Loading configuration from {}", path);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read configuration file '{}'", path))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse configuration file '{}'", path))?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Defaults plus environment overrides; never fails.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup (the process environment in
    /// production, a map in tests). Unset keys leave the current value alone.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(env::LLM_BACKEND) {
            self.llm.backend = backend;
        }
        if let Some(host) = lookup(env::OLLAMA_HOST) {
            self.llm.ollama.host = host;
        }
        if let Some(model) = lookup(env::OLLAMA_GENERATION_MODEL) {
            self.llm.ollama.generation_model = model;
        }
        if let Some(api_key) = lookup(env::WATSONX_API_KEY) {
            self.llm.watsonx.api_key = api_key;
        }
        if let Some(project_id) = lookup(env::WATSONX_PROJECT_ID) {
            self.llm.watsonx.project_id = project_id;
        }
        if let Some(url) = lookup(env::WATSONX_URL).filter(|u| !u.trim().is_empty()) {
            self.llm.watsonx.url = url;
        }
        if let Some(model) = lookup(env::WATSONX_GENERATION_MODEL) {
            self.llm.watsonx.generation_model = model;
        }
    }

    /// Startup-time invariants. Credential checks happen at composition time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.pipelines.contains_key(DEFAULT_PIPELINE) {
            return Err(ConfigError::MissingDefaultPipeline);
        }
        Ok(())
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn backend(&self) -> LlmBackend {
        LlmBackend::from_selector(&self.llm.backend)
    }

    /// Resolve the backend selector into its configuration record.
    pub fn provider_config(&self) -> ProviderConfig {
        match self.backend() {
            LlmBackend::Ollama => ProviderConfig::Ollama(self.llm.ollama.clone()),
            LlmBackend::Watsonx => ProviderConfig::Watsonx(self.llm.watsonx.clone()),
        }
    }

    /// Pipeline record for `mode`, or the "default" record if `mode` is unknown.
    pub fn pipeline_for(&self, mode: &str) -> Option<&PipelineConfig> {
        self.pipelines
            .get(mode)
            .or_else(|| self.pipelines.get(DEFAULT_PIPELINE))
    }

    /// Publish `config` as the process-wide configuration.
    /// Returns the rejected config if one was already installed.
    pub fn init_global(config: Config) -> std::result::Result<(), Config> {
        GLOBAL_CONFIG.set(config)
    }

    /// Process-wide configuration; built from the environment on first use
    /// when nothing was installed with [`Config::init_global`].
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::from_env)
    }
}
