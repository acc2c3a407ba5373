//! `get_agent` / `get_indexing_pipeline` read the process-wide configuration,
//! which is built from the environment on first use. Each test sets the same
//! variables before touching it, so whichever runs first initialises it the
//! same way.

use rag_config::{env, LlmBackend, StorageConfig};
use rag_core::factory::{get_agent, get_indexing_pipeline};
use serial_test::serial;

fn set_ollama_env() {
    std::env::set_var(env::LLM_BACKEND, "ollama");
    std::env::set_var(env::OLLAMA_HOST, "http://127.0.0.1:1");
    std::env::set_var(env::OLLAMA_GENERATION_MODEL, "qwen3:14b");
}

#[test]
#[serial]
fn test_get_agent_uses_environment_backend() {
    set_ollama_env();

    let agent = get_agent("research").unwrap();

    assert_eq!(agent.backend(), LlmBackend::Ollama);
    assert_eq!(agent.provider().name(), "ollama");
    assert_eq!(agent.provider_config().generation_model(), "qwen3:14b");
    assert_eq!(agent.pipeline_config().storage, Some(StorageConfig::default()));
}

#[test]
#[serial]
fn test_get_indexing_pipeline_uses_environment_backend() {
    set_ollama_env();

    let indexing = get_indexing_pipeline("default").unwrap();

    assert_eq!(indexing.backend(), LlmBackend::Ollama);
    assert_eq!(indexing.embedding_model(), "qwen3:0.6b");
    assert!(indexing.pipeline_config().storage.is_some());
}
