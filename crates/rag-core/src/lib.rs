//! Wires the configured LLM backend into the RAG components.
//!
//! [`factory`] is the only place that knows which backend is active; everything
//! it returns talks to the model through [`rag_providers::LLMProvider`].

pub mod components;
pub mod error;
pub mod factory;
pub mod logging;

pub use components::{Agent, Component, IndexingPipeline};
pub use error::BuildError;
