//! Embedding provider clients.

pub mod ollama;

pub use ollama::OllamaEmbedder;
