#![warn(missing_docs)]
//! Core library entry points for the handbookqa retrieval pipeline.
//!
//! The pipeline is four batch stages sharing this library: ingest raw
//! handbook text into chunk records, embed the chunks into a dense matrix,
//! answer questions interactively against that matrix, and score the same
//! retrieval path against a gold question set.

pub mod answer;
pub mod chunker;
pub mod embedder;
pub mod eval;
pub mod index;

pub use answer::{compose, Answer, AnswerConfig, AnswerOutcome, INSUFFICIENT_CONTEXT};
pub use chunker::{
    load_chunks, read_source_dir, write_chunks, ChunkError, ChunkRecord, Chunker, ChunkerConfig,
    SourceDocument,
};
pub use embedder::OllamaEmbedder;
pub use eval::{load_gold, write_results, EvalSummary, GoldRecord, GoldSet, ResultRecord};
pub use index::{
    corpus_checksum, cosine_similarity, EmbeddingMatrix, IndexMeta, Retrieval, SearchIndex,
};
