use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use handbookqa::{
    corpus_checksum, load_chunks, EmbeddingMatrix, IndexMeta, OllamaEmbedder,
};

#[derive(Parser, Debug)]
#[command(
    name = "handbookqa-indexer",
    about = "Embed chunk records into a dense matrix plus row metadata"
)]
struct IndexerCli {
    /// Chunk JSONL produced by handbookqa-ingest
    #[arg(long, env = "HANDBOOKQA_CHUNKS", default_value = "index/chunks.jsonl")]
    chunks: PathBuf,

    /// Output path for the binary embedding matrix
    #[arg(long, env = "HANDBOOKQA_MATRIX", default_value = "index/embeddings.bin")]
    matrix: PathBuf,

    /// Output path for the index metadata JSON
    #[arg(long, env = "HANDBOOKQA_META", default_value = "index/meta.json")]
    meta: PathBuf,

    /// Base URL for the Ollama-compatible embeddings API
    #[arg(
        long,
        env = "HANDBOOKQA_OLLAMA_BASE",
        default_value = "http://localhost:11434"
    )]
    ollama_base_url: String,

    /// Embedding model identifier
    #[arg(
        long,
        env = "HANDBOOKQA_EMBED_MODEL",
        default_value = "mxbai-embed-large"
    )]
    embed_model: String,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "HANDBOOKQA_EMBED_TIMEOUT_SECS", default_value_t = 60)]
    embed_timeout_secs: u64,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "HANDBOOKQA_EMBED_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,
}

fn main() -> Result<()> {
    let cli = IndexerCli::parse();
    let chunks = load_chunks(&cli.chunks)?;
    anyhow::ensure!(
        !chunks.is_empty(),
        "chunk file {:?} contains no records; run handbookqa-ingest first",
        cli.chunks
    );
    eprintln!("loaded {} chunks from {:?}", chunks.len(), cli.chunks);

    let embedder = OllamaEmbedder::new(
        cli.ollama_base_url,
        cli.embed_model,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.max_retries.max(1),
    )?;

    // The whole matrix is assembled in memory before anything touches disk,
    // so an embedding failure never leaves a partial index behind.
    let mut rows = Vec::with_capacity(chunks.len());
    let mut dimension = 0usize;
    for (idx, chunk) in chunks.iter().enumerate() {
        eprintln!("embedding chunk {}/{} ({})", idx + 1, chunks.len(), chunk.chunk_id);
        let vector = embedder
            .embed(&chunk.text)
            .with_context(|| format!("failed to embed chunk {}", chunk.chunk_id))?;
        if idx == 0 {
            dimension = vector.len();
        }
        anyhow::ensure!(
            vector.len() == dimension,
            "chunk {} embedded to dimension {} but expected {}",
            chunk.chunk_id,
            vector.len(),
            dimension
        );
        rows.push(vector);
    }

    let matrix = EmbeddingMatrix::from_rows(rows)?;
    let meta = IndexMeta {
        embedding_model: embedder.model().to_string(),
        dimension: matrix.dims(),
        rows: matrix.rows(),
        row_ids: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
        corpus_checksum: corpus_checksum(&chunks),
    };

    matrix.save(&cli.matrix)?;
    meta.save(&cli.meta)?;
    eprintln!(
        "wrote {}x{} matrix to {:?} and metadata to {:?}",
        matrix.rows(),
        matrix.dims(),
        cli.matrix,
        cli.meta
    );
    Ok(())
}
