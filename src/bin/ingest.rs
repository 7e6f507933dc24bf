use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use handbookqa::{read_source_dir, write_chunks, Chunker, ChunkerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "handbookqa-ingest",
    about = "Split handbook text files into chunk records for embedding"
)]
struct IngestCli {
    /// Directory containing the handbook .txt files
    #[arg(long, env = "HANDBOOKQA_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Output JSONL containing chunk records
    #[arg(long, env = "HANDBOOKQA_CHUNKS", default_value = "index/chunks.jsonl")]
    chunks: PathBuf,

    /// Maximum characters per chunk
    #[arg(long, env = "HANDBOOKQA_MAX_CHARS", default_value_t = 3000)]
    max_chars: usize,

    /// Characters of tail overlap repeated between adjacent chunks
    #[arg(long, env = "HANDBOOKQA_OVERLAP_CHARS", default_value_t = 0)]
    overlap_chars: usize,
}

fn main() -> Result<()> {
    let cli = IngestCli::parse();
    let documents = read_source_dir(&cli.data_dir)?;
    let chunker = Chunker::new(ChunkerConfig {
        max_chars: cli.max_chars,
        overlap_chars: cli.overlap_chars,
    });

    let mut chunks = Vec::new();
    for doc in &documents {
        match chunker.chunk_document(doc) {
            Ok(records) => {
                eprintln!("chunked {:?} into {} record(s)", doc.name, records.len());
                chunks.extend(records);
            }
            Err(err) => eprintln!("warning: skipping {:?}: {err}", doc.name),
        }
    }
    anyhow::ensure!(!chunks.is_empty(), "ingest produced no chunks");

    if let Some(parent) = cli.chunks.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
    }
    write_chunks(&cli.chunks, &chunks)?;
    eprintln!("wrote {} chunks to {:?}", chunks.len(), cli.chunks);
    Ok(())
}
