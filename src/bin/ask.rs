use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use handbookqa::{compose, AnswerConfig, OllamaEmbedder, SearchIndex};

#[derive(Parser, Debug)]
#[command(
    name = "handbookqa-ask",
    about = "Interactive question prompt over the handbook index"
)]
struct AskCli {
    /// Chunk JSONL produced by handbookqa-ingest
    #[arg(long, env = "HANDBOOKQA_CHUNKS", default_value = "index/chunks.jsonl")]
    chunks: PathBuf,

    /// Binary embedding matrix produced by handbookqa-indexer
    #[arg(long, env = "HANDBOOKQA_MATRIX", default_value = "index/embeddings.bin")]
    matrix: PathBuf,

    /// Index metadata JSON produced by handbookqa-indexer
    #[arg(long, env = "HANDBOOKQA_META", default_value = "index/meta.json")]
    meta: PathBuf,

    /// Base URL for the Ollama-compatible embeddings API
    #[arg(
        long,
        env = "HANDBOOKQA_OLLAMA_BASE",
        default_value = "http://localhost:11434"
    )]
    ollama_base_url: String,

    /// Embedding model identifier (must match the index)
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
    #[arg(long, env = "HANDBOOKQA_EMBED_MAX_RETRIES", default_value_t = 3)]
    max_retries: usize,

    /// Number of chunks considered per question
    #[arg(long, env = "HANDBOOKQA_TOP_K", default_value_t = 1)]
    top_k: usize,

    /// Best-hit similarity below this prints the insufficient-context line
    #[arg(long, env = "HANDBOOKQA_MIN_SIMILARITY", default_value_t = 0.68)]
    min_similarity: f32,
}

fn main() -> Result<()> {
    let cli = AskCli::parse();
    let index = SearchIndex::load(&cli.chunks, &cli.matrix, &cli.meta)?;
    anyhow::ensure!(
        index.meta().embedding_model == cli.embed_model,
        "index was built with model {:?} but {:?} was requested; re-run the indexer or pass --embed-model {:?}",
        index.meta().embedding_model,
        cli.embed_model,
        index.meta().embedding_model
    );
    let embedder = OllamaEmbedder::new(
        cli.ollama_base_url,
        cli.embed_model,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.max_retries.max(1),
    )?;
    let answer_config = AnswerConfig {
        min_similarity: cli.min_similarity,
    };

    println!("Handbook QA ({} chunks indexed)", index.len());
    println!("Type a question, or /exit to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            println!("Please enter a question.");
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "/exit" | "/quit") {
            break;
        }

        let query = match embedder.embed(question) {
            Ok(vector) => vector,
            Err(err) => {
                eprintln!("warning: embedding failed for this question: {err:#}");
                continue;
            }
        };
        // A wrong dimension means the provider configuration drifted from the
        // index; similarity scores would be meaningless, so stop here.
        let hits = index.top_k(&query, cli.top_k)?;
        println!("{}\n", compose(&index, &hits, &answer_config).text());
    }
    Ok(())
}
