use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use handbookqa::{
    compose, load_gold, write_results, AnswerConfig, EvalSummary, OllamaEmbedder, ResultRecord,
    SearchIndex,
};

#[derive(Parser, Debug)]
#[command(
    name = "handbookqa-score",
    about = "Score handbook retrieval against a gold question set"
)]
struct ScoreCli {
    /// Gold CSV with qid, question, expected_chunk columns
    #[arg(long, env = "HANDBOOKQA_GOLD", default_value = "tests/gold.csv")]
    gold: PathBuf,

    /// Output CSV for per-question results plus the aggregate row
    #[arg(long, env = "HANDBOOKQA_RESULTS", default_value = "out/results.csv")]
    results: PathBuf,

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
    #[arg(long, env = "HANDBOOKQA_EMBED_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Number of chunks considered per question
    #[arg(long, env = "HANDBOOKQA_TOP_K", default_value_t = 1)]
    top_k: usize,

    /// Best-hit similarity below this yields the insufficient-context answer
    #[arg(long, env = "HANDBOOKQA_MIN_SIMILARITY", default_value_t = 0.68)]
    min_similarity: f32,
}

fn main() -> Result<()> {
    let cli = ScoreCli::parse();
    let gold = load_gold(&cli.gold)?;
    for warning in &gold.warnings {
        eprintln!("warning: {warning}");
    }
    anyhow::ensure!(
        !gold.records.is_empty(),
        "gold file {:?} contains no well-formed records",
        cli.gold
    );

    let index = SearchIndex::load(&cli.chunks, &cli.matrix, &cli.meta)?;
    anyhow::ensure!(
        index.meta().embedding_model == cli.embed_model,
        "index was built with model {:?} but {:?} was requested",
        index.meta().embedding_model,
        cli.embed_model
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

    let mut summary = EvalSummary::default();
    let mut results = Vec::with_capacity(gold.records.len());
    let mut embed_failures = 0usize;
    for record in &gold.records {
        let query = match embedder.embed(&record.question) {
            Ok(vector) => vector,
            Err(err) => {
                eprintln!("warning: skipping {}: embedding failed: {err:#}", record.qid);
                embed_failures += 1;
                continue;
            }
        };
        let hits = index.top_k(&query, cli.top_k)?;
        let outcome = compose(&index, &hits, &answer_config);
        // Hit@1 scores raw retrieval; the similarity floor only gates the
        // rendered answer text.
        let retrieved = hits
            .first()
            .map(|hit| hit.chunk_id.clone())
            .unwrap_or_default();
        let correct = retrieved == record.expected_chunk;
        summary.record(correct);
        results.push(ResultRecord {
            qid: record.qid.clone(),
            question: record.question.clone(),
            retrieved_chunk: retrieved,
            answer: outcome.text().to_string(),
            correct,
        });
    }

    if let Some(parent) = cli.results.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
    }
    write_results(&cli.results, &results, &summary)?;
    eprintln!("wrote {} result rows to {:?}", results.len(), cli.results);

    if summary.total == 0 {
        println!("no gold questions could be scored");
    } else {
        println!(
            "hit@1 = {:.3} ({}/{} correct, {} skipped)",
            summary.accuracy(),
            summary.correct,
            summary.total,
            gold.warnings.len() + embed_failures
        );
    }
    Ok(())
}
