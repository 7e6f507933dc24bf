use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use handbookqa::chunker::text_checksum;
use handbookqa::{corpus_checksum, ChunkRecord, EmbeddingMatrix, IndexMeta};

fn fixture_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/data"))
}

/// Writes a one-chunk index to `dir` and returns the three file paths.
fn write_index(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let text = "Dorm curfew is 11pm on weekdays.";
    let chunk = ChunkRecord {
        chunk_id: "handbook:0".to_string(),
        source: "handbook.txt".to_string(),
        section_title: "Residence Life".to_string(),
        seq: 0,
        char_start: 0,
        text: text.to_string(),
        checksum: text_checksum(text),
    };
    let chunks_path = dir.join("chunks.jsonl");
    handbookqa::write_chunks(&chunks_path, std::slice::from_ref(&chunk)).expect("write chunks");

    let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0]]).expect("matrix");
    let matrix_path = dir.join("embeddings.bin");
    matrix.save(&matrix_path).expect("save matrix");

    let meta = IndexMeta {
        embedding_model: "mxbai-embed-large".to_string(),
        dimension: 2,
        rows: 1,
        row_ids: vec!["handbook:0".to_string()],
        corpus_checksum: corpus_checksum(std::slice::from_ref(&chunk)),
    };
    let meta_path = dir.join("meta.json");
    meta.save(&meta_path).expect("save meta");
    (chunks_path, matrix_path, meta_path)
}

#[test]
fn ingest_writes_chunk_records() {
    let out = tempfile::tempdir().expect("tempdir");
    let chunks_path = out.path().join("chunks.jsonl");

    let output = Command::new(env!("CARGO_BIN_EXE_ingest"))
        .arg("--data-dir")
        .arg(fixture_dir())
        .arg("--chunks")
        .arg(&chunks_path)
        .output()
        .expect("run ingest");
    assert!(
        output.status.success(),
        "ingest exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let contents = std::fs::read_to_string(&chunks_path).expect("read chunks");
    let records: Vec<ChunkRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid chunk record"))
        .collect();

    assert!(!records.is_empty());
    assert!(records
        .iter()
        .any(|r| r.source == "visitation_policy.txt" && r.section_title == "Guest Hours"));
    assert!(records
        .iter()
        .any(|r| r.text.contains("Students must wear ID badges")));
    for record in &records {
        assert!(!record.text.trim().is_empty());
        let stem = record.source.trim_end_matches(".txt");
        assert_eq!(record.chunk_id, format!("{}:{}", stem, record.seq));
    }
}

#[test]
fn ingest_is_deterministic_across_runs() {
    let out = tempfile::tempdir().expect("tempdir");
    let first = out.path().join("first.jsonl");
    let second = out.path().join("second.jsonl");

    for path in [&first, &second] {
        let status = Command::new(env!("CARGO_BIN_EXE_ingest"))
            .arg("--data-dir")
            .arg(fixture_dir())
            .arg("--chunks")
            .arg(path)
            .stderr(Stdio::null())
            .status()
            .expect("run ingest");
        assert!(status.success());
    }

    let a = std::fs::read(&first).expect("read first");
    let b = std::fs::read(&second).expect("read second");
    assert_eq!(a, b);
}

#[test]
fn ingest_fails_on_missing_directory() {
    let output = Command::new(env!("CARGO_BIN_EXE_ingest"))
        .arg("--data-dir")
        .arg("/nonexistent/handbook/data")
        .arg("--chunks")
        .arg("/tmp/unused-chunks.jsonl")
        .output()
        .expect("run ingest");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "stderr: {stderr}");
}

#[test]
fn ask_rejects_empty_questions_and_continues() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (chunks, matrix, meta) = write_index(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_ask"))
        .arg("--chunks")
        .arg(&chunks)
        .arg("--matrix")
        .arg(&matrix)
        .arg("--meta")
        .arg(&meta)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn ask");
    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(b"\n   \n/exit\n")
        .expect("write stdin");

    let output = child.wait_with_output().expect("read ask output");
    assert!(
        output.status.success(),
        "ask exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    // Both blank lines are rejected without touching the embedder, and the
    // loop keeps running until /exit.
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("Please enter a question.").count(), 2);
}

#[test]
fn ask_rejects_model_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (chunks, matrix, meta) = write_index(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_ask"))
        .arg("--chunks")
        .arg(&chunks)
        .arg("--matrix")
        .arg(&matrix)
        .arg("--meta")
        .arg(&meta)
        .arg("--embed-model")
        .arg("nomic-embed-text")
        .stdin(Stdio::null())
        .output()
        .expect("run ask");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("built with model"), "stderr: {stderr}");
}

#[test]
fn score_rejects_model_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (chunks, matrix, meta) = write_index(dir.path());
    let gold = dir.path().join("gold.csv");
    std::fs::write(
        &gold,
        "qid,question,expected_chunk\nq1,What time is curfew?,handbook:0\n",
    )
    .expect("write gold");

    let output = Command::new(env!("CARGO_BIN_EXE_score"))
        .arg("--gold")
        .arg(&gold)
        .arg("--results")
        .arg(dir.path().join("results.csv"))
        .arg("--chunks")
        .arg(&chunks)
        .arg("--matrix")
        .arg(&matrix)
        .arg("--meta")
        .arg(&meta)
        .arg("--embed-model")
        .arg("nomic-embed-text")
        .output()
        .expect("run score");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("built with model"), "stderr: {stderr}");
}

#[test]
fn ask_fails_without_an_index() {
    let missing = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_ask"))
        .arg("--chunks")
        .arg(missing.path().join("chunks.jsonl"))
        .arg("--matrix")
        .arg(missing.path().join("embeddings.bin"))
        .arg("--meta")
        .arg(missing.path().join("meta.json"))
        .stdin(Stdio::null())
        .output()
        .expect("run ask");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to open"), "stderr: {stderr}");
}

#[test]
fn score_fails_without_a_gold_file() {
    let missing = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_score"))
        .arg("--gold")
        .arg(missing.path().join("gold.csv"))
        .output()
        .expect("run score");
    assert!(!output.status.success());
}
