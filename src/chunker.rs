//! Plain-text corpus chunking primitives for the handbook index.

use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Raw handbook document awaiting chunking.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// File name of the source (e.g. `visitation_policy.txt`).
    pub name: String,
    /// Full text content.
    pub text: String,
}

impl SourceDocument {
    /// Builds a new source document payload.
    pub fn new<N: Into<String>, T: Into<String>>(name: N, text: T) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// File stem used to derive chunk identifiers.
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }

    /// Human-readable fallback title derived from the file name.
    pub fn base_title(&self) -> String {
        title_case(self.stem())
    }
}

/// Chunk emitted for downstream embedding and retrieval, one JSONL line each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Deterministic identifier: `{file_stem}:{seq}`.
    pub chunk_id: String,
    /// Source file name.
    pub source: String,
    /// Section heading the chunk belongs to.
    pub section_title: String,
    /// 0-based chunk index within the source file.
    pub seq: usize,
    /// Character offset of the chunk within the normalized document body.
    pub char_start: usize,
    /// Chunk body text submitted to the embedding model.
    pub text: String,
    /// CRC32 checksum of the chunk text.
    pub checksum: u32,
}

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk before flushing.
    pub max_chars: usize,
    /// Desired tail overlap between adjacent chunks, in characters.
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 3000,
            overlap_chars: 0,
        }
    }
}

/// Errors surfaced while chunking a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// The document contained no usable text.
    EmptyDocument(String),
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDocument(name) => {
                write!(f, "document {name:?} contains no usable text")
            }
        }
    }
}

impl std::error::Error for ChunkError {}

/// Stateless document chunking service.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Builds a new chunker instance.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits a document into chunk records with deterministic identifiers.
    ///
    /// Blank-line runs collapse to single paragraph breaks, Roman-numeral
    /// headings (`IV. Housing`) start a new section and are excluded from
    /// chunk bodies, and whitespace-only chunks are dropped.
    pub fn chunk_document(&self, doc: &SourceDocument) -> Result<Vec<ChunkRecord>, ChunkError> {
        let normalized = normalize_blank_lines(&doc.text);
        let paragraphs = collect_paragraphs(&normalized, &doc.base_title());
        if paragraphs.is_empty() {
            return Err(ChunkError::EmptyDocument(doc.name.clone()));
        }

        let mut records = Vec::new();
        let mut buffer: Vec<&Paragraph> = Vec::new();
        let mut buffered_chars = 0usize;
        let max_chars = self.config.max_chars.max(1);
        let overlap = self.config.overlap_chars.min(max_chars.saturating_sub(1));

        for paragraph in &paragraphs {
            let section_changed = buffer
                .last()
                .is_some_and(|prev| prev.section_title != paragraph.section_title);
            let over_budget =
                !buffer.is_empty() && buffered_chars + paragraph.text.len() + 2 > max_chars;

            if section_changed || over_budget {
                flush_chunk(&mut records, &buffer, doc);
                if overlap == 0 || section_changed {
                    buffer.clear();
                } else {
                    buffer = retain_overlap(&buffer, overlap);
                }
                buffered_chars = buffer.iter().map(|p| p.text.len() + 2).sum();
            }

            buffer.push(paragraph);
            buffered_chars += paragraph.text.len() + 2;
        }
        flush_chunk(&mut records, &buffer, doc);

        if records.is_empty() {
            return Err(ChunkError::EmptyDocument(doc.name.clone()));
        }
        Ok(records)
    }
}

/// A contiguous run of non-blank lines tagged with its section context.
#[derive(Debug, Clone)]
struct Paragraph {
    section_title: String,
    char_start: usize,
    text: String,
}

/// Collapses runs of blank lines down to exactly one blank line.
pub fn normalize_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank_streak = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_streak += 1;
            if blank_streak == 1 {
                out.push("");
            }
        } else {
            blank_streak = 0;
            out.push(line.trim_end());
        }
    }
    out.join("\n")
}

fn collect_paragraphs(normalized: &str, base_title: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut current_title = base_title.to_string();
    let mut current: Option<Paragraph> = None;
    let mut offset = 0usize;

    for line in normalized.split('\n') {
        let line_start = offset;
        offset += line.len() + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if let Some(paragraph) = current.take() {
                paragraphs.push(paragraph);
            }
            continue;
        }

        if let Some(title) = roman_heading(trimmed) {
            // Heading lines open a new section and never join a chunk body.
            if let Some(paragraph) = current.take() {
                paragraphs.push(paragraph);
            }
            current_title = title.to_string();
            continue;
        }

        match current.as_mut() {
            Some(paragraph) => {
                paragraph.text.push('\n');
                paragraph.text.push_str(trimmed);
            }
            None => {
                current = Some(Paragraph {
                    section_title: current_title.clone(),
                    char_start: line_start,
                    text: trimmed.to_string(),
                });
            }
        }
    }
    if let Some(paragraph) = current.take() {
        paragraphs.push(paragraph);
    }

    paragraphs.retain(|p| !p.text.trim().is_empty());
    paragraphs
}

/// Parses `IV. Housing`-style section headings, returning the title part.
fn roman_heading(line: &str) -> Option<&str> {
    let (numeral, rest) = line.split_once(". ")?;
    if numeral.is_empty() || !numeral.chars().all(|ch| "IVXLCDM".contains(ch)) {
        return None;
    }
    let title = rest.trim();
    (!title.is_empty()).then_some(title)
}

fn flush_chunk(records: &mut Vec<ChunkRecord>, buffer: &[&Paragraph], doc: &SourceDocument) {
    let text = buffer
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.trim().is_empty() {
        return;
    }

    let first = buffer.first().expect("non-empty chunk buffer");
    let seq = records.len();
    records.push(ChunkRecord {
        chunk_id: format!("{}:{}", doc.stem(), seq),
        source: doc.name.clone(),
        section_title: first.section_title.clone(),
        seq,
        char_start: first.char_start,
        checksum: text_checksum(&text),
        text,
    });
}

fn retain_overlap<'a>(buffer: &[&'a Paragraph], overlap: usize) -> Vec<&'a Paragraph> {
    let mut retained = Vec::new();
    let mut chars = 0usize;
    for paragraph in buffer.iter().rev() {
        retained.push(*paragraph);
        chars += paragraph.text.len();
        if chars >= overlap {
            break;
        }
    }
    retained.reverse();
    retained
}

/// CRC32 checksum of a chunk body.
pub fn text_checksum(text: &str) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(text.as_bytes());
    hasher.finalize()
}

fn title_case(stem: &str) -> String {
    stem.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads every `.txt` file directly under `dir`, sorted by path for
/// determinism.
///
/// The scan is deliberately flat: chunk identifiers are derived from file
/// stems, and nested directories could carry same-stem files whose ids would
/// collide.
pub fn read_source_dir(dir: &Path) -> Result<Vec<SourceDocument>> {
    anyhow::ensure!(dir.is_dir(), "data directory {:?} does not exist", dir);
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to scan {:?}", dir))?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "txt")
        {
            paths.push(entry.path().to_path_buf());
        }
    }
    paths.sort();
    anyhow::ensure!(!paths.is_empty(), "no .txt files found under {:?}", dir);

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text =
            fs::read_to_string(&path).with_context(|| format!("failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        documents.push(SourceDocument::new(name, text));
    }
    Ok(documents)
}

/// Loads chunk records from a JSONL file.
pub fn load_chunks(path: &Path) -> Result<Vec<ChunkRecord>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut chunks = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read chunk line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid chunk record at line {}", idx + 1))?;
        chunks.push(record);
    }
    Ok(chunks)
}

/// Writes chunk records as one JSON object per line, overwriting `path`.
pub fn write_chunks(path: &Path, chunks: &[ChunkRecord]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    for chunk in chunks {
        serde_json::to_writer(&mut writer, chunk)
            .with_context(|| format!("failed to serialize chunk {}", chunk.chunk_id))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
