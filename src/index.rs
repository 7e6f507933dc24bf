//! Embedding matrix persistence and nearest-neighbor retrieval.

use std::cmp::Ordering;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

use crate::chunker::ChunkRecord;

/// Magic bytes opening every matrix file.
const MATRIX_MAGIC: [u8; 4] = *b"HQIX";
/// Current matrix file format version.
const MATRIX_VERSION: u32 = 1;
/// Bytes preceding the f32 payload: magic + version + rows + dims.
const MATRIX_HEADER_LEN: u64 = 24;
/// Guard added to vector norms so zero vectors never divide by zero.
const NORM_EPSILON: f32 = 1e-8;

/// Embedding-provider parameters and row ordering captured at build time.
///
/// The Asker and Scorer refuse to run against an index built with a different
/// model or dimension, and `row_ids` pins matrix rows to chunk identifiers so
/// ordering never has to be assumed across processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Embedding model identifier used at build time.
    pub embedding_model: String,
    /// Embedding vector dimension.
    pub dimension: usize,
    /// Number of matrix rows.
    pub rows: usize,
    /// Chunk identifier of each matrix row, in row order.
    pub row_ids: Vec<String>,
    /// CRC32 over the chunk file contents the matrix was built from.
    pub corpus_checksum: u32,
}

impl IndexMeta {
    /// Loads metadata from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let meta: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid index metadata in {:?}", path))?;
        anyhow::ensure!(
            meta.rows == meta.row_ids.len(),
            "index metadata is inconsistent: {} rows but {} row ids",
            meta.rows,
            meta.row_ids.len()
        );
        Ok(meta)
    }

    /// Writes metadata as pretty-printed JSON, overwriting `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            fs::File::create(path).with_context(|| format!("failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to write index metadata to {:?}", path))?;
        Ok(())
    }
}

/// Dense row-major f32 matrix holding one embedding per chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dims: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Assembles a matrix from row vectors, enforcing a uniform dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        anyhow::ensure!(!rows.is_empty(), "cannot build an empty embedding matrix");
        let dims = rows[0].len();
        anyhow::ensure!(dims > 0, "embedding vectors must be non-empty");
        let mut data = Vec::with_capacity(rows.len() * dims);
        for (idx, row) in rows.into_iter().enumerate() {
            anyhow::ensure!(
                row.len() == dims,
                "embedding row {} has dimension {} but expected {}",
                idx,
                row.len(),
                dims
            );
            data.extend_from_slice(&row);
        }
        Ok(Self { dims, data })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.data.len() / self.dims
    }

    /// Vector dimension.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Borrow of row `idx`.
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.dims;
        &self.data[start..start + self.dims]
    }

    /// Writes the matrix to `path` via a temp file plus rename, so a failed
    /// write never leaves a truncated matrix behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let file =
                fs::File::create(&tmp).with_context(|| format!("failed to create {:?}", tmp))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&MATRIX_MAGIC)?;
            writer.write_all(&MATRIX_VERSION.to_le_bytes())?;
            writer.write_all(&(self.rows() as u64).to_le_bytes())?;
            writer.write_all(&(self.dims as u64).to_le_bytes())?;
            for value in &self.data {
                writer.write_all(&value.to_le_bytes())?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move matrix into place at {:?}", path))?;
        Ok(())
    }

    /// Reads a matrix previously written by [`EmbeddingMatrix::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat {:?}", path))?
            .len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .with_context(|| format!("matrix file {:?} is truncated", path))?;
        anyhow::ensure!(
            magic == MATRIX_MAGIC,
            "{:?} is not an embedding matrix file",
            path
        );
        let version = read_u32(&mut reader, path)?;
        anyhow::ensure!(
            version == MATRIX_VERSION,
            "unsupported matrix format version {} in {:?}",
            version,
            path
        );
        let rows = read_u64(&mut reader, path)?;
        let dims = read_u64(&mut reader, path)?;
        anyhow::ensure!(
            rows > 0 && dims > 0,
            "matrix file {:?} declares an empty shape",
            path
        );
        // The declared shape must match the file size exactly before
        // anything is allocated.
        let payload_len = rows
            .checked_mul(dims)
            .and_then(|cells| cells.checked_mul(4))
            .with_context(|| format!("matrix file {:?} declares an implausible shape", path))?;
        anyhow::ensure!(
            file_len == MATRIX_HEADER_LEN + payload_len,
            "matrix file {:?} is {} bytes but its header implies {}",
            path,
            file_len,
            MATRIX_HEADER_LEN + payload_len
        );
        let rows = rows as usize;
        let dims = dims as usize;

        let mut data = Vec::with_capacity(rows * dims);
        let mut buf = [0u8; 4];
        for _ in 0..rows * dims {
            reader
                .read_exact(&mut buf)
                .with_context(|| format!("matrix file {:?} is truncated", path))?;
            data.push(f32::from_le_bytes(buf));
        }
        Ok(Self { dims, data })
    }
}

fn read_u32<R: Read>(reader: &mut R, path: &Path) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .with_context(|| format!("matrix file {:?} is truncated", path))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, path: &Path) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .with_context(|| format!("matrix file {:?} is truncated", path))?;
    Ok(u64::from_le_bytes(buf))
}

/// Cosine similarity between two vectors of equal length, in [-1, 1].
///
/// # Panics
///
/// Panics when the two slices have different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "cosine similarity requires equal-length vectors"
    );
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    dot / ((norm_a.sqrt() + NORM_EPSILON) * (norm_b.sqrt() + NORM_EPSILON))
}

/// One retrieval hit: a matrix row plus its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Matrix row index.
    pub row: usize,
    /// Chunk identifier mapped to that row.
    pub chunk_id: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Read-only retrieval context: chunk records, matrix and metadata together.
///
/// Constructed once per process and passed by reference to every query, so
/// retrieval stays a pure function of (question vector, index).
#[derive(Debug, Clone)]
pub struct SearchIndex {
    chunks: Vec<ChunkRecord>,
    matrix: EmbeddingMatrix,
    meta: IndexMeta,
}

impl SearchIndex {
    /// Assembles an index and enforces the chunk/matrix/metadata invariants.
    pub fn new(chunks: Vec<ChunkRecord>, matrix: EmbeddingMatrix, meta: IndexMeta) -> Result<Self> {
        anyhow::ensure!(
            matrix.rows() == chunks.len(),
            "matrix has {} rows but chunk file has {} records",
            matrix.rows(),
            chunks.len()
        );
        anyhow::ensure!(
            meta.rows == matrix.rows(),
            "metadata declares {} rows but matrix has {}",
            meta.rows,
            matrix.rows()
        );
        anyhow::ensure!(
            meta.dimension == matrix.dims(),
            "metadata declares dimension {} but matrix has {}",
            meta.dimension,
            matrix.dims()
        );
        for (row, (chunk, row_id)) in chunks.iter().zip(meta.row_ids.iter()).enumerate() {
            anyhow::ensure!(
                &chunk.chunk_id == row_id,
                "row {} maps to chunk {:?} in metadata but {:?} in the chunk file",
                row,
                row_id,
                chunk.chunk_id
            );
        }
        let expected = corpus_checksum(&chunks);
        anyhow::ensure!(
            expected == meta.corpus_checksum,
            "chunk file changed since the index was built (checksum {:08x} != {:08x}); re-run the indexer",
            expected,
            meta.corpus_checksum
        );
        Ok(Self {
            chunks,
            matrix,
            meta,
        })
    }

    /// Loads and validates the three index files.
    pub fn load(chunks_path: &Path, matrix_path: &Path, meta_path: &Path) -> Result<Self> {
        let chunks = crate::chunker::load_chunks(chunks_path)?;
        anyhow::ensure!(
            !chunks.is_empty(),
            "chunk file {:?} contains no records",
            chunks_path
        );
        let matrix = EmbeddingMatrix::load(matrix_path)?;
        let meta = IndexMeta::load(meta_path)?;
        Self::new(chunks, matrix, meta)
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Embedding dimension queries must match.
    pub fn dimension(&self) -> usize {
        self.matrix.dims()
    }

    /// Index metadata reference.
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// Chunk record backing matrix row `row`.
    pub fn chunk(&self, row: usize) -> &ChunkRecord {
        &self.chunks[row]
    }

    /// Scores `query` against every row and returns the top `k` hits.
    ///
    /// Ordering is deterministic: higher similarity first, ties broken by
    /// lowest row index.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<Retrieval>> {
        anyhow::ensure!(
            query.len() == self.matrix.dims(),
            "query embedding has dimension {} but the index was built with {}",
            query.len(),
            self.matrix.dims()
        );
        let mut scored: Vec<(usize, f32)> = (0..self.matrix.rows())
            .map(|row| (row, cosine_similarity(query, self.matrix.row(row))))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k.max(1));
        Ok(scored
            .into_iter()
            .map(|(row, score)| Retrieval {
                row,
                chunk_id: self.chunks[row].chunk_id.clone(),
                score,
            })
            .collect())
    }
}

/// CRC32 fingerprint of a chunk sequence, stable across runs.
pub fn corpus_checksum(chunks: &[ChunkRecord]) -> u32 {
    let mut hasher = Crc32::new();
    for chunk in chunks {
        hasher.update(chunk.chunk_id.as_bytes());
        hasher.update(&chunk.checksum.to_le_bytes());
    }
    hasher.finalize()
}
