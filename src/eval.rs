//! Gold-set evaluation records and CSV reporting.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hand-authored evaluation case: a question plus the chunk that answers it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GoldRecord {
    /// Stable question identifier.
    pub qid: String,
    /// Question text fed to the retrieval pipeline.
    pub question: String,
    /// Chunk identifier expected at rank 1.
    pub expected_chunk: String,
}

impl GoldRecord {
    fn is_well_formed(&self) -> bool {
        !self.question.trim().is_empty() && !self.expected_chunk.trim().is_empty()
    }
}

/// One scored question, written as a results CSV row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// Gold question identifier.
    pub qid: String,
    /// Question text.
    pub question: String,
    /// Chunk retrieved at rank 1 (empty when nothing cleared the floor).
    pub retrieved_chunk: String,
    /// Rendered answer text.
    pub answer: String,
    /// Whether the rank-1 chunk matched the expected chunk.
    pub correct: bool,
}

/// Aggregate counters over the valid gold records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalSummary {
    /// Valid records that were scored.
    pub total: usize,
    /// Records whose rank-1 chunk matched.
    pub correct: usize,
}

impl EvalSummary {
    /// Records one scored question.
    pub fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    /// Fraction of correct answers over valid records, in [0, 1].
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Gold records that survived parsing, plus warnings for the rows that did not.
#[derive(Debug, Clone, Default)]
pub struct GoldSet {
    /// Well-formed records, in file order.
    pub records: Vec<GoldRecord>,
    /// One human-readable warning per skipped row.
    pub warnings: Vec<String>,
}

/// Reads the gold CSV, skipping malformed rows instead of aborting.
///
/// A row is malformed when it fails to parse or leaves the question or
/// expected chunk empty. Skipped rows are excluded from the scoring
/// denominator; the caller decides where the warnings go.
pub fn load_gold(path: &Path) -> Result<GoldSet> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(file);
    let mut set = GoldSet::default();
    for (idx, row) in reader.deserialize::<GoldRecord>().enumerate() {
        let line = idx + 2; // 1-based, after the header row
        match row {
            Ok(record) if record.is_well_formed() => set.records.push(record),
            Ok(record) => set.warnings.push(format!(
                "skipping gold row {line} ({}): missing question or expected chunk",
                record.qid
            )),
            Err(err) => set
                .warnings
                .push(format!("skipping malformed gold row {line}: {err}")),
        }
    }
    Ok(set)
}

/// Writes all result rows plus a trailing aggregate-accuracy row,
/// overwriting `path`.
pub fn write_results(path: &Path, results: &[ResultRecord], summary: &EvalSummary) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in results {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write result row {}", row.qid))?;
    }
    writer
        .write_record([
            "aggregate",
            "",
            "",
            "",
            &format!("{:.3}", summary.accuracy()),
        ])
        .context("failed to write aggregate row")?;
    writer.flush().context("failed to flush results file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gold(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gold.csv");
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(contents.as_bytes()).expect("write");
        (dir, path)
    }

    #[test]
    fn loads_valid_rows_and_skips_malformed() {
        let (_dir, path) = write_gold(
            "qid,question,expected_chunk\n\
             q1,What time is curfew?,handbook:1\n\
             q2,,handbook:0\n\
             q3,Where do I get an ID badge?,\n\
             q4,Can guests stay overnight?,visitation_policy:0\n",
        );
        let gold = load_gold(&path).expect("load");
        assert_eq!(gold.records.len(), 2);
        assert_eq!(gold.warnings.len(), 2);
        assert_eq!(gold.records[0].qid, "q1");
        assert_eq!(gold.records[1].expected_chunk, "visitation_policy:0");
    }

    #[test]
    fn quoted_questions_with_commas_survive() {
        let (_dir, path) = write_gold(
            "qid,question,expected_chunk\n\
             q1,\"If I'm late, what happens?\",conduct:2\n",
        );
        let gold = load_gold(&path).expect("load");
        assert_eq!(gold.records[0].question, "If I'm late, what happens?");
        assert!(gold.warnings.is_empty());
    }

    #[test]
    fn accuracy_counts_only_valid_records() {
        let mut summary = EvalSummary::default();
        summary.record(true);
        summary.record(false);
        summary.record(true);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.correct, 2);
        assert!((summary.accuracy() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_summary_reports_zero() {
        let summary = EvalSummary::default();
        assert_eq!(summary.accuracy(), 0.0);
    }

    #[test]
    fn results_file_ends_with_aggregate_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("results.csv");
        let results = vec![
            ResultRecord {
                qid: "q1".to_string(),
                question: "What time is curfew?".to_string(),
                retrieved_chunk: "handbook:1".to_string(),
                answer: "According to the handbook...".to_string(),
                correct: true,
            },
            ResultRecord {
                qid: "q2".to_string(),
                question: "Can I park overnight?".to_string(),
                retrieved_chunk: "handbook:0".to_string(),
                answer: INSUFFICIENT.to_string(),
                correct: false,
            },
        ];
        let mut summary = EvalSummary::default();
        summary.record(true);
        summary.record(false);
        write_results(&path, &results, &summary).expect("write");

        let contents = fs::read_to_string(&path).expect("read back");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "qid,question,retrieved_chunk,answer,correct");
        assert!(lines[1].starts_with("q1,"));
        assert_eq!(lines[3], "aggregate,,,,0.500");
    }

    const INSUFFICIENT: &str = "Insufficient context in the handbook sections I know.";
}
