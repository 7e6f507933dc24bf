//! Guardrailed answer construction from retrieved chunks.
//!
//! Answers are never free-generated: the retrieved excerpt is inserted into a
//! fixed surrounding phrase, and questions whose best similarity falls below
//! the configured floor get a fixed refusal line instead.

use crate::index::{Retrieval, SearchIndex};

/// Fixed line printed when no chunk scores above the similarity floor.
pub const INSUFFICIENT_CONTEXT: &str = "Insufficient context in the handbook sections I know.";

/// Answer construction knobs.
#[derive(Debug, Clone, Copy)]
pub struct AnswerConfig {
    /// Best-hit similarity below this yields [`INSUFFICIENT_CONTEXT`].
    pub min_similarity: f32,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.68,
        }
    }
}

/// A rendered, citable answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Identifier of the chunk the answer quotes.
    pub chunk_id: String,
    /// Similarity of that chunk against the question.
    pub score: f32,
    /// Fully rendered answer text.
    pub text: String,
}

/// Outcome of answering one question against the index.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// The top hit cleared the similarity floor.
    Answered(Answer),
    /// Nothing in the index relates closely enough to the question.
    InsufficientContext,
}

impl AnswerOutcome {
    /// Printable answer text for either outcome.
    pub fn text(&self) -> &str {
        match self {
            Self::Answered(answer) => &answer.text,
            Self::InsufficientContext => INSUFFICIENT_CONTEXT,
        }
    }

    /// Chunk identifier backing the answer, when one exists.
    pub fn chunk_id(&self) -> Option<&str> {
        match self {
            Self::Answered(answer) => Some(&answer.chunk_id),
            Self::InsufficientContext => None,
        }
    }
}

/// Turns ranked retrieval hits into a guardrailed answer.
pub fn compose(index: &SearchIndex, hits: &[Retrieval], config: &AnswerConfig) -> AnswerOutcome {
    let Some(best) = hits.first() else {
        return AnswerOutcome::InsufficientContext;
    };
    if best.score < config.min_similarity {
        return AnswerOutcome::InsufficientContext;
    }
    let chunk = index.chunk(best.row);
    let text = format!(
        "According to the handbook ({section}):\n\n{excerpt}\n\nSource: {source} [{id}], similarity {score:.3}",
        section = chunk.section_title,
        excerpt = chunk.text,
        source = chunk.source,
        id = chunk.chunk_id,
        score = best.score,
    );
    AnswerOutcome::Answered(Answer {
        chunk_id: chunk.chunk_id.clone(),
        score: best.score,
        text,
    })
}
