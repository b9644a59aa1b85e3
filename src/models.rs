//! Core data models shared across the ingestion and query pipelines.

use serde::{Deserialize, Serialize};

/// Caller-supplied document descriptor for ingestion.
///
/// `doc_id` is the sole identity key: reingesting the same id atomically
/// replaces the previous chunk set in the vector index.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub doc_id: String,
    pub source_name: String,
    pub raw_text: String,
}

/// A contiguous slice of a document's cleaned text, the retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position within the document.
    pub chunk_index: usize,
    pub text: String,
    /// Length in characters (not bytes).
    pub char_length: usize,
}

impl Chunk {
    pub fn new(chunk_index: usize, text: String) -> Self {
        let char_length = text.chars().count();
        Self {
            chunk_index,
            text,
            char_length,
        }
    }
}

/// Explicit, user-provided query filters that survive planner downgrades.
#[derive(Debug, Clone, Default)]
pub struct ExplicitFilters {
    /// Restrict retrieval to one document.
    pub doc_id: Option<String>,
    /// Restrict retrieval to chunks tagged with these key concepts.
    pub tags: Vec<String>,
}

/// A query request against the indexed corpus.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub explicit_filters: Option<ExplicitFilters>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            explicit_filters: None,
        }
    }
}

/// A context chunk returned to the answering model.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub text: String,
    pub source_name: String,
    pub doc_id: String,
    pub chunk_index: usize,
}

/// A citation record for one retrieved chunk.
///
/// `similarity` is the raw (pre-boost) cosine similarity so the figure stays
/// comparable with the retrieval floor.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub source_name: String,
    pub season: Option<String>,
    pub chunk_index: usize,
    pub similarity: f32,
}
