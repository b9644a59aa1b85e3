//! Vector-store abstraction.
//!
//! The [`VectorStore`] trait captures everything the pipelines require of a
//! vector index: upsert by id with a metadata payload, deletion by
//! `doc_id`, and filtered top-k similarity queries. The in-repo backends
//! ([`memory::MemoryStore`], [`sqlite::SqliteStore`]) evaluate filters
//! in-process; remote adapters serialize them per capability.
//!
//! The index writer is the only component allowed to mutate vectors for a
//! given `doc_id`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filter::{Filter, StoreCapabilities};

/// One stored vector: identity, embedding, and the full metadata payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// `{doc_id}#{chunk_index}`.
    pub id: String,
    pub embedding: Vec<f32>,
    /// Metadata object: the 18-field record plus document identity fields.
    pub payload: serde_json::Value,
}

/// A similarity match returned from a store query.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    /// Raw cosine similarity.
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Serialize a vector identity from its components.
pub fn vector_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}#{chunk_index}")
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    /// Insert or replace vectors by id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Delete every vector whose payload carries the given `doc_id`.
    async fn delete_by_doc(&self, doc_id: &str) -> Result<()>;

    /// Top-k cosine similarity query with an optional metadata filter.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>>;

    /// Number of live vectors for a document.
    async fn count_for_doc(&self, doc_id: &str) -> Result<usize>;
}
