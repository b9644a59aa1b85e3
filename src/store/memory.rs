//! In-memory [`VectorStore`] for tests and ephemeral runs.
//!
//! A `HashMap` behind `std::sync::RwLock`; similarity queries are
//! brute-force cosine over all stored vectors with the filter evaluated
//! in-process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::filter::Filter;

use super::{QueryMatch, VectorRecord, VectorStore};

#[derive(Default)]
pub struct MemoryStore {
    vectors: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of live vectors, across all documents.
    pub fn len(&self) -> usize {
        self.vectors.read().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn doc_id_of(record_payload: &serde_json::Value) -> Option<&str> {
    record_payload.get("doc_id").and_then(|v| v.as_str())
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut vectors = self.vectors.write().expect("store lock");
        for record in records {
            vectors.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
        let mut vectors = self.vectors.write().expect("store lock");
        vectors.retain(|_, record| doc_id_of(&record.payload) != Some(doc_id));
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>> {
        let vectors = self.vectors.read().expect("store lock");
        let mut matches: Vec<QueryMatch> = vectors
            .values()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.payload)))
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(embedding, &record.embedding),
                payload: record.payload.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn count_for_doc(&self, doc_id: &str) -> Result<usize> {
        let vectors = self.vectors.read().expect("store lock");
        Ok(vectors
            .values()
            .filter(|record| doc_id_of(&record.payload) == Some(doc_id))
            .count())
    }
}
