//! Embedder + vector store writer: atomic per-document replace.
//!
//! The writer exclusively owns vectors bearing a given `doc_id`. A replace
//! deletes the previous generation, then upserts the new one in bounded
//! batches with per-batch retries; if a batch cannot be written the writer
//! issues a best-effort cleanup delete so the index never holds
//! mixed-generation data. Replaces for the same `doc_id` are serialized
//! through an advisory lock, so concurrent reingests are ordered and the
//! later one wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::embedding::Embedder;
use crate::error::{LecternError, Result};
use crate::metadata::MetadataRecord;
use crate::models::Chunk;
use crate::observe::CostLedger;
use crate::store::{vector_id, VectorRecord, VectorStore};

pub struct IndexWriter {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    ledger: Arc<CostLedger>,
    locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    upsert_batch: usize,
    max_batch_retries: u32,
    embed_batch: usize,
}

impl IndexWriter {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        ledger: Arc<CostLedger>,
        upsert_batch: usize,
        max_batch_retries: u32,
        embed_batch: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            ledger,
            locks: tokio::sync::Mutex::new(HashMap::new()),
            upsert_batch: upsert_batch.clamp(1, 100),
            max_batch_retries,
            embed_batch: embed_batch.max(1),
        }
    }

    /// Atomically replace the live chunk set for a document. Returns the
    /// number of vectors written.
    #[allow(clippy::too_many_arguments)]
    pub async fn replace_document(
        &self,
        doc_id: &str,
        source_name: &str,
        chunks: &[Chunk],
        record: &MetadataRecord,
        season: Option<&str>,
        episode: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let _doc_guard = self.acquire_doc_lock(doc_id).await;

        if cancel.is_cancelled() {
            return Err(LecternError::Cancelled);
        }

        let embeddings = self.embed_chunks(chunks).await?;
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                id: vector_id(doc_id, chunk.chunk_index),
                embedding,
                payload: build_payload(doc_id, source_name, chunk, record, season, episode),
            })
            .collect();

        // Previous generation goes first; a failure here leaves the old
        // generation intact, which still satisfies one-generation-per-doc.
        self.with_batch_retries(|| self.store.delete_by_doc(doc_id))
            .await
            .map_err(|e| LecternError::PartialIndex {
                doc_id: doc_id.to_string(),
                message: format!("delete of previous generation failed: {e}"),
            })?;

        for batch in records.chunks(self.upsert_batch) {
            if cancel.is_cancelled() {
                self.cleanup(doc_id).await;
                return Err(LecternError::Cancelled);
            }
            if let Err(e) = self.with_batch_retries(|| self.store.upsert(batch)).await {
                self.cleanup(doc_id).await;
                return Err(LecternError::PartialIndex {
                    doc_id: doc_id.to_string(),
                    message: e.to_string(),
                });
            }
        }

        tracing::info!(doc_id, vectors = records.len(), "index generation replaced");
        Ok(records.len())
    }

    async fn acquire_doc_lock(&self, doc_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(doc_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Embed chunk texts in parallel batches, restoring input order.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let input_chars: usize = texts.iter().map(|t| t.chars().count()).sum();

        let batches: Vec<Vec<String>> = texts
            .chunks(self.embed_batch)
            .map(|b| b.to_vec())
            .collect();
        let results = try_join_all(
            batches
                .iter()
                .map(|batch| async move { self.embedder.embed(batch).await }),
        )
        .await?;

        self.ledger.record_call("embedding", input_chars, 0);
        Ok(results.into_iter().flatten().collect())
    }

    async fn with_batch_retries<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.max_batch_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(250 * (1 << (attempt - 1).min(4)));
                tracing::debug!(attempt, ?delay, "retrying vector-store batch");
                tokio::time::sleep(delay).await;
            }
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| LecternError::transient("vector-store", "retries exhausted")))
    }

    /// Best-effort delete to restore one-generation-per-doc after a failed
    /// or cancelled replace.
    async fn cleanup(&self, doc_id: &str) {
        if let Err(e) = self.store.delete_by_doc(doc_id).await {
            tracing::warn!(doc_id, error = %e, "cleanup delete failed");
        }
    }
}

/// Stored payload: the full 18-field record plus document identity fields
/// and the joined-string twins of the array fields.
fn build_payload(
    doc_id: &str,
    source_name: &str,
    chunk: &Chunk,
    record: &MetadataRecord,
    season: Option<&str>,
    episode: Option<&str>,
) -> Value {
    let mut payload = serde_json::to_value(record)
        .expect("metadata record serializes")
        .as_object()
        .cloned()
        .expect("metadata record is an object");

    payload.insert("doc_id".into(), json!(doc_id));
    payload.insert("source_name".into(), json!(source_name));
    payload.insert("chunk_index".into(), json!(chunk.chunk_index));
    payload.insert("text".into(), json!(chunk.text));
    payload.insert("optimized".into(), json!(true));
    payload.insert("season".into(), season.map_or(Value::Null, |s| json!(s)));
    payload.insert("episode".into(), episode.map_or(Value::Null, |e| json!(e)));
    payload.insert("content_hash".into(), json!(content_hash(&chunk.text)));

    for field in MetadataRecord::joined_array_fields() {
        if let Some(Value::Array(items)) = payload.get(*field) {
            let joined: String = items
                .iter()
                .filter_map(|v| v.as_str())
                .fold(String::from("|"), |mut acc, item| {
                    acc.push_str(item);
                    acc.push('|');
                    acc
                });
            payload.insert(format!("{field}_joined"), json!(joined));
        }
    }

    Value::Object(payload)
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
