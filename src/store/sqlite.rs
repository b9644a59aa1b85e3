//! SQLite-backed [`VectorStore`].
//!
//! One `vectors` table: id, `doc_id` (indexed), JSON payload, and the
//! embedding as a little-endian f32 BLOB. Queries are a brute-force cosine
//! scan with the filter evaluated in-process against the parsed payload,
//! which keeps the full filter algebra available without an extension.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{LecternError, Result};
use crate::filter::Filter;

use super::{QueryMatch, VectorRecord, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`, in WAL mode.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| LecternError::Config(format!("bad sqlite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create the schema. Idempotent; run via `lect init`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_doc_id ON vectors(doc_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let doc_id = record
                .payload
                .get("doc_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    LecternError::Internal(format!("record {} has no doc_id in payload", record.id))
                })?;
            sqlx::query(
                r#"
                INSERT INTO vectors (id, doc_id, payload, embedding) VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    payload = excluded.payload,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(doc_id)
            .bind(record.payload.to_string())
            .bind(vec_to_blob(&record.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vectors WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>> {
        let rows = sqlx::query("SELECT id, payload, embedding FROM vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::new();
        for row in &rows {
            let payload_text: String = row.get("payload");
            let payload: serde_json::Value = serde_json::from_str(&payload_text)?;
            if let Some(f) = filter {
                if !f.matches(&payload) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            matches.push(QueryMatch {
                id: row.get("id"),
                score: cosine_similarity(embedding, &stored),
                payload,
            });
        }

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
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
