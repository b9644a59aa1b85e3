//! Ingestion orchestrator: normalize → clean → chunk → extract → validate
//! → write, with per-stage failure isolation and cost attribution.
//!
//! Degradation policy per stage: the normalizer and chunker are pure and
//! never fail; the cleaner falls back to normalized text per window; the
//! extractor falls back to the empty record; the validator coerces and
//! warns. Only the writer can fail a document, and it cleans up after
//! itself so the one-generation invariant holds either way.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::chunker::chunk_text;
use crate::cleaner::LmCleaner;
use crate::config::ChunkingLimits;
use crate::error::{LecternError, Result};
use crate::extractor::MetadataExtractor;
use crate::metadata::MetadataRecord;
use crate::models::DocumentInput;
use crate::normalize::Normalizer;
use crate::observe::{CostLedger, CostSnapshot};
use crate::ontology::ReferenceOntology;
use crate::validator::validate;
use crate::writer::IndexWriter;

/// Result of one document ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub chunks_count: usize,
    pub metadata_record: MetadataRecord,
    pub season: Option<String>,
    pub episode: Option<String>,
    /// Stage labels that fell back to a degraded path
    /// (`cleaner:window#2`, `extractor`).
    pub degraded_stages: Vec<String>,
    /// Validator notes for dropped or defaulted values.
    pub warnings: Vec<String>,
    pub cost: CostSnapshot,
    pub completed_at: DateTime<Utc>,
}

impl IngestReport {
    /// `ok` or `ok_degraded(reason, …)`.
    pub fn outcome(&self) -> String {
        if self.degraded_stages.is_empty() {
            "ok".to_string()
        } else {
            format!("ok_degraded({})", self.degraded_stages.join(", "))
        }
    }
}

pub struct IngestPipeline {
    ontology: Arc<ReferenceOntology>,
    normalizer: Normalizer,
    cleaner: Option<LmCleaner>,
    extractor: Option<MetadataExtractor>,
    writer: IndexWriter,
    ledger: Arc<CostLedger>,
    chunking: ChunkingLimits,
}

impl IngestPipeline {
    pub fn new(
        ontology: Arc<ReferenceOntology>,
        cleaner: Option<LmCleaner>,
        extractor: Option<MetadataExtractor>,
        writer: IndexWriter,
        ledger: Arc<CostLedger>,
        chunking: ChunkingLimits,
    ) -> Result<Self> {
        let normalizer = Normalizer::new(&ontology)?;
        Ok(Self {
            ontology,
            normalizer,
            cleaner,
            extractor,
            writer,
            ledger,
            chunking,
        })
    }

    /// Ingest one document end to end, atomically replacing any previous
    /// generation under the same `doc_id`.
    pub async fn ingest(
        &self,
        input: &DocumentInput,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let cost_before = self.ledger.snapshot();

        let (chunks, outcome, degraded_stages) = self.prepare(input, cancel).await?;

        let chunks_count = self
            .writer
            .replace_document(
                &input.doc_id,
                &input.source_name,
                &chunks,
                &outcome.record,
                outcome.season.as_deref(),
                outcome.episode.as_deref(),
                cancel,
            )
            .await
            .map_err(|e| match e {
                LecternError::Cancelled => LecternError::Cancelled,
                other => LecternError::IngestFailed {
                    doc_id: input.doc_id.clone(),
                    reason: other.to_string(),
                },
            })?;

        let report = IngestReport {
            doc_id: input.doc_id.clone(),
            chunks_count,
            metadata_record: outcome.record,
            season: outcome.season,
            episode: outcome.episode,
            degraded_stages,
            warnings: outcome.warnings,
            cost: self.ledger.snapshot().since(&cost_before),
            completed_at: Utc::now(),
        };
        tracing::info!(
            doc_id = %report.doc_id,
            chunks = report.chunks_count,
            outcome = %report.outcome(),
            "document ingested"
        );
        Ok(report)
    }

    /// Run every stage except the writer. Used by `ingest` and by dry runs.
    pub async fn dry_run(
        &self,
        input: &DocumentInput,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let cost_before = self.ledger.snapshot();
        let (chunks, outcome, degraded_stages) = self.prepare(input, cancel).await?;
        Ok(IngestReport {
            doc_id: input.doc_id.clone(),
            chunks_count: chunks.len(),
            metadata_record: outcome.record,
            season: outcome.season,
            episode: outcome.episode,
            degraded_stages,
            warnings: outcome.warnings,
            cost: self.ledger.snapshot().since(&cost_before),
            completed_at: Utc::now(),
        })
    }

    async fn prepare(
        &self,
        input: &DocumentInput,
        cancel: &CancellationToken,
    ) -> Result<(
        Vec<crate::models::Chunk>,
        crate::validator::ValidationOutcome,
        Vec<String>,
    )> {
        let mut degraded_stages = Vec::new();

        // Stage 1: deterministic repair. Never fails.
        let normalized = self.normalizer.normalize(&input.raw_text);

        // Stage 2: LM condensation, degrading per window.
        let cleaned = match &self.cleaner {
            Some(cleaner) => {
                let outcome = cleaner.clean(&normalized, cancel).await?;
                degraded_stages.extend(outcome.degraded_labels());
                outcome.text
            }
            None => {
                self.ledger.mark_degraded();
                degraded_stages.push("cleaner".to_string());
                normalized
            }
        };

        if cancel.is_cancelled() {
            return Err(LecternError::Cancelled);
        }

        // Stage 3: chunking. Pure, has its own safety nets.
        let chunks = chunk_text(&cleaned, &self.chunking);

        // Stage 4: tagging, degrading to the empty record.
        let raw = match &self.extractor {
            Some(extractor) => {
                let extraction = extractor
                    .extract(&cleaned, &input.source_name, &self.ontology)
                    .await;
                if extraction.degraded {
                    degraded_stages.push("extractor".to_string());
                }
                extraction.value
            }
            None => {
                self.ledger.mark_degraded();
                degraded_stages.push("extractor".to_string());
                serde_json::to_value(MetadataRecord::empty()).expect("empty record serializes")
            }
        };

        if cancel.is_cancelled() {
            return Err(LecternError::Cancelled);
        }

        // Stage 5: coercion against the ontology. Never fails a document.
        let outcome = validate(&raw, &input.source_name, &self.ontology, &self.ledger);
        for warning in &outcome.warnings {
            tracing::warn!(doc_id = %input.doc_id, "{warning}");
        }

        Ok((chunks, outcome, degraded_stages))
    }
}
