//! Query orchestrator: plan → embed variants → retrieve → re-rank.
//!
//! Never raises: planner degradations are recorded on the plan, failed
//! variants are skipped, and a total retrieval failure (or cancellation)
//! returns an empty context with a diagnostic code instead of an error.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::models::{Citation, ContextChunk, QueryRequest};
use crate::observe::CostLedger;
use crate::planner::{Entities, Intent, QueryPlanner};
use crate::rerank::{rerank, ConfidenceTier};
use crate::store::{QueryMatch, VectorStore};

/// Compact description of the executed plan, for callers and logs.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub intent: Intent,
    pub entities: Entities,
    /// Serialized filter actually sent to the store, if any.
    pub filter_used: Option<serde_json::Value>,
    pub k_used: usize,
    pub variant_count: usize,
    /// Planner steps that degraded to rules.
    pub degraded: Vec<String>,
}

/// The assembled context for the answering model. Advisory only: the
/// engine never synthesizes an answer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub context_chunks: Vec<ContextChunk>,
    pub citations: Vec<Citation>,
    pub confidence: ConfidenceTier,
    pub plan: PlanSummary,
    /// Set when retrieval returned nothing for an abnormal reason.
    pub diagnostic: Option<String>,
}

pub struct QueryEngine {
    planner: QueryPlanner,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    retrieval: RetrievalConfig,
    ledger: Arc<CostLedger>,
}

impl QueryEngine {
    pub fn new(
        planner: QueryPlanner,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        retrieval: RetrievalConfig,
        ledger: Arc<CostLedger>,
    ) -> Self {
        Self {
            planner,
            embedder,
            store,
            retrieval,
            ledger,
        }
    }

    /// Answer a question with a ranked context set, citations, and an
    /// advisory confidence tier.
    pub async fn query(&self, request: &QueryRequest, cancel: &CancellationToken) -> QueryResponse {
        let query_id = Uuid::new_v4();

        let plan = self
            .planner
            .plan(&request.question, request.explicit_filters.as_ref())
            .await;

        let summary = PlanSummary {
            intent: plan.intent,
            entities: plan.entities.clone(),
            filter_used: plan
                .filter
                .as_ref()
                .map(|f| f.to_expr(&self.store.capabilities())),
            k_used: plan.recommended_k,
            variant_count: plan.variants.len(),
            degraded: plan.degraded.clone(),
        };

        // Fan out one retrieval per variant; results may arrive in any
        // order, the re-ranker is order-insensitive.
        let k = plan.recommended_k;
        let retrievals = join_all(plan.variants.iter().map(|variant| {
            let filter = plan.filter.clone();
            async move {
                let embedding = embed_query(self.embedder.as_ref(), variant).await?;
                self.ledger
                    .record_call("query-embedding", variant.chars().count(), 0);
                self.store.query(&embedding, k, filter.as_ref()).await
            }
        }))
        .await;

        if cancel.is_cancelled() {
            // Partial results are discarded on cancellation.
            return empty_response(summary, "cancelled");
        }

        let mut matches: Vec<QueryMatch> = Vec::new();
        let mut failed = 0usize;
        for result in retrievals {
            match result {
                Ok(batch) => matches.extend(batch),
                Err(e) => {
                    tracing::warn!(error = %e, "variant retrieval failed");
                    failed += 1;
                }
            }
        }

        if failed == summary.variant_count {
            let err = crate::error::LecternError::RetrievalDegraded(format!(
                "all {failed} variant retrievals failed"
            ));
            tracing::warn!(%query_id, error = %err, "query returned empty context");
            self.ledger.mark_degraded();
            return empty_response(summary, "retrieval_failed");
        }

        let outcome = rerank(matches, &request.question, &plan, &self.retrieval);
        let context_chunks = outcome
            .chunks
            .iter()
            .map(|chunk| ContextChunk {
                text: chunk
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                source_name: chunk
                    .payload
                    .get("source_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                doc_id: chunk
                    .payload
                    .get("doc_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                chunk_index: chunk
                    .payload
                    .get("chunk_index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize,
            })
            .collect();

        tracing::info!(
            %query_id,
            intent = plan.intent.as_str(),
            results = outcome.chunks.len(),
            confidence = outcome.confidence.as_str(),
            "query answered"
        );

        QueryResponse {
            context_chunks,
            citations: outcome.citations,
            confidence: outcome.confidence,
            plan: summary,
            diagnostic: None,
        }
    }
}

fn empty_response(plan: PlanSummary, diagnostic: &str) -> QueryResponse {
    QueryResponse {
        context_chunks: Vec::new(),
        citations: Vec::new(),
        confidence: ConfidenceTier::VeryLow,
        plan,
        diagnostic: Some(diagnostic.to_string()),
    }
}
