//! End-to-end pipeline tests: ingest and query through the public API with
//! a scripted mock text model, the deterministic hash embedder, and the
//! in-memory vector store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use lectern::config::{ChunkingLimits, RetrievalConfig};
use lectern::cleaner::LmCleaner;
use lectern::error::LecternError;
use lectern::extractor::MetadataExtractor;
use lectern::ingest::IngestPipeline;
use lectern::llm::TextModel;
use lectern::embedding::HashEmbedder;
use lectern::models::{DocumentInput, QueryRequest};
use lectern::observe::CostLedger;
use lectern::ontology::ReferenceOntology;
use lectern::planner::{Intent, QueryPlanner};
use lectern::query::QueryEngine;
use lectern::store::memory::MemoryStore;
use lectern::store::VectorStore;
use lectern::writer::IndexWriter;

const DIMS: usize = 128;

fn ontology() -> Arc<ReferenceOntology> {
    Arc::new(
        ReferenceOntology::from_toml_str(include_str!("../config/ontology.toml"))
            .expect("bundled ontology parses"),
    )
}

/// Scripted text model: routes on prompt shape, so the same instance serves
/// the cleaner, extractor, planner, and expansion call sites.
struct MockModel {
    extraction: Value,
    /// Cleaner windows containing this marker fail with a transient error.
    fail_marker: Option<String>,
    cleaner_calls: AtomicU32,
}

impl MockModel {
    fn with_extraction(extraction: Value) -> Self {
        Self {
            extraction,
            fail_marker: None,
            cleaner_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TextModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> lectern::error::Result<String> {
        if prompt.contains("Condense the text") {
            self.cleaner_calls.fetch_add(1, Ordering::SeqCst);
            let window = prompt.split_once("\n\n").map(|(_, w)| w).unwrap_or(prompt);
            if let Some(marker) = &self.fail_marker {
                if window.contains(marker) {
                    return Err(LecternError::transient("text-model", "503 upstream"));
                }
            }
            return Ok(window.to_string());
        }
        if prompt.contains("Produce a single JSON object") {
            // Fenced, to exercise wrapper stripping on the real path.
            return Ok(format!("```json\n{}\n```", self.extraction));
        }
        if prompt.contains("Extract search filters") {
            return Ok("{}".to_string());
        }
        if prompt.contains("Rephrase this question") {
            return Ok("Season 22 ENFP pedagogue pair dynamics\nWhat the lectures say about the ENFP pedagogue pair in season 22".to_string());
        }
        Ok(String::new())
    }
}

struct Harness {
    pipeline: IngestPipeline,
    engine: QueryEngine,
    store: Arc<MemoryStore>,
    ledger: Arc<CostLedger>,
}

/// Wire the full stack around a shared memory store and hash embedder. The
/// similarity floor is configurable because hash embeddings are lexical and
/// integration tests reason about filters and ranking, not absolute cosine
/// levels.
fn harness(model: Option<Arc<dyn TextModel>>, similarity_floor: f32) -> Harness {
    let ontology = ontology();
    let ledger = Arc::new(CostLedger::new());
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let retrieval = RetrievalConfig {
        similarity_floor,
        ..RetrievalConfig::default()
    };

    let cleaner = model.as_ref().map(|m| {
        LmCleaner::new(m.clone(), ledger.clone(), 10_000, 2, 2048, 0.2)
    });
    let extractor = model
        .as_ref()
        .map(|m| MetadataExtractor::new(m.clone(), ledger.clone(), 2000, 0.2));

    let writer = IndexWriter::new(
        store.clone(),
        embedder.clone(),
        ledger.clone(),
        100,
        3,
        64,
    );
    let pipeline = IngestPipeline::new(
        ontology.clone(),
        cleaner,
        extractor,
        writer,
        ledger.clone(),
        ChunkingLimits::default(),
    )
    .unwrap();

    let planner = QueryPlanner::new(
        ontology,
        model,
        ledger.clone(),
        retrieval.clone(),
        std::time::Duration::from_secs(10),
    )
    .unwrap();
    let engine = QueryEngine::new(planner, embedder, store.clone(), retrieval, ledger.clone());

    Harness {
        pipeline,
        engine,
        store,
        ledger,
    }
}

fn paragraph(sentence: &str, repeats: usize) -> String {
    sentence.repeat(repeats).trim().to_string()
}

fn doc(doc_id: &str, source_name: &str, raw_text: String) -> DocumentInput {
    DocumentInput {
        doc_id: doc_id.to_string(),
        source_name: source_name.to_string(),
        raw_text,
    }
}

// ---- S1: type repair end to end ----

#[tokio::test]
async fn test_type_repair_flows_into_metadata() {
    let extraction = json!({
        "content_type": "lecture",
        "difficulty": "intermediate",
        "primary_category": "cognitive_functions",
        "types_discussed": ["ISFP", "INTJ"],
        "functions_covered": ["Te", "Ni"],
        "relationship_type": "none",
        "quadra": "none",
        "temple": "none",
        "teaching_focus": "Hero function contrast.",
        "target_audience": "intermediate",
        "tag_confidence": 0.8,
    });
    let h = harness(Some(Arc::new(MockModel::with_extraction(extraction))), 0.0);

    let input = doc(
        "S1",
        "hero functions.txt",
        "the is FP uses tea hero while the in TJ uses knee hero".to_string(),
    );
    let report = h
        .pipeline
        .ingest(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.chunks_count, 1);
    assert!(report.degraded_stages.is_empty(), "{:?}", report.degraded_stages);
    assert!(report
        .metadata_record
        .types_discussed
        .iter()
        .any(|t| t == "ISFP"));
    assert!(report
        .metadata_record
        .types_discussed
        .iter()
        .any(|t| t == "INTJ"));
    assert!(report.metadata_record.functions_covered.contains(&"Te".to_string()));
    assert!(report.metadata_record.functions_covered.contains(&"Ni".to_string()));

    // The stored chunk text is the repaired text.
    let matches = h.store.query(&vec![0.0; DIMS], 1, None).await.unwrap();
    assert_eq!(
        matches[0].payload["text"],
        "the ISFP uses Te hero while the INTJ uses Ni hero"
    );
    assert_eq!(matches[0].payload["optimized"], true);
}

// ---- S2: atomic reingest ----

#[tokio::test]
async fn test_reingest_replaces_generation() {
    let h = harness(None, 0.0);
    let cancel = CancellationToken::new();
    let para = paragraph("Alpha beta gamma delta epsilon zeta. ", 80); // ~2880 chars

    let text_a = vec![para.clone(); 5].join("\n\n");
    let report = h
        .pipeline
        .ingest(&doc("D1", "a.txt", text_a), &cancel)
        .await
        .unwrap();
    assert_eq!(report.chunks_count, 5);
    assert_eq!(h.store.count_for_doc("D1").await.unwrap(), 5);

    let text_b = vec![para; 3].join("\n\n");
    let report = h
        .pipeline
        .ingest(&doc("D1", "b.txt", text_b), &cancel)
        .await
        .unwrap();
    assert_eq!(report.chunks_count, 3);
    assert_eq!(h.store.count_for_doc("D1").await.unwrap(), 3);

    // Every surviving vector belongs to generation B.
    let matches = h.store.query(&vec![0.0; DIMS], 50, None).await.unwrap();
    assert_eq!(matches.len(), 3);
    for m in &matches {
        assert_eq!(m.payload["source_name"], "b.txt");
    }
}

// ---- S3: season filter ----

#[tokio::test]
async fn test_season_filter_constrains_citations() {
    let extraction_22 = json!({
        "primary_category": "relationships",
        "types_discussed": ["ENFP", "ISTJ"],
        "relationship_type": "pedagogue_pair",
        "tag_confidence": 0.9,
    });
    let h = harness(
        Some(Arc::new(MockModel::with_extraction(extraction_22))),
        0.0,
    );
    let cancel = CancellationToken::new();

    let body = paragraph(
        "The ENFP pedagogue pair lecture covers season twenty two dynamics. ",
        40,
    );
    h.pipeline
        .ingest(&doc("S22", "[22] ENFP pedagogue pair.txt", body.clone()), &cancel)
        .await
        .unwrap();
    h.pipeline
        .ingest(&doc("S21", "[21] ENFP pedagogue pair.txt", body), &cancel)
        .await
        .unwrap();

    let request = QueryRequest::new("What does Season 22 say about ENFP pedagogue pair?");
    let response = h.engine.query(&request, &cancel).await;

    assert_eq!(response.plan.intent, Intent::Compatibility);
    assert!(response.plan.filter_used.is_some());
    assert!(response.plan.variant_count >= 2, "expansion variants expected");
    assert!(!response.citations.is_empty());
    for citation in &response.citations {
        assert_eq!(citation.season.as_deref(), Some("22"));
    }
    for chunk in &response.context_chunks {
        assert_eq!(chunk.doc_id, "S22");
    }
}

// ---- S4: low confidence suppresses smart filters ----

#[tokio::test]
async fn test_vague_question_gets_unfiltered_top_k() {
    let h = harness(None, 0.0);
    let cancel = CancellationToken::new();
    h.pipeline
        .ingest(
            &doc(
                "D1",
                "misc.txt",
                paragraph("Interesting observations about many things. ", 30),
            ),
            &cancel,
        )
        .await
        .unwrap();

    let response = h
        .engine
        .query(&QueryRequest::new("Tell me something interesting."), &cancel)
        .await;

    assert!(response.plan.filter_used.is_none());
    assert_eq!(response.plan.k_used, 50);
    assert!(response.diagnostic.is_none());
    assert!(!response.context_chunks.is_empty());
}

// ---- S5: cleaner degradation ----

#[tokio::test(start_paused = true)]
async fn test_cleaner_window_failure_degrades_not_fails() {
    let mut model = MockModel::with_extraction(json!({ "tag_confidence": 0.5 }));
    model.fail_marker = Some("WINDOWTWO".to_string());
    let h = harness(Some(Arc::new(model)), 0.0);

    // Two cleaner windows: the second carries the failure marker.
    let window_a = paragraph("Ordinary lecture sentences fill the first window. ", 120); // ~6000
    let window_b = paragraph("WINDOWTWO content repeats through the second window. ", 115); // ~6000
    let input = doc("D5", "[9] degraded.txt", format!("{window_a}\n\n{window_b}"));

    let report = h
        .pipeline
        .ingest(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.degraded_stages, vec!["cleaner:window#2".to_string()]);
    assert_eq!(report.outcome(), "ok_degraded(cleaner:window#2)");
    assert!(report.chunks_count >= 2);
    assert!(h.ledger.degraded_stages() >= 1);

    // Chunk bounds hold over the mixed cleaned/normalized text.
    let matches = h.store.query(&vec![0.0; DIMS], 50, None).await.unwrap();
    for m in &matches {
        let len = m.payload["text"].as_str().unwrap().chars().count();
        assert!((500..=3000).contains(&len), "chunk length {len} out of bounds");
    }
}

// ---- Extractor failure degrades to the empty record ----

struct GarbageModel;

#[async_trait]
impl TextModel for GarbageModel {
    fn name(&self) -> &str {
        "garbage"
    }
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> lectern::error::Result<String> {
        if prompt.contains("Condense the text") {
            let window = prompt.split_once("\n\n").map(|(_, w)| w).unwrap_or(prompt);
            return Ok(window.to_string());
        }
        Ok("I would rather chat about the weather.".to_string())
    }
}

#[tokio::test]
async fn test_extractor_failure_yields_empty_record() {
    let h = harness(Some(Arc::new(GarbageModel)), 0.0);
    let report = h
        .pipeline
        .ingest(
            &doc(
                "D6",
                "[3] lecture.txt",
                paragraph("Some recoverable lecture content goes here. ", 30),
            ),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.degraded_stages.contains(&"extractor".to_string()));
    assert_eq!(report.metadata_record.tag_confidence, 0.0);
    // Validator defaults still fill the envelope.
    assert_eq!(report.metadata_record.difficulty, "intermediate");
    assert_eq!(report.metadata_record.relationship_type, "none");
    // Season still parsed from the source name.
    assert_eq!(report.season.as_deref(), Some("3"));
}

// ---- Cancellation ----

#[tokio::test]
async fn test_cancelled_ingest_reports_cancellation() {
    let h = harness(None, 0.0);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .pipeline
        .ingest(
            &doc("D7", "x.txt", paragraph("Words repeat in this text. ", 40)),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LecternError::Cancelled));
    assert_eq!(h.store.count_for_doc("D7").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_query_discards_results() {
    let h = harness(None, 0.0);
    let cancel = CancellationToken::new();
    h.pipeline
        .ingest(
            &doc("D8", "x.txt", paragraph("Queryable content lives here. ", 40)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    cancel.cancel();
    let response = h
        .engine
        .query(&QueryRequest::new("anything at all"), &cancel)
        .await;
    assert!(response.context_chunks.is_empty());
    assert_eq!(response.diagnostic.as_deref(), Some("cancelled"));
}

// ---- Dry run ----

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = harness(None, 0.0);
    let report = h
        .pipeline
        .dry_run(
            &doc("D9", "[4] preview.txt", paragraph("Previewable content here. ", 60)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(report.chunks_count >= 1);
    assert_eq!(report.season.as_deref(), Some("4"));
    assert_eq!(h.store.count_for_doc("D9").await.unwrap(), 0);
}

// ---- Query cost attribution ----

#[tokio::test]
async fn test_costs_attributed_per_stage() {
    let extraction = json!({ "tag_confidence": 0.7 });
    let h = harness(Some(Arc::new(MockModel::with_extraction(extraction))), 0.0);
    h.pipeline
        .ingest(
            &doc("D10", "cost.txt", paragraph("Costed content sentence. ", 60)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let snapshot = h.ledger.snapshot();
    assert!(snapshot.by_stage.contains_key("cleaner"));
    assert!(snapshot.by_stage.contains_key("extractor"));
    assert!(snapshot.by_stage.contains_key("embedding"));
    assert!(snapshot.total_tokens() > 0);
}
