//! `lect` — operational CLI for the lectern knowledge engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lectern::cleaner::LmCleaner;
use lectern::config::{self, Config};
use lectern::embedding::create_embedder;
use lectern::extractor::MetadataExtractor;
use lectern::ingest::IngestPipeline;
use lectern::llm::{HttpTextModel, TextModel};
use lectern::models::{DocumentInput, ExplicitFilters, QueryRequest};
use lectern::observe::CostLedger;
use lectern::ontology::ReferenceOntology;
use lectern::planner::QueryPlanner;
use lectern::query::QueryEngine;
use lectern::store::memory::MemoryStore;
use lectern::store::sqlite::SqliteStore;
use lectern::store::VectorStore;
use lectern::writer::IndexWriter;

#[derive(Parser)]
#[command(
    name = "lect",
    about = "Lectern — a retrieval-augmented knowledge engine for typology lecture corpora",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite index schema
    Init,

    /// Ingest documents into the vector index
    Ingest {
        /// Plain-text files to ingest
        files: Vec<PathBuf>,

        /// Document id (single file only; defaults to the file stem)
        #[arg(long)]
        doc_id: Option<String>,

        /// Source name stored with every chunk (defaults to the file name)
        #[arg(long)]
        source_name: Option<String>,

        /// Run every stage except the index write
        #[arg(long)]
        dry_run: bool,
    },

    /// Query the indexed corpus
    Query {
        /// Natural-language question
        question: String,

        /// Restrict retrieval to one document
        #[arg(long)]
        doc_id: Option<String>,

        /// Restrict retrieval to chunks tagged with this key concept
        #[arg(long)]
        tag: Vec<String>,
    },

    /// Load and summarize the reference ontology
    Ontology,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await,
        Commands::Ingest {
            files,
            doc_id,
            source_name,
            dry_run,
        } => run_ingest(&cfg, files, doc_id, source_name, dry_run).await,
        Commands::Query {
            question,
            doc_id,
            tag,
        } => run_query(&cfg, &question, doc_id, tag).await,
        Commands::Ontology => run_ontology(&cfg),
    }
}

async fn run_init(cfg: &Config) -> Result<()> {
    if cfg.store.provider != "sqlite" {
        bail!("init applies to the sqlite store; store.provider is '{}'", cfg.store.provider);
    }
    let path = cfg.store.path.as_ref().expect("validated by load_config");
    let store = SqliteStore::connect(path).await?;
    store.migrate().await?;
    store.close().await;
    println!("Index initialized at {}", path.display());
    Ok(())
}

fn run_ontology(cfg: &Config) -> Result<()> {
    let ontology = ReferenceOntology::load(&cfg.ontology.path)?;
    println!("ontology: {}", cfg.ontology.path.display());
    println!("  types: {}", ontology.types().len());
    println!("  functions: {}", ontology.functions().len());
    println!("  positions: {}", ontology.positions().len());
    println!("  relationships: {}", ontology.relationships().len());
    println!("  categories: {}", ontology.categories().len());
    println!("  content types: {}", ontology.content_types().len());
    println!("  development codes: {}", ontology.development_codes().len());
    println!("ok");
    Ok(())
}

struct Components {
    ledger: Arc<CostLedger>,
    pipeline: IngestPipeline,
    engine: QueryEngine,
}

async fn build_components(cfg: &Config) -> Result<Components> {
    let ontology = Arc::new(ReferenceOntology::load(&cfg.ontology.path)?);
    let ledger = Arc::new(CostLedger::new());
    let embedder = create_embedder(&cfg.embedding)?;

    let store: Arc<dyn VectorStore> = match cfg.store.provider.as_str() {
        "sqlite" => {
            let path = cfg.store.path.as_ref().expect("validated by load_config");
            let store = SqliteStore::connect(path).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let model: Option<Arc<dyn TextModel>> = if cfg.models.is_enabled() {
        Some(Arc::new(HttpTextModel::new(&cfg.models)?))
    } else {
        None
    };

    let cleaner = model.as_ref().map(|m| {
        LmCleaner::new(
            m.clone(),
            ledger.clone(),
            cfg.models.window_chars,
            cfg.models.cleaner_retries,
            cfg.models.cleaner_max_tokens,
            cfg.models.temperature,
        )
    });
    let extractor = model.as_ref().map(|m| {
        MetadataExtractor::new(
            m.clone(),
            ledger.clone(),
            cfg.models.extractor_max_tokens,
            cfg.models.temperature,
        )
    });

    let writer = IndexWriter::new(
        store.clone(),
        embedder.clone(),
        ledger.clone(),
        cfg.store.upsert_batch,
        cfg.store.max_batch_retries,
        cfg.embedding.batch_size,
    );
    let pipeline = IngestPipeline::new(
        ontology.clone(),
        cleaner,
        extractor,
        writer,
        ledger.clone(),
        cfg.chunking.clone(),
    )?;

    let planner = QueryPlanner::new(
        ontology,
        model,
        ledger.clone(),
        cfg.retrieval.clone(),
        Duration::from_secs(cfg.models.planner_timeout_secs),
    )?;
    let engine = QueryEngine::new(
        planner,
        embedder,
        store.clone(),
        cfg.retrieval.clone(),
        ledger.clone(),
    );

    Ok(Components {
        ledger,
        pipeline,
        engine,
    })
}

async fn run_ingest(
    cfg: &Config,
    files: Vec<PathBuf>,
    doc_id: Option<String>,
    source_name: Option<String>,
    dry_run: bool,
) -> Result<()> {
    if files.is_empty() {
        bail!("nothing to ingest: pass one or more files");
    }
    if doc_id.is_some() && files.len() > 1 {
        bail!("--doc-id applies to a single file");
    }

    let components = build_components(cfg).await?;
    let cancel = CancellationToken::new();
    let mut failures = 0usize;

    for file in &files {
        let raw_text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        let stem = file
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());

        let input = DocumentInput {
            doc_id: doc_id.clone().unwrap_or(stem),
            source_name: source_name.clone().unwrap_or(file_name),
            raw_text,
        };

        let result = if dry_run {
            components.pipeline.dry_run(&input, &cancel).await
        } else {
            components.pipeline.ingest(&input, &cancel).await
        };

        match result {
            Ok(report) => {
                println!("ingest {}{}", input.doc_id, if dry_run { " (dry-run)" } else { "" });
                println!("  source: {}", input.source_name);
                println!("  chunks: {}", report.chunks_count);
                if let Some(season) = &report.season {
                    println!("  season: {season}");
                }
                println!("  category: {}", report.metadata_record.primary_category);
                println!("  types: {}", report.metadata_record.types_discussed.join(", "));
                println!("  tag confidence: {:.2}", report.metadata_record.tag_confidence);
                if !report.warnings.is_empty() {
                    println!("  warnings: {}", report.warnings.len());
                }
                for (stage, cost) in &report.cost.by_stage {
                    println!("  cost[{stage}]: {} calls, ~{} tokens", cost.calls, cost.estimated_tokens);
                }
                println!("  outcome: {}", report.outcome());
            }
            Err(e) => {
                failures += 1;
                eprintln!("ingest {}: failed({e})", input.doc_id);
            }
        }
    }

    println!("warnings total: {}", components.ledger.warnings());
    if failures > 0 {
        bail!("{failures} of {} documents failed", files.len());
    }
    Ok(())
}

async fn run_query(
    cfg: &Config,
    question: &str,
    doc_id: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let components = build_components(cfg).await?;
    let cancel = CancellationToken::new();

    let explicit = if doc_id.is_some() || !tags.is_empty() {
        Some(ExplicitFilters { doc_id, tags })
    } else {
        None
    };
    let request = QueryRequest {
        question: question.to_string(),
        explicit_filters: explicit,
    };

    let response = components.engine.query(&request, &cancel).await;

    println!("plan");
    println!("  intent: {}", response.plan.intent.as_str());
    println!("  k: {}", response.plan.k_used);
    println!("  variants: {}", response.plan.variant_count);
    if let Some(filter) = &response.plan.filter_used {
        println!("  filter: {filter}");
    }
    if let Some(diagnostic) = &response.diagnostic {
        println!("  diagnostic: {diagnostic}");
    }
    println!(
        "confidence: {} {}",
        response.confidence.as_str(),
        response.confidence.stars()
    );
    println!();

    if response.context_chunks.is_empty() {
        println!("No matching context.");
        return Ok(());
    }

    for (i, chunk) in response.context_chunks.iter().enumerate() {
        let excerpt: String = chunk.text.chars().take(160).collect();
        println!("{}. {} #{}", i + 1, chunk.source_name, chunk.chunk_index);
        println!("   {}", excerpt.replace('\n', " "));
    }

    println!();
    println!("citations");
    for citation in &response.citations {
        println!(
            "  {} (season {}, chunk {}, similarity {:.2})",
            citation.source_name,
            citation.season.as_deref().unwrap_or("-"),
            citation.chunk_index,
            citation.similarity
        );
    }
    Ok(())
}
