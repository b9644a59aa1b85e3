//! Configuration parsing and validation.
//!
//! Lectern is configured via a TOML file (default: `config/lectern.toml`)
//! defining the ontology location, text-model and embedding providers,
//! vector-store backend, chunking bounds, and retrieval tuning. API keys are
//! read from the environment, never from the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LecternError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ontology: OntologyConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingLimits,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OntologyConfig {
    pub path: PathBuf,
}

/// Text-model settings shared by the cleaner, extractor, and planner.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    /// `"openai"` for any OpenAI-compatible endpoint, `"disabled"` to run
    /// the pipeline on its deterministic fallbacks only.
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Output budget for the cleaner, per window.
    #[serde(default = "default_cleaner_max_tokens")]
    pub cleaner_max_tokens: u32,
    /// Output budget for the extractor; must fit all 18 fields.
    #[serde(default = "default_extractor_max_tokens")]
    pub extractor_max_tokens: u32,
    /// Character window for cleaner calls.
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_soft_timeout")]
    pub soft_timeout_secs: u64,
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_secs: u64,
    /// Planner-side calls degrade fast; they get their own timeout.
    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_secs: u64,
    #[serde(default = "default_model_retries")]
    pub max_retries: u32,
    /// Cleaner windows retry less aggressively before falling back.
    #[serde(default = "default_cleaner_retries")]
    pub cleaner_retries: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            api_base: default_api_base(),
            model: default_chat_model(),
            temperature: default_temperature(),
            cleaner_max_tokens: default_cleaner_max_tokens(),
            extractor_max_tokens: default_extractor_max_tokens(),
            window_chars: default_window_chars(),
            soft_timeout_secs: default_soft_timeout(),
            hard_timeout_secs: default_hard_timeout(),
            planner_timeout_secs: default_planner_timeout(),
            max_retries: default_model_retries(),
            cleaner_retries: default_cleaner_retries(),
        }
    }
}

impl ModelsConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` for the HTTP provider, `"hash"` for the deterministic
    /// lexical fallback.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_embed_batch(),
            max_retries: default_embed_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"memory"` or `"sqlite"`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Vectors per upsert batch.
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch: usize,
    /// Retries per upsert batch before the replace is abandoned.
    #[serde(default = "default_batch_retries")]
    pub max_batch_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            path: None,
            upsert_batch: default_upsert_batch(),
            max_batch_retries: default_batch_retries(),
        }
    }
}

/// Hard chunk-size bounds, in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingLimits {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Documents longer than this must produce at least two chunks.
    #[serde(default = "default_multi_chunk_threshold")]
    pub multi_chunk_threshold: usize,
}

impl Default for ChunkingLimits {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
            multi_chunk_threshold: default_multi_chunk_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates below this raw similarity are dropped before boosting.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    /// Below this planner confidence, smart filters are suppressed.
    #[serde(default = "default_confidence_gate")]
    pub planner_confidence_gate: f32,
    #[serde(default = "default_final_results")]
    pub final_results: usize,
    #[serde(default = "default_citation_limit")]
    pub citation_limit: usize,
    /// Top-k for very specific queries (season, or type plus relationship).
    #[serde(default = "default_specific_k")]
    pub specific_k: usize,
    #[serde(default = "default_k")]
    pub default_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            planner_confidence_gate: default_confidence_gate(),
            final_results: default_final_results(),
            citation_limit: default_citation_limit(),
            specific_k: default_specific_k(),
            default_k: default_k(),
        }
    }
}

fn default_model_provider() -> String {
    "disabled".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_cleaner_max_tokens() -> u32 {
    2048
}
fn default_extractor_max_tokens() -> u32 {
    2000
}
fn default_window_chars() -> usize {
    10_000
}
fn default_soft_timeout() -> u64 {
    60
}
fn default_hard_timeout() -> u64 {
    120
}
fn default_planner_timeout() -> u64 {
    10
}
fn default_model_retries() -> u32 {
    3
}
fn default_cleaner_retries() -> u32 {
    2
}
fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    3072
}
fn default_embed_batch() -> usize {
    64
}
fn default_embed_retries() -> u32 {
    3
}
fn default_embed_timeout() -> u64 {
    30
}
fn default_store_provider() -> String {
    "memory".to_string()
}
fn default_upsert_batch() -> usize {
    100
}
fn default_batch_retries() -> u32 {
    3
}
fn default_min_chars() -> usize {
    500
}
fn default_max_chars() -> usize {
    3000
}
fn default_multi_chunk_threshold() -> usize {
    5000
}
fn default_similarity_floor() -> f32 {
    0.60
}
fn default_confidence_gate() -> f32 {
    0.6
}
fn default_final_results() -> usize {
    10
}
fn default_citation_limit() -> usize {
    5
}
fn default_specific_k() -> usize {
    30
}
fn default_k() -> usize {
    50
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LecternError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| LecternError::Config(format!("failed to parse config file: {e}")))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.min_chars == 0 || chunking.min_chars >= chunking.max_chars {
        return Err(LecternError::Config(
            "chunking.min_chars must be > 0 and < chunking.max_chars".into(),
        ));
    }
    if chunking.multi_chunk_threshold <= chunking.max_chars {
        return Err(LecternError::Config(
            "chunking.multi_chunk_threshold must exceed chunking.max_chars".into(),
        ));
    }

    let retrieval = &config.retrieval;
    if !(0.0..=1.0).contains(&retrieval.similarity_floor) {
        return Err(LecternError::Config(
            "retrieval.similarity_floor must be in [0.0, 1.0]".into(),
        ));
    }
    if !(0.0..=1.0).contains(&retrieval.planner_confidence_gate) {
        return Err(LecternError::Config(
            "retrieval.planner_confidence_gate must be in [0.0, 1.0]".into(),
        ));
    }
    if retrieval.final_results == 0 {
        return Err(LecternError::Config(
            "retrieval.final_results must be >= 1".into(),
        ));
    }

    match config.embedding.provider.as_str() {
        "openai" => {
            if config.embedding.dims == 0 {
                return Err(LecternError::Config(
                    "embedding.dims must be > 0 for the openai provider".into(),
                ));
            }
            if config.embedding.model.is_none() {
                return Err(LecternError::Config(
                    "embedding.model must be set for the openai provider".into(),
                ));
            }
        }
        "hash" => {
            if config.embedding.dims == 0 {
                return Err(LecternError::Config("embedding.dims must be > 0".into()));
            }
        }
        other => {
            return Err(LecternError::Config(format!(
                "unknown embedding provider '{other}'; use openai or hash"
            )))
        }
    }

    match config.models.provider.as_str() {
        "openai" | "disabled" => {}
        other => {
            return Err(LecternError::Config(format!(
                "unknown model provider '{other}'; use openai or disabled"
            )))
        }
    }

    match config.store.provider.as_str() {
        "memory" => {}
        "sqlite" => {
            if config.store.path.is_none() {
                return Err(LecternError::Config(
                    "store.path is required for the sqlite provider".into(),
                ));
            }
        }
        other => {
            return Err(LecternError::Config(format!(
                "unknown store provider '{other}'; use memory or sqlite"
            )))
        }
    }

    if config.store.upsert_batch == 0 || config.store.upsert_batch > 100 {
        return Err(LecternError::Config(
            "store.upsert_batch must be between 1 and 100".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let f = write_config("[ontology]\npath = \"config/ontology.toml\"\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.min_chars, 500);
        assert_eq!(config.chunking.max_chars, 3000);
        assert_eq!(config.retrieval.final_results, 10);
        assert_eq!(config.embedding.dims, 3072);
        assert_eq!(config.store.provider, "memory");
        assert!(!config.models.is_enabled());
    }

    #[test]
    fn test_rejects_inverted_chunk_bounds() {
        let f = write_config(
            "[ontology]\npath = \"o.toml\"\n[chunking]\nmin_chars = 4000\nmax_chars = 3000\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_sqlite_store_requires_path() {
        let f = write_config("[ontology]\npath = \"o.toml\"\n[store]\nprovider = \"sqlite\"\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_openai_embedding_requires_model() {
        let f = write_config(
            "[ontology]\npath = \"o.toml\"\n[embedding]\nprovider = \"openai\"\ndims = 3072\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_upsert_batch_capped() {
        let f = write_config(
            "[ontology]\npath = \"o.toml\"\n[store]\nupsert_batch = 500\n",
        );
        assert!(load_config(f.path()).is_err());
    }
}
