//! Reference ontology: the closed enumerations constraining all metadata.
//!
//! Loaded once at startup from a TOML document (see `config/ontology.toml`)
//! and shared read-only across the process. A missing or malformed file is a
//! fatal configuration error. All membership checks fold case where the
//! enumeration is defined case-insensitively (quadras, temples, types).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{LecternError, Result};

/// Default scalar values used by the validator when an extracted enum cannot
/// be coerced. All of these must be members of the loaded ontology.
pub const DEFAULT_CONTENT_TYPE: &str = "lecture";
pub const DEFAULT_DIFFICULTY: &str = "intermediate";
pub const DEFAULT_CATEGORY: &str = "general_typology";
pub const DEFAULT_AUDIENCE: &str = "intermediate";
pub const NONE_VALUE: &str = "none";

#[derive(Debug, Clone, Deserialize)]
struct TypesSection {
    canonical: Vec<String>,
    #[serde(default)]
    variants: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionsSection {
    canonical: Vec<String>,
    positions: Vec<String>,
    #[serde(default)]
    context_words: Vec<String>,
    #[serde(default)]
    variants: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RelationshipsSection {
    canonical: Vec<String>,
    #[serde(default)]
    keywords: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ValuesSection {
    values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentSection {
    types: Vec<String>,
    categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DevelopmentSection {
    codes: Vec<String>,
}

/// The authoritative enumerations for the corpus.
///
/// Immutable after load; all lookups borrow from the loaded document.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceOntology {
    types: TypesSection,
    functions: FunctionsSection,
    relationships: RelationshipsSection,
    quadras: ValuesSection,
    temples: ValuesSection,
    content: ContentSection,
    difficulties: ValuesSection,
    audiences: ValuesSection,
    development: DevelopmentSection,
    archetypes: ValuesSection,
}

impl ReferenceOntology {
    /// Load the ontology from a TOML file. Missing file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LecternError::Config(format!(
                "cannot read ontology file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse the ontology from TOML text and check structural invariants.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let ontology: ReferenceOntology = toml::from_str(content)
            .map_err(|e| LecternError::Config(format!("invalid ontology file: {e}")))?;
        ontology.check()?;
        Ok(ontology)
    }

    fn check(&self) -> Result<()> {
        if self.types.canonical.len() != 16 {
            return Err(LecternError::Config(format!(
                "ontology must enumerate 16 types, found {}",
                self.types.canonical.len()
            )));
        }
        if self.functions.canonical.len() != 8 {
            return Err(LecternError::Config(
                "ontology must enumerate 8 cognitive functions".into(),
            ));
        }
        for required in [
            ("relationships", &self.relationships.canonical),
            ("quadras", &self.quadras.values),
            ("temples", &self.temples.values),
        ] {
            if !required.1.iter().any(|v| v == NONE_VALUE) {
                return Err(LecternError::Config(format!(
                    "ontology {} must include \"{NONE_VALUE}\"",
                    required.0
                )));
            }
        }
        for (name, set, value) in [
            ("content.types", &self.content.types, DEFAULT_CONTENT_TYPE),
            ("content.categories", &self.content.categories, DEFAULT_CATEGORY),
            ("difficulties", &self.difficulties.values, DEFAULT_DIFFICULTY),
            ("audiences", &self.audiences.values, DEFAULT_AUDIENCE),
        ] {
            if !set.iter().any(|v| v == value) {
                return Err(LecternError::Config(format!(
                    "ontology {name} must include the default \"{value}\""
                )));
            }
        }
        for (canonical, _) in &self.types.variants {
            if !self.is_type(canonical) {
                return Err(LecternError::Config(format!(
                    "type variant key {canonical} is not a canonical type"
                )));
            }
        }
        for (canonical, _) in &self.functions.variants {
            if !self.is_function(canonical) {
                return Err(LecternError::Config(format!(
                    "function variant key {canonical} is not a canonical function"
                )));
            }
        }
        for (canonical, _) in &self.relationships.keywords {
            if !self.relationships.canonical.iter().any(|r| r == canonical) {
                return Err(LecternError::Config(format!(
                    "relationship keyword key {canonical} is unknown"
                )));
            }
        }
        Ok(())
    }

    // ---- types ----

    pub fn types(&self) -> &[String] {
        &self.types.canonical
    }

    /// Variant spellings per canonical type.
    pub fn type_variants(&self) -> &BTreeMap<String, Vec<String>> {
        &self.types.variants
    }

    pub fn is_type(&self, candidate: &str) -> bool {
        self.canonical_type(candidate).is_some()
    }

    /// Canonicalize a type spelling: case-insensitive match on canonical
    /// names, then on the variant tables.
    pub fn canonical_type(&self, candidate: &str) -> Option<&str> {
        let trimmed = candidate.trim();
        if let Some(t) = self
            .types
            .canonical
            .iter()
            .find(|t| t.eq_ignore_ascii_case(trimmed))
        {
            return Some(t);
        }
        for (canonical, variants) in &self.types.variants {
            if variants.iter().any(|v| v.eq_ignore_ascii_case(trimmed)) {
                return Some(canonical);
            }
        }
        None
    }

    // ---- functions ----

    pub fn functions(&self) -> &[String] {
        &self.functions.canonical
    }

    pub fn positions(&self) -> &[String] {
        &self.functions.positions
    }

    /// Neighbor words that license a homophone repair.
    pub fn function_context_words(&self) -> &[String] {
        &self.functions.context_words
    }

    /// Homophone variants per canonical function.
    pub fn function_variants(&self) -> &BTreeMap<String, Vec<String>> {
        &self.functions.variants
    }

    pub fn is_function(&self, candidate: &str) -> bool {
        self.canonical_function(candidate).is_some()
    }

    pub fn canonical_function(&self, candidate: &str) -> Option<&str> {
        let trimmed = candidate.trim();
        self.functions
            .canonical
            .iter()
            .find(|f| f.eq_ignore_ascii_case(trimmed))
            .map(|f| f.as_str())
    }

    pub fn is_position(&self, candidate: &str) -> bool {
        self.functions
            .positions
            .iter()
            .any(|p| p.eq_ignore_ascii_case(candidate.trim()))
    }

    // ---- relationships ----

    pub fn relationships(&self) -> &[String] {
        &self.relationships.canonical
    }

    pub fn is_relationship(&self, candidate: &str) -> bool {
        self.relationships
            .canonical
            .iter()
            .any(|r| r.eq_ignore_ascii_case(candidate.trim()))
    }

    /// Map a loose keyword ("golden") to its closed relationship kind.
    pub fn relationship_for_keyword(&self, word: &str) -> Option<&str> {
        let folded = word.trim().to_ascii_lowercase();
        for (canonical, keywords) in &self.relationships.keywords {
            if keywords.iter().any(|k| k.eq_ignore_ascii_case(&folded)) {
                return Some(canonical);
            }
        }
        // Accept the canonical spelling itself ("pedagogue_pair").
        self.relationships
            .canonical
            .iter()
            .find(|r| r.eq_ignore_ascii_case(&folded))
            .map(|r| r.as_str())
    }

    // ---- quadras / temples ----

    pub fn canonical_quadra(&self, candidate: &str) -> Option<&str> {
        let folded = candidate.trim().to_ascii_lowercase();
        self.quadras
            .values
            .iter()
            .find(|q| **q == folded)
            .map(|q| q.as_str())
    }

    pub fn canonical_temple(&self, candidate: &str) -> Option<&str> {
        let folded = candidate.trim().to_ascii_lowercase();
        self.temples
            .values
            .iter()
            .find(|t| **t == folded)
            .map(|t| t.as_str())
    }

    // ---- content / difficulty / audiences ----

    pub fn content_types(&self) -> &[String] {
        &self.content.types
    }

    pub fn categories(&self) -> &[String] {
        &self.content.categories
    }

    pub fn is_content_type(&self, candidate: &str) -> bool {
        self.content
            .types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(candidate.trim()))
    }

    pub fn is_category(&self, candidate: &str) -> bool {
        self.content
            .categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(candidate.trim()))
    }

    pub fn is_difficulty(&self, candidate: &str) -> bool {
        self.difficulties
            .values
            .iter()
            .any(|d| d.eq_ignore_ascii_case(candidate.trim()))
    }

    pub fn is_audience(&self, candidate: &str) -> bool {
        self.audiences
            .values
            .iter()
            .any(|a| a.eq_ignore_ascii_case(candidate.trim()))
    }

    // ---- development codes / archetypes ----

    pub fn development_codes(&self) -> &[String] {
        &self.development.codes
    }

    /// Canonicalize a development code: uppercase, separators removed.
    pub fn canonical_development_code(&self, candidate: &str) -> Option<&str> {
        let folded: String = candidate
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        self.development
            .codes
            .iter()
            .find(|c| **c == folded)
            .map(|c| c.as_str())
    }

    pub fn archetypes(&self) -> &[String] {
        &self.archetypes.values
    }
}

/// Test-only convenience: the ontology document shipped with the repo.
#[cfg(test)]
pub(crate) fn test_ontology() -> ReferenceOntology {
    ReferenceOntology::from_toml_str(include_str!("../config/ontology.toml"))
        .expect("bundled ontology parses")
}
