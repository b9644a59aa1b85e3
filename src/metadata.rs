//! The 18-field tagged metadata record attached to every chunk.
//!
//! The record is declared inclusively: all eighteen keys are always present
//! in the envelope, the validator coerces untrusted extractor output into
//! it, and unknown enumeration items inside arrays are filtered rather than
//! failing the document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Number of declared metadata fields. The validator and the persisted
/// payload always carry exactly this envelope.
pub const METADATA_FIELD_COUNT: usize = 18;

/// Structured description of one document, duplicated per chunk so the
/// vector store can push filters down to individual chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Kind of source material (ontology `content.types`).
    pub content_type: String,
    /// `beginner | intermediate | advanced`.
    pub difficulty: String,
    /// Dominant topic (ontology `content.categories`).
    pub primary_category: String,
    /// Canonical MBTI types covered.
    pub types_discussed: Vec<String>,
    /// Canonical function codes covered.
    pub functions_covered: Vec<String>,
    /// `{function}_{position}` pairs, e.g. `Ni_hero`.
    pub function_positions: Vec<String>,
    /// One of the closed relationship kinds, or `none`.
    pub relationship_type: String,
    /// `alpha | beta | gamma | none`, lowercased.
    pub quadra: String,
    /// `heart | mind | soul | none`, lowercased.
    pub temple: String,
    /// Development codes from the ontology set.
    pub octagram_states: Vec<String>,
    pub pair_dynamics: Vec<String>,
    pub archetypes: Vec<String>,
    pub interaction_style_details: Vec<String>,
    /// At most ten items.
    pub key_concepts: Vec<String>,
    pub teaching_focus: String,
    pub prerequisite_knowledge: Vec<String>,
    /// `beginner | intermediate | advanced | expert`.
    pub target_audience: String,
    /// Extractor self-assessment, clamped to `[0.0, 1.0]`.
    pub tag_confidence: f32,
}

impl MetadataRecord {
    /// The all-empty record emitted when extraction fails outright. Scalar
    /// enums are left empty here; the validator fills in declared defaults.
    pub fn empty() -> Self {
        Self {
            content_type: String::new(),
            difficulty: String::new(),
            primary_category: String::new(),
            types_discussed: Vec::new(),
            functions_covered: Vec::new(),
            function_positions: Vec::new(),
            relationship_type: String::new(),
            quadra: String::new(),
            temple: String::new(),
            octagram_states: Vec::new(),
            pair_dynamics: Vec::new(),
            archetypes: Vec::new(),
            interaction_style_details: Vec::new(),
            key_concepts: Vec::new(),
            teaching_focus: String::new(),
            prerequisite_knowledge: Vec::new(),
            target_audience: String::new(),
            tag_confidence: 0.0,
        }
    }

    /// Array-valued fields that get `|`-joined string twins in the stored
    /// payload, for stores without native array containment.
    pub fn joined_array_fields() -> &'static [&'static str] {
        &["types_discussed", "functions_covered", "key_concepts"]
    }
}

static SEASON_EPISODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)(?:\.(\d+))?\]").expect("season pattern compiles"));

/// Parse season and episode from a source name using the bracket
/// convention: `[22]` is season 22, `[22.3]` is season 22 episode 3.
/// Both are kept as strings; season comparisons are string equality.
pub fn parse_season_episode(source_name: &str) -> (Option<String>, Option<String>) {
    match SEASON_EPISODE_RE.captures(source_name) {
        Some(caps) => {
            let season = caps.get(1).map(|m| m.as_str().to_string());
            let episode = caps.get(2).map(|m| m.as_str().to_string());
            (season, episode)
        }
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_has_zero_confidence() {
        let record = MetadataRecord::empty();
        assert_eq!(record.tag_confidence, 0.0);
        assert!(record.types_discussed.is_empty());
    }

    #[test]
    fn test_envelope_has_all_fields() {
        let value = serde_json::to_value(MetadataRecord::empty()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), METADATA_FIELD_COUNT);
        for key in [
            "content_type",
            "difficulty",
            "primary_category",
            "types_discussed",
            "functions_covered",
            "function_positions",
            "relationship_type",
            "quadra",
            "temple",
            "octagram_states",
            "pair_dynamics",
            "archetypes",
            "interaction_style_details",
            "key_concepts",
            "teaching_focus",
            "prerequisite_knowledge",
            "target_audience",
            "tag_confidence",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_parse_season_only() {
        let (season, episode) = parse_season_episode("[22] Season 22 Lecture 4 - ENFP.txt");
        assert_eq!(season.as_deref(), Some("22"));
        assert_eq!(episode, None);
    }

    #[test]
    fn test_parse_season_and_episode() {
        let (season, episode) = parse_season_episode("InnerWork [18.5] shadow integration.pdf");
        assert_eq!(season.as_deref(), Some("18"));
        assert_eq!(episode.as_deref(), Some("5"));
    }

    #[test]
    fn test_parse_absent() {
        let (season, episode) = parse_season_episode("intro lecture.txt");
        assert_eq!(season, None);
        assert_eq!(episode, None);
    }
}
