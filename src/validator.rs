//! Metadata validation: coercing untrusted extractor output into the
//! declared 18-field record.
//!
//! The envelope is inclusive: every declared field passes through when
//! conformant, unknown items inside enumerated arrays are dropped with a
//! warning, scalar enums outside the ontology are replaced with their
//! declared default, and the output always contains all eighteen keys.
//! Validation never fails a document.

use serde_json::Value;

use crate::metadata::{parse_season_episode, MetadataRecord};
use crate::observe::CostLedger;
use crate::ontology::{
    ReferenceOntology, DEFAULT_AUDIENCE, DEFAULT_CATEGORY, DEFAULT_CONTENT_TYPE,
    DEFAULT_DIFFICULTY, NONE_VALUE,
};

/// Caps for free-text fields. Model output beyond these is truncated.
const MAX_FREE_ITEMS: usize = 16;
const MAX_ITEM_CHARS: usize = 160;
const MAX_KEY_CONCEPTS: usize = 10;
const MAX_PREREQUISITES: usize = 10;
const MAX_FOCUS_CHARS: usize = 500;

/// A coerced record plus everything the orchestrator wants to know about
/// what was repaired along the way.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub record: MetadataRecord,
    pub season: Option<String>,
    pub episode: Option<String>,
    /// Human-readable notes, one per dropped or defaulted value.
    pub warnings: Vec<String>,
}

/// Coerce a raw extraction against the ontology.
pub fn validate(
    raw: &Value,
    source_name: &str,
    ontology: &ReferenceOntology,
    ledger: &CostLedger,
) -> ValidationOutcome {
    let mut warnings = Vec::new();

    let record = MetadataRecord {
        content_type: scalar_enum(
            raw,
            "content_type",
            DEFAULT_CONTENT_TYPE,
            |v| ontology.is_content_type(v).then(|| v.to_ascii_lowercase()),
            &mut warnings,
        ),
        difficulty: scalar_enum(
            raw,
            "difficulty",
            DEFAULT_DIFFICULTY,
            |v| ontology.is_difficulty(v).then(|| v.to_ascii_lowercase()),
            &mut warnings,
        ),
        primary_category: scalar_enum(
            raw,
            "primary_category",
            DEFAULT_CATEGORY,
            |v| ontology.is_category(v).then(|| v.to_ascii_lowercase()),
            &mut warnings,
        ),
        types_discussed: enum_array(
            raw,
            "types_discussed",
            |v| ontology.canonical_type(v).map(str::to_string),
            &mut warnings,
        ),
        functions_covered: enum_array(
            raw,
            "functions_covered",
            |v| ontology.canonical_function(v).map(str::to_string),
            &mut warnings,
        ),
        function_positions: enum_array(
            raw,
            "function_positions",
            |v| canonical_position(v, ontology),
            &mut warnings,
        ),
        relationship_type: scalar_enum(
            raw,
            "relationship_type",
            NONE_VALUE,
            |v| ontology.relationship_for_keyword(v).map(str::to_string),
            &mut warnings,
        ),
        quadra: scalar_enum(
            raw,
            "quadra",
            NONE_VALUE,
            |v| ontology.canonical_quadra(v).map(str::to_string),
            &mut warnings,
        ),
        temple: scalar_enum(
            raw,
            "temple",
            NONE_VALUE,
            |v| ontology.canonical_temple(v).map(str::to_string),
            &mut warnings,
        ),
        octagram_states: enum_array(
            raw,
            "octagram_states",
            |v| ontology.canonical_development_code(v).map(str::to_string),
            &mut warnings,
        ),
        pair_dynamics: free_array(raw, "pair_dynamics", MAX_FREE_ITEMS),
        archetypes: free_array(raw, "archetypes", MAX_FREE_ITEMS),
        interaction_style_details: free_array(raw, "interaction_style_details", MAX_FREE_ITEMS),
        key_concepts: free_array(raw, "key_concepts", MAX_KEY_CONCEPTS),
        teaching_focus: bounded_string(raw, "teaching_focus", MAX_FOCUS_CHARS),
        prerequisite_knowledge: free_array(raw, "prerequisite_knowledge", MAX_PREREQUISITES),
        target_audience: scalar_enum(
            raw,
            "target_audience",
            DEFAULT_AUDIENCE,
            |v| ontology.is_audience(v).then(|| v.to_ascii_lowercase()),
            &mut warnings,
        ),
        tag_confidence: confidence(raw),
    };

    // Season and episode come from the extractor when supplied, otherwise
    // from the bracket convention in the source name.
    let supplied_season = string_field(raw, "season");
    let supplied_episode = string_field(raw, "episode");
    let (parsed_season, parsed_episode) = parse_season_episode(source_name);
    let season = supplied_season.or(parsed_season);
    let episode = supplied_episode.or(parsed_episode);

    ledger.add_warnings(warnings.len() as u64);
    ValidationOutcome {
        record,
        season,
        episode,
        warnings,
    }
}

fn string_field(raw: &Value, field: &str) -> Option<String> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce a scalar enum field: canonical match, otherwise the declared
/// default with a warning for non-empty unknowns.
fn scalar_enum(
    raw: &Value,
    field: &str,
    default: &str,
    canonicalize: impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<String>,
) -> String {
    match string_field(raw, field) {
        Some(value) => match canonicalize(&value) {
            Some(canonical) => canonical,
            None => {
                warnings.push(format!("{field}: unknown value {value:?}, using {default:?}"));
                default.to_string()
            }
        },
        None => default.to_string(),
    }
}

/// Coerce an enumerated array: canonical items kept in order (deduplicated),
/// unknown items dropped with a warning. A bare string is accepted as a
/// single-item array.
fn enum_array(
    raw: &Value,
    field: &str,
    canonicalize: impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in iter_items(raw, field) {
        match canonicalize(&item) {
            Some(canonical) => {
                if !out.contains(&canonical) {
                    out.push(canonical);
                }
            }
            None => warnings.push(format!("{field}: dropped unknown item {item:?}")),
        }
    }
    out
}

/// Pass through a free-text array, bounded in item count and item length.
fn free_array(raw: &Value, field: &str, max_items: usize) -> Vec<String> {
    iter_items(raw, field)
        .into_iter()
        .map(|item| truncate_chars(&item, MAX_ITEM_CHARS))
        .filter(|item| !item.is_empty())
        .take(max_items)
        .collect()
}

fn bounded_string(raw: &Value, field: &str, max_chars: usize) -> String {
    string_field(raw, field)
        .map(|s| truncate_chars(&s, max_chars))
        .unwrap_or_default()
}

fn iter_items(raw: &Value, field: &str) -> Vec<String> {
    match raw.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.trim().to_string();
    }
    s.chars().take(max_chars).collect::<String>().trim().to_string()
}

fn confidence(raw: &Value) -> f32 {
    let value = match raw.get("tag_confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    value.clamp(0.0, 1.0) as f32
}

/// Canonicalize a `{function}_{position}` pair, e.g. `ni_Hero` → `Ni_hero`.
fn canonical_position(candidate: &str, ontology: &ReferenceOntology) -> Option<String> {
    let (func, position) = candidate.trim().split_once('_')?;
    let func = ontology.canonical_function(func)?;
    if !ontology.is_position(position) {
        return None;
    }
    Some(format!("{func}_{}", position.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::test_ontology;
    use serde_json::json;

    fn run(raw: Value, source: &str) -> ValidationOutcome {
        let ontology = test_ontology();
        let ledger = CostLedger::new();
        validate(&raw, source, &ontology, &ledger)
    }

    #[test]
    fn test_conformant_record_passes_through() {
        let raw = json!({
            "content_type": "lecture",
            "difficulty": "advanced",
            "primary_category": "relationships",
            "types_discussed": ["ENFP", "ISTJ"],
            "functions_covered": ["Ne", "Si"],
            "function_positions": ["Ne_hero", "Si_inferior"],
            "relationship_type": "golden_pair",
            "quadra": "alpha",
            "temple": "heart",
            "octagram_states": ["UDSF"],
            "pair_dynamics": ["push and pull"],
            "archetypes": ["hero"],
            "interaction_style_details": ["direct"],
            "key_concepts": ["compatibility"],
            "teaching_focus": "Golden pair dynamics between ENFP and ISTJ.",
            "prerequisite_knowledge": ["four sides model"],
            "target_audience": "advanced",
            "tag_confidence": 0.92,
        });
        let outcome = run(raw, "[22] golden pairs.txt");
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.record.types_discussed, vec!["ENFP", "ISTJ"]);
        assert_eq!(outcome.record.relationship_type, "golden_pair");
        assert_eq!(outcome.record.tag_confidence, 0.92);
        assert_eq!(outcome.season.as_deref(), Some("22"));
    }

    #[test]
    fn test_unknown_array_items_dropped_with_warning() {
        let raw = json!({
            "types_discussed": ["ENFP", "XYZQ", "in TJ"],
            "functions_covered": ["Ne", "Qi"],
        });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.types_discussed, vec!["ENFP", "INTJ"]);
        assert_eq!(outcome.record.functions_covered, vec!["Ne"]);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_scalar_enums_default_on_unknown() {
        let raw = json!({
            "difficulty": "impossible",
            "quadra": "Delta",
            "relationship_type": "situationship",
        });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.difficulty, "intermediate");
        assert_eq!(outcome.record.quadra, "none");
        assert_eq!(outcome.record.relationship_type, "none");
        assert_eq!(outcome.warnings.len(), 3);
    }

    #[test]
    fn test_quadra_and_temple_lowercased() {
        let raw = json!({ "quadra": "Beta", "temple": "SOUL" });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.quadra, "beta");
        assert_eq!(outcome.record.temple, "soul");
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_relationship_keyword_mapped() {
        let raw = json!({ "relationship_type": "pedagogue" });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.relationship_type, "pedagogue_pair");
    }

    #[test]
    fn test_function_positions_shape() {
        let raw = json!({
            "function_positions": ["ni_hero", "Te_Parent", "hero_Ni", "Se_captain"],
        });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.function_positions, vec!["Ni_hero", "Te_parent"]);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_key_concepts_capped_at_ten() {
        let concepts: Vec<String> = (0..15).map(|i| format!("concept {i}")).collect();
        let raw = json!({ "key_concepts": concepts });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.key_concepts.len(), 10);
    }

    #[test]
    fn test_confidence_clamped() {
        let outcome = run(json!({ "tag_confidence": 7.5 }), "doc.txt");
        assert_eq!(outcome.record.tag_confidence, 1.0);
        let outcome = run(json!({ "tag_confidence": -0.3 }), "doc.txt");
        assert_eq!(outcome.record.tag_confidence, 0.0);
        let outcome = run(json!({ "tag_confidence": "0.4" }), "doc.txt");
        assert_eq!(outcome.record.tag_confidence, 0.4);
    }

    #[test]
    fn test_empty_extraction_gets_defaults() {
        let outcome = run(json!({}), "[7] basics.txt");
        assert_eq!(outcome.record.content_type, "lecture");
        assert_eq!(outcome.record.difficulty, "intermediate");
        assert_eq!(outcome.record.primary_category, "general_typology");
        assert_eq!(outcome.record.relationship_type, "none");
        assert_eq!(outcome.record.target_audience, "intermediate");
        assert_eq!(outcome.record.tag_confidence, 0.0);
        assert_eq!(outcome.season.as_deref(), Some("7"));
        // Defaults are not warnings; the extractor simply said nothing.
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_extractor_supplied_season_wins() {
        let raw = json!({ "season": "31", "episode": 4 });
        let outcome = run(raw, "[22] lecture.txt");
        assert_eq!(outcome.season.as_deref(), Some("31"));
        assert_eq!(outcome.episode.as_deref(), Some("4"));
    }

    #[test]
    fn test_scalar_accepted_as_single_item_array() {
        let raw = json!({ "types_discussed": "ESTP" });
        let outcome = run(raw, "doc.txt");
        assert_eq!(outcome.record.types_discussed, vec!["ESTP"]);
    }
}
