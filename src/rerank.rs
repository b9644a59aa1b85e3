//! Metadata-weighted re-ranking, confidence tiers, and citations.
//!
//! Candidates arriving from the vector store are gated on raw similarity,
//! boosted by independent metadata signals (capped product), deduplicated
//! across query variants by vector id, sorted, and truncated. The
//! confidence tier is a coarse advisory grade computed from the top two
//! boosted scores.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::RetrievalConfig;
use crate::models::Citation;
use crate::planner::{Intent, QueryPlan};
use crate::store::QueryMatch;

/// Cap on the product of all boost multipliers.
const MAX_BOOST: f32 = 3.0;

/// Advisory retrieval-quality grade from the top-2 boosted scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceTier {
    pub fn from_scores(top: Option<f32>, second: Option<f32>) -> Self {
        let t1 = top.unwrap_or(0.0);
        let t2 = second.unwrap_or(0.0);
        if t1 >= 0.90 && t2 >= 0.85 {
            Self::VeryHigh
        } else if t1 >= 0.80 && t2 >= 0.75 {
            Self::High
        } else if t1 >= 0.70 {
            Self::Medium
        } else if t1 >= 0.60 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryHigh => "very_high",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
        }
    }

    pub fn stars(&self) -> &'static str {
        match self {
            Self::VeryHigh => "⭐⭐⭐⭐⭐",
            Self::High => "⭐⭐⭐⭐",
            Self::Medium => "⭐⭐⭐",
            Self::Low => "⭐⭐",
            Self::VeryLow => "⭐",
        }
    }
}

/// One candidate surviving the re-rank.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub id: String,
    /// Raw cosine similarity from the store.
    pub similarity: f32,
    /// Similarity times the capped boost product.
    pub boosted: f32,
    pub payload: Value,
}

/// Re-ranked context set plus its advisory grading.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub chunks: Vec<RankedChunk>,
    pub citations: Vec<Citation>,
    pub confidence: ConfidenceTier,
}

/// Re-rank raw candidates against the question and plan.
pub fn rerank(
    matches: Vec<QueryMatch>,
    question: &str,
    plan: &QueryPlan,
    retrieval: &RetrievalConfig,
) -> RerankOutcome {
    let question_tokens = tokens_of(question);

    // Dedup across variants by vector id, keeping the best boosted score.
    let mut best: HashMap<String, RankedChunk> = HashMap::new();
    for m in matches {
        // The similarity gate applies to the raw score, before boosting.
        if m.score < retrieval.similarity_floor {
            continue;
        }
        let boosted = m.score * boost_for(&m.payload, &question_tokens, plan);
        let candidate = RankedChunk {
            id: m.id.clone(),
            similarity: m.score,
            boosted,
            payload: m.payload,
        };
        match best.get(&m.id) {
            Some(existing) if existing.boosted >= candidate.boosted => {}
            _ => {
                best.insert(m.id.clone(), candidate);
            }
        }
    }

    let mut chunks: Vec<RankedChunk> = best.into_values().collect();
    chunks.sort_by(|a, b| {
        b.boosted
            .partial_cmp(&a.boosted)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    chunks.truncate(retrieval.final_results);

    let confidence = ConfidenceTier::from_scores(
        chunks.first().map(|c| c.boosted),
        chunks.get(1).map(|c| c.boosted),
    );

    let citations = chunks
        .iter()
        .take(retrieval.citation_limit)
        .map(|chunk| Citation {
            source_name: string_field(&chunk.payload, "source_name"),
            season: chunk.payload.get("season").and_then(|v| v.as_str()).map(String::from),
            chunk_index: chunk.payload.get("chunk_index").and_then(|v| v.as_u64()).unwrap_or(0)
                as usize,
            similarity: chunk.similarity,
        })
        .collect();

    RerankOutcome {
        chunks,
        citations,
        confidence,
    }
}

/// Independent multiplicative boosts, capped at [`MAX_BOOST`].
fn boost_for(payload: &Value, question_tokens: &[String], plan: &QueryPlan) -> f32 {
    let mut boost = 1.0f32;

    // Two or more question tokens in the normalized source filename.
    let source_tokens = tokens_of(&string_field(payload, "source_name"));
    let hits = question_tokens
        .iter()
        .filter(|t| source_tokens.contains(t))
        .count();
    if hits >= 2 {
        boost *= 1.5;
    }

    if plan
        .entities
        .types
        .iter()
        .any(|t| array_contains(payload, "types_discussed", t))
    {
        boost *= 1.4;
    }

    if let Some(stored) = payload.get("relationship_type").and_then(|v| v.as_str()) {
        if plan.entities.relationships.iter().any(|r| r == stored) {
            boost *= 1.5;
        }
    }

    if let (Some(want), Some(stored)) = (
        plan.entities.season.as_deref(),
        payload.get("season").and_then(|v| v.as_str()),
    ) {
        if want == stored {
            boost *= 1.3;
        }
    }

    if plan
        .entities
        .functions
        .iter()
        .any(|f| array_contains(payload, "functions_covered", f))
    {
        boost *= 1.3;
    }

    if let Some(category) = payload.get("primary_category").and_then(|v| v.as_str()) {
        let multiplier = match (plan.intent, category) {
            (Intent::Compatibility, "relationships") => 1.3,
            (Intent::FourSides, "four_sides") => 1.3,
            (Intent::FunctionAnalysis, "cognitive_functions") => 1.2,
            _ => 1.0,
        };
        boost *= multiplier;
    }

    boost.min(MAX_BOOST)
}

fn array_contains(payload: &Value, field: &str, value: &str) -> bool {
    payload
        .get(field)
        .and_then(|v| v.as_array())
        .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(value)))
}

fn string_field(payload: &Value, field: &str) -> String {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Lowercased alphanumeric tokens of at least three characters.
fn tokens_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Entities;
    use serde_json::json;

    fn plan_with(entities: Entities, intent: Intent) -> QueryPlan {
        QueryPlan {
            intent,
            confidence: 1.0,
            entities,
            filter: None,
            variants: vec!["q".to_string()],
            recommended_k: 50,
            degraded: Vec::new(),
        }
    }

    fn candidate(id: &str, score: f32, payload: Value) -> QueryMatch {
        QueryMatch {
            id: id.to_string(),
            score,
            payload,
        }
    }

    fn retrieval() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[test]
    fn test_similarity_floor_applies_pre_boost() {
        let plan = plan_with(Entities::default(), Intent::General);
        let matches = vec![
            candidate("D1#0", 0.59, json!({ "source_name": "a", "chunk_index": 0 })),
            candidate("D1#1", 0.61, json!({ "source_name": "a", "chunk_index": 1 })),
        ];
        let outcome = rerank(matches, "anything", &plan, &retrieval());
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].id, "D1#1");
    }

    #[test]
    fn test_type_boost_applies() {
        let entities = Entities {
            types: vec!["ENFP".to_string()],
            ..Entities::default()
        };
        let plan = plan_with(entities, Intent::General);
        let matches = vec![
            candidate(
                "D1#0",
                0.7,
                json!({ "source_name": "a", "chunk_index": 0, "types_discussed": ["ENFP"] }),
            ),
            candidate(
                "D2#0",
                0.7,
                json!({ "source_name": "b", "chunk_index": 0, "types_discussed": ["ISTJ"] }),
            ),
        ];
        let outcome = rerank(matches, "anything", &plan, &retrieval());
        assert_eq!(outcome.chunks[0].id, "D1#0");
        assert!((outcome.chunks[0].boosted - 0.7 * 1.4).abs() < 1e-6);
        assert!((outcome.chunks[1].boosted - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_boost_product_capped() {
        let entities = Entities {
            types: vec!["ENFP".to_string()],
            functions: vec!["Ne".to_string()],
            relationships: vec!["golden_pair".to_string()],
            season: Some("22".to_string()),
            ..Entities::default()
        };
        let plan = plan_with(entities, Intent::Compatibility);
        // Every signal fires: 1.5 × 1.4 × 1.5 × 1.3 × 1.3 × 1.3 > 3.0.
        let matches = vec![candidate(
            "D1#0",
            0.9,
            json!({
                "source_name": "[22] golden pair ENFP lecture",
                "chunk_index": 0,
                "types_discussed": ["ENFP"],
                "functions_covered": ["Ne"],
                "relationship_type": "golden_pair",
                "season": "22",
                "primary_category": "relationships",
            }),
        )];
        let outcome = rerank(matches, "ENFP golden pair lecture", &plan, &retrieval());
        assert!((outcome.chunks[0].boosted - 0.9 * 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_dedup_keeps_max_boosted() {
        let plan = plan_with(Entities::default(), Intent::General);
        let matches = vec![
            candidate("D1#0", 0.7, json!({ "source_name": "a", "chunk_index": 0 })),
            candidate("D1#0", 0.8, json!({ "source_name": "a", "chunk_index": 0 })),
            candidate("D1#0", 0.75, json!({ "source_name": "a", "chunk_index": 0 })),
        ];
        let outcome = rerank(matches, "q", &plan, &retrieval());
        assert_eq!(outcome.chunks.len(), 1);
        assert!((outcome.chunks[0].boosted - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let plan = plan_with(Entities::default(), Intent::General);
        let matches: Vec<QueryMatch> = (0..20)
            .map(|i| {
                candidate(
                    &format!("D{i}#0"),
                    0.6 + (i as f32) * 0.015,
                    json!({ "source_name": "s", "chunk_index": 0 }),
                )
            })
            .collect();
        let outcome = rerank(matches, "q", &plan, &retrieval());
        assert_eq!(outcome.chunks.len(), 10);
        for pair in outcome.chunks.windows(2) {
            assert!(pair[0].boosted >= pair[1].boosted);
        }
    }

    #[test]
    fn test_citations_shape_and_dedup() {
        let plan = plan_with(Entities::default(), Intent::General);
        let matches: Vec<QueryMatch> = (0..8)
            .map(|i| {
                candidate(
                    &format!("D1#{i}"),
                    0.9 - (i as f32) * 0.02,
                    json!({
                        "doc_id": "D1",
                        "source_name": "[22] lecture.txt",
                        "season": "22",
                        "chunk_index": i,
                    }),
                )
            })
            .collect();
        let outcome = rerank(matches, "q", &plan, &retrieval());
        assert_eq!(outcome.citations.len(), 5);
        assert_eq!(outcome.citations[0].source_name, "[22] lecture.txt");
        assert_eq!(outcome.citations[0].season.as_deref(), Some("22"));
        // No two citations share a chunk index within the doc.
        let mut seen = std::collections::HashSet::new();
        for c in &outcome.citations {
            assert!(seen.insert(c.chunk_index));
        }
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(
            ConfidenceTier::from_scores(Some(0.95), Some(0.90)),
            ConfidenceTier::VeryHigh
        );
        assert_eq!(
            ConfidenceTier::from_scores(Some(0.85), Some(0.80)),
            ConfidenceTier::High
        );
        assert_eq!(
            ConfidenceTier::from_scores(Some(0.95), Some(0.50)),
            ConfidenceTier::Medium
        );
        assert_eq!(
            ConfidenceTier::from_scores(Some(0.65), None),
            ConfidenceTier::Low
        );
        assert_eq!(
            ConfidenceTier::from_scores(None, None),
            ConfidenceTier::VeryLow
        );
        assert_eq!(ConfidenceTier::Medium.stars(), "⭐⭐⭐");
    }

    #[test]
    fn test_confidence_monotone_in_scores() {
        let base = ConfidenceTier::from_scores(Some(0.72), Some(0.70));
        let better = ConfidenceTier::from_scores(Some(0.82), Some(0.78));
        // Ord: VeryHigh < ... < VeryLow, so better tier compares smaller.
        assert!(better <= base);
    }

    #[test]
    fn test_filename_token_boost() {
        let plan = plan_with(Entities::default(), Intent::General);
        let matches = vec![
            candidate(
                "D1#0",
                0.7,
                json!({ "source_name": "[9] shadow integration lecture.txt", "chunk_index": 0 }),
            ),
            candidate(
                "D2#0",
                0.7,
                json!({ "source_name": "[3] unrelated topic.txt", "chunk_index": 0 }),
            ),
        ];
        let outcome = rerank(
            matches,
            "what does shadow integration mean",
            &plan,
            &retrieval(),
        );
        assert_eq!(outcome.chunks[0].id, "D1#0");
        assert!((outcome.chunks[0].boosted - 0.7 * 1.5).abs() < 1e-6);
    }
}
