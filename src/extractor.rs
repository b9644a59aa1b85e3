//! LM-backed metadata extraction (ingestion stage 4).
//!
//! Builds a tagging prompt that embeds the reference ontology's
//! enumerations, asks the text model for a single JSON object with all
//! eighteen fields, and returns the parsed output untouched: coercion
//! against the ontology is the validator's job, not the extractor's.
//!
//! Robustness: fenced-code wrappers are stripped; a parse failure earns one
//! corrective retry with a stricter instruction; a second failure yields
//! the all-empty record with `tag_confidence = 0.0` so the orchestrator can
//! continue.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::llm::{strip_json_wrapper, TextModel};
use crate::metadata::MetadataRecord;
use crate::observe::CostLedger;
use crate::ontology::ReferenceOntology;

/// Documents longer than this are excerpted before tagging.
const EXCERPT_BUDGET_CHARS: usize = 12_000;

/// Raw extraction output: the model's JSON plus a degradation marker.
#[derive(Debug, Clone)]
pub struct RawExtraction {
    pub value: Value,
    /// True when both attempts failed and the empty record was substituted.
    pub degraded: bool,
}

pub struct MetadataExtractor {
    model: Arc<dyn TextModel>,
    ledger: Arc<CostLedger>,
    max_tokens: u32,
    temperature: f32,
}

impl MetadataExtractor {
    pub fn new(
        model: Arc<dyn TextModel>,
        ledger: Arc<CostLedger>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        // The output budget must be able to carry all 18 fields.
        let max_tokens = max_tokens.max(1500);
        Self {
            model,
            ledger,
            max_tokens,
            temperature,
        }
    }

    /// Extract the raw 18-field record for a document.
    pub async fn extract(
        &self,
        cleaned: &str,
        source_name: &str,
        ontology: &ReferenceOntology,
    ) -> RawExtraction {
        let excerpt = excerpt_for_tagging(cleaned, EXCERPT_BUDGET_CHARS);
        let prompt = tagging_prompt(&excerpt, source_name, ontology);

        match self.attempt(&prompt).await {
            Ok(value) => RawExtraction {
                value,
                degraded: false,
            },
            Err(first_err) => {
                tracing::debug!(error = %first_err, "extractor first attempt failed, retrying strict");
                let strict = format!(
                    "{prompt}\n\nYour previous answer could not be parsed. Respond with \
                     ONLY a single valid JSON object and nothing else: no prose, no \
                     markdown fences, no trailing commentary."
                );
                match self.attempt(&strict).await {
                    Ok(value) => RawExtraction {
                        value,
                        degraded: false,
                    },
                    Err(second_err) => {
                        tracing::warn!(error = %second_err, "extractor degraded to empty record");
                        self.ledger.mark_degraded();
                        RawExtraction {
                            value: serde_json::to_value(MetadataRecord::empty())
                                .expect("empty record serializes"),
                            degraded: true,
                        }
                    }
                }
            }
        }
    }

    async fn attempt(&self, prompt: &str) -> Result<Value> {
        let response = self
            .model
            .complete(prompt, self.max_tokens, self.temperature)
            .await?;
        self.ledger
            .record_call("extractor", prompt.chars().count(), response.chars().count());
        let stripped = strip_json_wrapper(&response);
        let value: Value = serde_json::from_str(stripped)?;
        if !value.is_object() {
            return Err(crate::error::LecternError::permanent(
                "text-model",
                "extractor output is not a JSON object",
            ));
        }
        Ok(value)
    }
}

/// Three disjoint equal slices (beginning, middle, end) when the document
/// does not fit the tagging budget.
pub fn excerpt_for_tagging(cleaned: &str, budget_chars: usize) -> String {
    let chars: Vec<char> = cleaned.chars().collect();
    if chars.len() <= budget_chars {
        return cleaned.to_string();
    }

    let slice_len = budget_chars / 3;
    let begin: String = chars[..slice_len].iter().collect();
    let mid_start = chars.len() / 2 - slice_len / 2;
    let middle: String = chars[mid_start..mid_start + slice_len].iter().collect();
    let end: String = chars[chars.len() - slice_len..].iter().collect();

    format!("{begin}\n[…]\n{middle}\n[…]\n{end}")
}

fn tagging_prompt(excerpt: &str, source_name: &str, ontology: &ReferenceOntology) -> String {
    format!(
        "Tag this typology lecture for retrieval. Source: {source_name}\n\n\
         Produce a single JSON object with exactly these 18 fields:\n\
         - content_type: one of {content_types}\n\
         - difficulty: one of {difficulties}\n\
         - primary_category: one of {categories}\n\
         - types_discussed: array from {types}\n\
         - functions_covered: array from {functions}\n\
         - function_positions: array of \"{{function}}_{{position}}\" with positions from {positions}\n\
         - relationship_type: one of {relationships}\n\
         - quadra: one of {quadras}\n\
         - temple: one of {temples}\n\
         - octagram_states: array from {codes}\n\
         - pair_dynamics: array of short phrases\n\
         - archetypes: array of short phrases\n\
         - interaction_style_details: array of short phrases\n\
         - key_concepts: array of at most 10 short phrases\n\
         - teaching_focus: one sentence\n\
         - prerequisite_knowledge: array of short phrases\n\
         - target_audience: one of beginner, intermediate, advanced, expert\n\
         - tag_confidence: number between 0.0 and 1.0 rating your own tagging\n\n\
         Use only the enumerated values where a list is given. Respond with \
         JSON only.\n\n\
         Lecture text:\n{excerpt}",
        content_types = ontology.content_types().join(", "),
        difficulties = "beginner, intermediate, advanced",
        categories = ontology.categories().join(", "),
        types = ontology.types().join(", "),
        functions = ontology.functions().join(", "),
        positions = ontology.positions().join(", "),
        relationships = ontology.relationships().join(", "),
        quadras = "alpha, beta, gamma, none",
        temples = "heart, mind, soul, none",
        codes = ontology.development_codes().join(", "),
    )
}
