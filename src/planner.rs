//! Query planner: intent detection, entity extraction, filter assembly,
//! query expansion, and top-k selection.
//!
//! The rule-based core never fails. The model-assisted steps (filter
//! extraction and query expansion) are optional refinements with a short
//! timeout; any failure degrades to the rule-based result and is recorded
//! on the plan.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::RetrievalConfig;
use crate::error::{LecternError, Result};
use crate::filter::Filter;
use crate::llm::{strip_json_wrapper, TextModel};
use crate::models::ExplicitFilters;
use crate::normalize::Normalizer;
use crate::observe::CostLedger;
use crate::ontology::{ReferenceOntology, NONE_VALUE};

/// Classified question type, used to shape filters, boosts, and k.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Compatibility,
    TypeLookup,
    FunctionAnalysis,
    FourSides,
    Development,
    Framework,
    SeasonSpecific,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Compatibility => "compatibility",
            Intent::TypeLookup => "type_lookup",
            Intent::FunctionAnalysis => "function_analysis",
            Intent::FourSides => "four_sides",
            Intent::Development => "development",
            Intent::Framework => "framework",
            Intent::SeasonSpecific => "season_specific",
            Intent::General => "general",
        }
    }
}

/// Domain entities extracted from the question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entities {
    pub types: Vec<String>,
    pub functions: Vec<String>,
    pub positions: Vec<String>,
    pub relationships: Vec<String>,
    pub quadra: Option<String>,
    pub temple: Option<String>,
    pub season: Option<String>,
}

/// The derived retrieval strategy for one question.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub intent: Intent,
    pub confidence: f32,
    pub entities: Entities,
    pub filter: Option<Filter>,
    /// The original question first, then expansion variants.
    pub variants: Vec<String>,
    pub recommended_k: usize,
    /// Model-assisted steps that fell back to rules.
    pub degraded: Vec<String>,
}

struct IntentRule {
    intent: Intent,
    patterns: Vec<Regex>,
}

pub struct QueryPlanner {
    ontology: Arc<ReferenceOntology>,
    normalizer: Normalizer,
    model: Option<Arc<dyn TextModel>>,
    ledger: Arc<CostLedger>,
    retrieval: RetrievalConfig,
    planner_timeout: Duration,
    rules: Vec<IntentRule>,
    type_re: Regex,
    function_re: Regex,
    position_re: Regex,
    season_re: Regex,
    bracket_season_re: Regex,
}

const MBTI: &str = r"[EIei][NSns][TFtf][JPjp]";

fn rule(intent: Intent, patterns: &[String]) -> Result<IntentRule> {
    let compiled = patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| LecternError::Config(format!("intent pattern {p:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(IntentRule {
        intent,
        patterns: compiled,
    })
}

impl QueryPlanner {
    pub fn new(
        ontology: Arc<ReferenceOntology>,
        model: Option<Arc<dyn TextModel>>,
        ledger: Arc<CostLedger>,
        retrieval: RetrievalConfig,
        planner_timeout: Duration,
    ) -> Result<Self> {
        let normalizer = Normalizer::new(&ontology)?;

        let rules = vec![
            rule(
                Intent::Compatibility,
                &[
                    r"(?i)compatib".to_string(),
                    r"(?i)\bpair(?:ing|s)?\b".to_string(),
                    r"(?i)\b(?:golden|pedagogue|bronze)\b".to_string(),
                    r"(?i)\b(?:romantic|sexual|social)\b".to_string(),
                ],
            )?,
            rule(
                Intent::TypeLookup,
                &[
                    format!(r"(?i)what\s+is\s+(?:an?\s+)?{MBTI}\b"),
                    format!(r"(?i)explain\s+(?:the\s+)?{MBTI}\b"),
                    format!(r"(?i)\b{MBTI}\s+personality"),
                ],
            )?,
            rule(
                Intent::FunctionAnalysis,
                &[
                    r"(?i)\b(?:Ne|Ni|Se|Si|Te|Ti|Fe|Fi)\b".to_string(),
                    r"(?i)\b(?:hero|parent|child|inferior|nemesis|critic|trickster|demon)\b[\s\S]*\bfunction|\bfunction\b[\s\S]*\b(?:hero|parent|child|inferior|nemesis|critic|trickster|demon)\b".to_string(),
                ],
            )?,
            rule(
                Intent::FourSides,
                &[
                    r"(?i)four\s+sides".to_string(),
                    r"(?i)\b(?:ego|subconscious|unconscious|superego)\b".to_string(),
                ],
            )?,
            rule(
                Intent::Development,
                &[
                    r"(?i)\b(?:grow|grows|growth|develop|develops|developing|development|mature|maturity)\b".to_string(),
                    r"(?i)shadow\s+work".to_string(),
                    r"(?i)integrat".to_string(),
                ],
            )?,
            rule(
                Intent::Framework,
                &[
                    r"(?i)\boctagram\b".to_string(),
                    r"(?i)\btemples?\b".to_string(),
                    r"(?i)\bquadras?\b".to_string(),
                    r"(?i)interaction\s+style".to_string(),
                    r"(?i)deadly\s+sin".to_string(),
                    r"(?i)holy\s+virtue".to_string(),
                ],
            )?,
            rule(
                Intent::SeasonSpecific,
                &[
                    r"(?i)season\s+\d+".to_string(),
                    r"\[\d+(?:\.\d+)?\]?".to_string(),
                ],
            )?,
        ];

        let type_alt = ontology
            .types()
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let function_alt = ontology
            .functions()
            .iter()
            .map(|f| regex::escape(f))
            .collect::<Vec<_>>()
            .join("|");
        let position_alt = ontology
            .positions()
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            normalizer,
            model,
            ledger,
            retrieval,
            planner_timeout,
            rules,
            type_re: Regex::new(&format!(r"(?i)\b(?:{type_alt})\b"))
                .map_err(|e| LecternError::Config(e.to_string()))?,
            function_re: Regex::new(&format!(r"(?i)\b(?:{function_alt})\b"))
                .map_err(|e| LecternError::Config(e.to_string()))?,
            position_re: Regex::new(&format!(r"(?i)\b(?:{position_alt})\b"))
                .map_err(|e| LecternError::Config(e.to_string()))?,
            season_re: Regex::new(r"(?i)season\s+(\d+)")
                .map_err(|e| LecternError::Config(e.to_string()))?,
            bracket_season_re: Regex::new(r"\[(\d+)")
                .map_err(|e| LecternError::Config(e.to_string()))?,
            ontology,
        })
    }

    /// Derive the full retrieval plan for a question.
    pub async fn plan(
        &self,
        question: &str,
        explicit: Option<&ExplicitFilters>,
    ) -> QueryPlan {
        let (intent, confidence) = self.detect_intent(question);
        let entities = self.extract_entities(question);
        let mut degraded = Vec::new();

        // Model-assisted filter extraction over the five supported fields;
        // failure falls back to rule-based construction.
        let lm_fields = match &self.model {
            Some(model) => match self.lm_filter_fields(model.as_ref(), question).await {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::debug!(error = %e, "filter extractor degraded");
                    self.ledger.mark_degraded();
                    degraded.push("filter_extractor".to_string());
                    None
                }
            },
            None => None,
        };

        let filter = self.assemble_filter(&entities, lm_fields.as_ref(), confidence, explicit);

        let mut variants = vec![question.to_string()];
        if let Some(model) = &self.model {
            match self.expand(model.as_ref(), question).await {
                Ok(extra) => variants.extend(extra),
                Err(e) => {
                    tracing::debug!(error = %e, "query expansion degraded");
                    self.ledger.mark_degraded();
                    degraded.push("expansion".to_string());
                }
            }
        }

        let very_specific = entities.season.is_some()
            || (!entities.types.is_empty() && !entities.relationships.is_empty());
        let recommended_k = if very_specific {
            self.retrieval.specific_k
        } else {
            self.retrieval.default_k
        };

        QueryPlan {
            intent,
            confidence,
            entities,
            filter,
            variants,
            recommended_k,
            degraded,
        }
    }

    /// Rule-based intent scoring: each matching pattern scores one point,
    /// intent score is matches over pattern count, confidence is twice the
    /// top score capped at 1.0. No match at all means `general` at 0.5.
    fn detect_intent(&self, question: &str) -> (Intent, f32) {
        let mut best: Option<(Intent, f32)> = None;
        for rule in &self.rules {
            let matches = rule
                .patterns
                .iter()
                .filter(|p| p.is_match(question))
                .count();
            if matches == 0 {
                continue;
            }
            let score = matches as f32 / rule.patterns.len() as f32;
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((rule.intent, score));
            }
        }
        match best {
            Some((intent, score)) => (intent, (score * 2.0).min(1.0)),
            None => (Intent::General, 0.5),
        }
    }

    fn extract_entities(&self, question: &str) -> Entities {
        // Normalizing first repairs typographic variants, so `is FP` in a
        // question still extracts as ISFP.
        let normalized = self.normalizer.normalize(question);

        let mut entities = Entities::default();

        for m in self.type_re.find_iter(&normalized) {
            if let Some(canonical) = self.ontology.canonical_type(m.as_str()) {
                if !entities.types.contains(&canonical.to_string()) {
                    entities.types.push(canonical.to_string());
                }
            }
        }
        for m in self.function_re.find_iter(&normalized) {
            if let Some(canonical) = self.ontology.canonical_function(m.as_str()) {
                if !entities.functions.contains(&canonical.to_string()) {
                    entities.functions.push(canonical.to_string());
                }
            }
        }
        for m in self.position_re.find_iter(&normalized) {
            let position = m.as_str().to_ascii_lowercase();
            if !entities.positions.contains(&position) {
                entities.positions.push(position);
            }
        }

        for word in normalized
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            if let Some(relationship) = self.ontology.relationship_for_keyword(word) {
                if relationship != NONE_VALUE
                    && !entities.relationships.contains(&relationship.to_string())
                {
                    entities.relationships.push(relationship.to_string());
                }
            }
            if entities.quadra.is_none() {
                if let Some(quadra) = self.ontology.canonical_quadra(word) {
                    if quadra != NONE_VALUE {
                        entities.quadra = Some(quadra.to_string());
                    }
                }
            }
            if entities.temple.is_none() {
                if let Some(temple) = self.ontology.canonical_temple(word) {
                    if temple != NONE_VALUE {
                        entities.temple = Some(temple.to_string());
                    }
                }
            }
        }

        // Season comes from the original question: normalization strips
        // bracketed decimals.
        entities.season = self
            .season_re
            .captures(question)
            .or_else(|| self.bracket_season_re.captures(question))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        entities
    }

    /// Assemble the vector-store filter. Smart clauses require planner
    /// confidence at or above the gate; explicit user filters always apply.
    fn assemble_filter(
        &self,
        entities: &Entities,
        lm_fields: Option<&LmFilterFields>,
        confidence: f32,
        explicit: Option<&ExplicitFilters>,
    ) -> Option<Filter> {
        let mut clauses: Vec<Filter> = Vec::new();

        if confidence >= self.retrieval.planner_confidence_gate {
            let types: &[String] = match lm_fields.and_then(|f| f.types_discussed.as_deref()) {
                Some(types) if !types.is_empty() => types,
                _ => &entities.types,
            };
            if let Some(clause) = Filter::any(
                types
                    .iter()
                    .map(|t| Filter::contains("types_discussed", t.as_str()))
                    .collect(),
            ) {
                clauses.push(clause);
            }

            if let Some(clause) = Filter::any(
                entities
                    .functions
                    .iter()
                    .map(|f| Filter::contains("functions_covered", f.as_str()))
                    .collect(),
            ) {
                clauses.push(clause);
            }

            if let Some(relationship) = entities.relationships.first() {
                clauses.push(Filter::eq("relationship_type", relationship.as_str()));
            }
            if let Some(quadra) = &entities.quadra {
                clauses.push(Filter::eq("quadra", quadra.as_str()));
            }
            if let Some(temple) = &entities.temple {
                clauses.push(Filter::eq("temple", temple.as_str()));
            }

            // Season is compared as a string, never as an integer.
            let season = lm_fields
                .and_then(|f| f.season.clone())
                .or_else(|| entities.season.clone());
            if let Some(season) = season {
                clauses.push(Filter::eq("season", season.as_str()));
            }

            if let Some(fields) = lm_fields {
                if let Some(difficulty) = &fields.difficulty {
                    clauses.push(Filter::eq("difficulty", difficulty.as_str()));
                }
                if let Some(category) = &fields.primary_category {
                    clauses.push(Filter::eq("primary_category", category.as_str()));
                }
                if let Some(content_type) = &fields.content_type {
                    clauses.push(Filter::eq("content_type", content_type.as_str()));
                }
            }
        }

        if let Some(explicit) = explicit {
            if let Some(doc_id) = &explicit.doc_id {
                clauses.push(Filter::eq("doc_id", doc_id.as_str()));
            }
            for tag in &explicit.tags {
                clauses.push(Filter::contains("key_concepts", tag.as_str()));
            }
        }

        Filter::all(clauses)
    }

    async fn lm_filter_fields(
        &self,
        model: &dyn TextModel,
        question: &str,
    ) -> Result<Option<LmFilterFields>> {
        let prompt = format!(
            "Extract search filters from this question about typology lectures. \
             Respond with a JSON object using only these optional keys: \
             \"season\" (number as a string), \"types_discussed\" (array of \
             four-letter types), \"difficulty\" (beginner|intermediate|advanced), \
             \"primary_category\", \"content_type\". Omit keys the question does \
             not imply. Respond with JSON only.\n\nQuestion: {question}"
        );
        let response = tokio::time::timeout(self.planner_timeout, model.complete(&prompt, 300, 0.0))
            .await
            .map_err(|_| LecternError::transient("text-model", "planner timeout"))??;
        self.ledger
            .record_call("planner", prompt.chars().count(), response.chars().count());

        let value: Value = serde_json::from_str(strip_json_wrapper(&response))?;
        Ok(Some(self.validate_lm_fields(&value)))
    }

    /// Keep only values the ontology recognizes; the planner never trusts
    /// the model with out-of-enumeration filters.
    fn validate_lm_fields(&self, value: &Value) -> LmFilterFields {
        let season = match value.get("season") {
            Some(Value::String(s)) if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() => {
                Some(s.clone())
            }
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let types_discussed = value.get("types_discussed").and_then(|v| v.as_array()).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| self.ontology.canonical_type(s))
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        let keep_enum = |field: &str, check: &dyn Fn(&str) -> bool| -> Option<String> {
            value
                .get(field)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| check(s))
        };

        LmFilterFields {
            season,
            types_discussed,
            difficulty: keep_enum("difficulty", &|s| self.ontology.is_difficulty(s)),
            primary_category: keep_enum("primary_category", &|s| self.ontology.is_category(s)),
            content_type: keep_enum("content_type", &|s| self.ontology.is_content_type(s)),
        }
    }

    /// Generate up to four rephrasings that preserve domain terminology.
    async fn expand(&self, model: &dyn TextModel, question: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "Rephrase this question three different ways for searching a typology \
             lecture corpus. Keep every personality type, cognitive function, \
             season number, and domain term exactly as written. One rephrasing \
             per line, no numbering.\n\nQuestion: {question}"
        );
        let response = tokio::time::timeout(self.planner_timeout, model.complete(&prompt, 400, 0.7))
            .await
            .map_err(|_| LecternError::transient("text-model", "planner timeout"))??;
        self.ledger
            .record_call("planner", prompt.chars().count(), response.chars().count());

        let mut variants: Vec<String> = Vec::new();
        for line in response.lines() {
            let cleaned = line
                .trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim();
            if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(question) {
                continue;
            }
            if !variants.iter().any(|v| v.eq_ignore_ascii_case(cleaned)) {
                variants.push(cleaned.to_string());
            }
            if variants.len() == 4 {
                break;
            }
        }
        Ok(variants)
    }
}

/// The five fields the model-assisted filter extractor may produce.
#[derive(Debug, Clone, Default)]
struct LmFilterFields {
    season: Option<String>,
    types_discussed: Option<Vec<String>>,
    difficulty: Option<String>,
    primary_category: Option<String>,
    content_type: Option<String>,
}
