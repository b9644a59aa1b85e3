//! Deterministic transcript repair (ingestion stage 1).
//!
//! Fixes the recurring transcription errors of the lecture corpus without
//! touching any external service: bracketed annotations and timestamps,
//! split type spellings (`is FP` → `ISFP`), function homophones (`knee
//! hero` → `Ni hero`, guarded by neighbor words from the ontology), spaced
//! development codes (`U D S F` → `UDSF`), stuck repetitions, and
//! whitespace. Applying the normalizer twice yields identical output.

use std::collections::{HashMap, HashSet};

use regex::{Captures, Regex};

use crate::error::{LecternError, Result};
use crate::ontology::ReferenceOntology;

/// Compiled repair rules for one loaded ontology.
pub struct Normalizer {
    annotation_re: Regex,
    clock_re: Regex,
    bracket_time_re: Regex,
    marker_re: Regex,
    variant_re: Option<Regex>,
    variant_map: HashMap<String, String>,
    plain_type_re: Regex,
    split_pair_re: Regex,
    type_set: HashSet<String>,
    func_token_re: Option<Regex>,
    func_map: HashMap<String, String>,
    context_words: HashSet<String>,
    dev_four_re: Regex,
    dev_three_re: Regex,
    dev_codes: HashSet<String>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| LecternError::Config(format!("normalizer pattern {pattern:?}: {e}")))
}

/// Build a case-insensitive word-bounded alternation from literal variants,
/// longest first so multi-word spellings win over their prefixes.
fn variant_alternation(variants: &[&str]) -> Option<String> {
    if variants.is_empty() {
        return None;
    }
    let mut sorted: Vec<&str> = variants.to_vec();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let escaped: Vec<String> = sorted.iter().map(|v| regex::escape(v)).collect();
    Some(format!(r"(?i)\b(?:{})\b", escaped.join("|")))
}

impl Normalizer {
    pub fn new(ontology: &ReferenceOntology) -> Result<Self> {
        let mut variant_map = HashMap::new();
        let mut variant_literals: Vec<&str> = Vec::new();
        for (canonical, variants) in ontology.type_variants() {
            for v in variants {
                variant_map.insert(v.to_ascii_lowercase(), canonical.clone());
                variant_literals.push(v.as_str());
            }
        }
        let variant_re = match variant_alternation(&variant_literals) {
            Some(pattern) => Some(compile(&pattern)?),
            None => None,
        };

        let type_alt = ontology
            .types()
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let plain_type_re = compile(&format!(r"(?i)\b(?:{type_alt})\b"))?;
        let type_set = ontology
            .types()
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        let mut func_map = HashMap::new();
        let mut func_literals: Vec<&str> = Vec::new();
        for (canonical, variants) in ontology.function_variants() {
            for v in variants {
                func_map.insert(v.to_ascii_lowercase(), canonical.clone());
                func_literals.push(v.as_str());
            }
        }
        let func_token_re = match variant_alternation(&func_literals) {
            Some(pattern) => Some(compile(&pattern)?),
            None => None,
        };
        let context_words = ontology
            .function_context_words()
            .iter()
            .map(|w| w.to_ascii_lowercase())
            .collect();

        let dev_codes = ontology
            .development_codes()
            .iter()
            .map(|c| c.to_ascii_uppercase())
            .collect();

        Ok(Self {
            annotation_re: compile(
                r"(?i)\[(?:music|applause|laughter|inaudible|cheering|silence)\]",
            )?,
            clock_re: compile(r"\b\d{1,2}:\d{2}(?::\d{2})?\b")?,
            bracket_time_re: compile(r"\[\d+\.\d+\]")?,
            marker_re: compile(r">{2,}")?,
            variant_re,
            variant_map,
            plain_type_re,
            split_pair_re: compile(r"\b([A-Za-z]{1,3})[ \t]+([A-Z]{1,3})\b")?,
            type_set,
            func_token_re,
            func_map,
            context_words,
            dev_four_re: compile(r"\b([US])[ \t·.]*D[ \t·.]*([SU])[ \t·.]*F\b")?,
            dev_three_re: compile(r"\b([US])[ \t·.]*([SU])[ \t·.]*F\b")?,
            dev_codes,
        })
    }

    /// Run every repair in order. Pure and idempotent.
    pub fn normalize(&self, text: &str) -> String {
        let text = self.strip_artifacts(text);
        let text = self.repair_types(&text);
        let text = self.repair_functions(&text);
        let text = self.repair_development(&text);
        let text = collapse_line_repetitions(&text);
        normalize_whitespace(&text)
    }

    fn strip_artifacts(&self, text: &str) -> String {
        let text = self.annotation_re.replace_all(text, " ");
        let text = self.bracket_time_re.replace_all(&text, " ");
        let text = self.clock_re.replace_all(&text, " ");
        self.marker_re.replace_all(&text, " ").into_owned()
    }

    fn repair_types(&self, text: &str) -> String {
        // Known variants from the ontology first, longest spelling wins.
        let text = match &self.variant_re {
            Some(re) => re
                .replace_all(text, |caps: &Captures| {
                    let matched = caps.get(0).expect("match").as_str();
                    self.variant_map
                        .get(&matched.to_ascii_lowercase())
                        .cloned()
                        .unwrap_or_else(|| matched.to_string())
                })
                .into_owned(),
            None => text.to_string(),
        };

        // Generic split spellings: two fragments whose concatenation is a
        // type and whose second fragment is uppercase (`in TJ`, `I SFP`).
        let text = self
            .split_pair_re
            .replace_all(&text, |caps: &Captures| {
                let left = caps.get(1).expect("group").as_str();
                let right = caps.get(2).expect("group").as_str();
                let joined = format!("{left}{right}");
                if joined.len() == 4 && self.type_set.contains(&joined.to_ascii_lowercase()) {
                    joined.to_ascii_uppercase()
                } else {
                    caps.get(0).expect("match").as_str().to_string()
                }
            })
            .into_owned();

        // Uppercase any remaining case-mangled full spellings.
        self.plain_type_re
            .replace_all(&text, |caps: &Captures| {
                caps.get(0).expect("match").as_str().to_ascii_uppercase()
            })
            .into_owned()
    }

    fn repair_functions(&self, text: &str) -> String {
        let Some(re) = &self.func_token_re else {
            return text.to_string();
        };
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in re.find_iter(text) {
            let token = m.as_str();
            out.push_str(&text[last..m.start()]);
            let canonical = self.func_map.get(&token.to_ascii_lowercase());
            match canonical {
                Some(c) if self.neighbor_licenses(text, m.start(), m.end()) => out.push_str(c),
                _ => out.push_str(token),
            }
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }

    /// A homophone repair is licensed only when the previous or next word is
    /// one of the ontology's function context words.
    fn neighbor_licenses(&self, text: &str, start: usize, end: usize) -> bool {
        let clean = |w: &str| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase()
        };
        let prev = text[..start].split_whitespace().next_back().map(clean);
        let next = text[end..].split_whitespace().next().map(clean);
        prev.is_some_and(|w| self.context_words.contains(&w))
            || next.is_some_and(|w| self.context_words.contains(&w))
    }

    fn repair_development(&self, text: &str) -> String {
        let collapse = |caps: &Captures| {
            let joined: String = caps
                .get(0)
                .expect("match")
                .as_str()
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_uppercase();
            if self.dev_codes.contains(&joined) {
                joined
            } else {
                caps.get(0).expect("match").as_str().to_string()
            }
        };
        let text = self.dev_four_re.replace_all(text, collapse).into_owned();
        self.dev_three_re.replace_all(&text, collapse).into_owned()
    }
}

/// Collapse triple-or-more adjacent repetitions of the same phrase (one to
/// four words) to a single occurrence, per line.
fn collapse_line_repetitions(text: &str) -> String {
    text.lines()
        .map(collapse_repetitions)
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_repetitions(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return String::new();
    }
    let mut out: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let mut collapsed = false;
        for phrase_len in 1..=4usize {
            if i + phrase_len * 3 > tokens.len() {
                break;
            }
            let phrase = &tokens[i..i + phrase_len];
            let mut reps = 1;
            while i + (reps + 1) * phrase_len <= tokens.len()
                && tokens[i + reps * phrase_len..i + (reps + 1) * phrase_len] == *phrase
            {
                reps += 1;
            }
            if reps >= 3 {
                out.extend_from_slice(phrase);
                i += reps * phrase_len;
                collapsed = true;
                break;
            }
        }
        if !collapsed {
            out.push(tokens[i]);
            i += 1;
        }
    }
    out.join(" ")
}

/// Trim lines, collapse space runs, and reduce any blank run to a single
/// blank line so paragraph breaks survive.
fn normalize_whitespace(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut pending_break = false;
    for line in text.lines() {
        let compact = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if compact.is_empty() {
            pending_break = !out.is_empty();
        } else {
            if pending_break {
                out.push(String::new());
                pending_break = false;
            }
            out.push(compact);
        }
    }
    out.join("\n")
}
