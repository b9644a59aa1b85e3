//! Paragraph-greedy semantic chunker with hard size bounds.
//!
//! Boundaries prefer paragraph breaks, then sentence terminators, and only
//! then raw character counts. The bounds are guarantees, not hints: every
//! produced chunk is at most `max_chars` characters, every chunk is at
//! least `min_chars` except the final chunk of a document shorter than
//! `min_chars`, and any document longer than `multi_chunk_threshold` yields
//! at least two chunks. Concatenating the chunks in order reproduces the
//! input up to whitespace.
//!
//! All sizes are counted in characters, not bytes.

use std::collections::VecDeque;

use crate::config::ChunkingLimits;
use crate::models::Chunk;

const SEP: &str = "\n\n";
const SEP_CHARS: usize = 2;

/// Split cleaned document text into ordered, size-bounded chunks.
pub fn chunk_text(cleaned: &str, limits: &ChunkingLimits) -> Vec<Chunk> {
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Vec::new();
    }

    let total_chars = char_len(cleaned);
    let mut units = primary_units(cleaned, limits);

    // Oversized units are pre-split so the packing loop only ever sees
    // units that fit a single chunk.
    let mut queue: VecDeque<String> = VecDeque::new();
    for unit in units.drain(..) {
        if char_len(&unit) > limits.max_chars {
            for piece in force_split(&unit, limits.max_chars) {
                queue.push_back(piece);
            }
        } else {
            queue.push_back(unit);
        }
    }

    let mut texts = pack(queue, limits);

    // Safety net: a long document must never collapse into one chunk.
    if total_chars > limits.multi_chunk_threshold && texts.len() == 1 {
        texts = equal_split(&texts[0], limits.max_chars);
    }

    merge_or_rebalance_tail(&mut texts, limits);

    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk::new(i, text))
        .collect()
}

/// Primary split on blank lines; fall back to single newlines when that
/// yields a single paragraph or any paragraph is far oversized.
fn primary_units(cleaned: &str, limits: &ChunkingLimits) -> Vec<String> {
    let paragraphs: Vec<&str> = cleaned
        .split(SEP)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let needs_fallback = paragraphs.len() <= 1
        || paragraphs
            .iter()
            .any(|p| char_len(p) > limits.multi_chunk_threshold);

    if !needs_fallback {
        return paragraphs.into_iter().map(str::to_string).collect();
    }

    cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Greedy pack of units into chunks of at most `max_chars`, keeping every
/// flushed chunk at or above `min_chars` by splitting the overflowing unit
/// at a sentence terminator when needed.
fn pack(mut queue: VecDeque<String>, limits: &ChunkingLimits) -> Vec<String> {
    let mut texts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    while let Some(unit) = queue.pop_front() {
        let unit_chars = char_len(&unit);

        if current.is_empty() {
            current = unit;
            current_chars = unit_chars;
            continue;
        }

        if current_chars + SEP_CHARS + unit_chars <= limits.max_chars {
            current.push_str(SEP);
            current.push_str(&unit);
            current_chars += SEP_CHARS + unit_chars;
            continue;
        }

        if current_chars < limits.min_chars {
            // Flushing now would leave an undersized chunk: take the head
            // of the overflowing unit up to a sentence terminator instead.
            let need = (limits.min_chars - current_chars).saturating_sub(SEP_CHARS).max(1);
            let room = limits.max_chars - current_chars - SEP_CHARS;
            let cut = sentence_cut_in(&unit, need, room).unwrap_or(room);
            let (head, tail) = split_at_char(&unit, cut);
            current.push_str(SEP);
            current.push_str(head.trim_end());
            texts.push(std::mem::take(&mut current));
            current_chars = 0;
            let tail = tail.trim_start();
            if !tail.is_empty() {
                queue.push_front(tail.to_string());
            }
        } else {
            texts.push(std::mem::take(&mut current));
            current_chars = 0;
            queue.push_front(unit);
        }
    }

    if !current.is_empty() {
        texts.push(current);
    }
    texts
}

/// Split an oversized unit into pieces of at most `max_chars`, cutting at
/// the sentence terminator nearest the limit, or at the limit itself when
/// no terminator exists within it.
fn force_split(unit: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = unit.trim();

    while char_len(remaining) > max_chars {
        let cut = sentence_cut_in(remaining, 1, max_chars).unwrap_or(max_chars);
        let (head, tail) = split_at_char(remaining, cut);
        let head = head.trim();
        if !head.is_empty() {
            pieces.push(head.to_string());
        }
        remaining = tail.trim_start();
    }

    if !remaining.is_empty() {
        pieces.push(remaining.to_string());
    }
    pieces
}

/// Equal character split into pieces sized between roughly 2/3 of
/// `max_chars` and `max_chars`.
fn equal_split(text: &str, max_chars: usize) -> Vec<String> {
    let total = char_len(text);
    let n = total.div_ceil(max_chars).max(2);
    let piece = total.div_ceil(n);

    let mut pieces = Vec::with_capacity(n);
    let mut remaining = text;
    while char_len(remaining) > piece {
        let (head, tail) = split_at_char(remaining, piece);
        pieces.push(head.to_string());
        remaining = tail;
    }
    if !remaining.is_empty() {
        pieces.push(remaining.to_string());
    }
    pieces
}

/// Enforce the lower bound on the trailing chunk: merge it into the
/// previous chunk, or rebalance the pair around a sentence terminator near
/// the midpoint when a plain merge would breach the upper bound.
fn merge_or_rebalance_tail(texts: &mut Vec<String>, limits: &ChunkingLimits) {
    if texts.len() < 2 {
        return;
    }
    let last_chars = char_len(texts.last().expect("non-empty"));
    if last_chars >= limits.min_chars {
        return;
    }

    let last = texts.pop().expect("non-empty");
    let prev = texts.pop().expect("len >= 2");
    let prev_chars = char_len(&prev);

    if prev_chars + SEP_CHARS + last_chars <= limits.max_chars {
        texts.push(format!("{prev}{SEP}{last}"));
        return;
    }

    let combined = format!("{prev}{SEP}{last}");
    let combined_chars = char_len(&combined);
    let lo = combined_chars
        .saturating_sub(limits.max_chars)
        .max(limits.min_chars);
    let hi = (combined_chars - limits.min_chars).min(limits.max_chars);
    let mid = combined_chars / 2;
    let cut = sentence_cut_nearest(&combined, lo, hi, mid).unwrap_or(mid.clamp(lo, hi));
    let (head, tail) = split_at_char(&combined, cut);
    texts.push(head.trim_end().to_string());
    texts.push(tail.trim_start().to_string());
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split at a character index, which always lands on a char boundary.
fn split_at_char(s: &str, char_idx: usize) -> (&str, &str) {
    let byte = s
        .char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(s.len());
    s.split_at(byte)
}

/// Character positions just after a sentence terminator (`.`, `!`, `?`)
/// that is followed by whitespace or end of text.
fn sentence_cuts(s: &str) -> Vec<usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut cuts = Vec::new();
    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '.' | '!' | '?') {
            let next_ws = chars.get(i + 1).map_or(true, |n| n.is_whitespace());
            if next_ws {
                cuts.push(i + 1);
            }
        }
    }
    cuts
}

/// Largest sentence cut within `[lo, hi]`, if any.
fn sentence_cut_in(s: &str, lo: usize, hi: usize) -> Option<usize> {
    sentence_cuts(s)
        .into_iter()
        .filter(|&c| c >= lo && c <= hi)
        .max()
}

/// Sentence cut within `[lo, hi]` closest to `target`, if any.
fn sentence_cut_nearest(s: &str, lo: usize, hi: usize, target: usize) -> Option<usize> {
    sentence_cuts(s)
        .into_iter()
        .filter(|&c| c >= lo && c <= hi)
        .min_by_key(|&c| c.abs_diff(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ChunkingLimits {
        ChunkingLimits::default()
    }

    fn normalize_ws(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn assert_bounds(chunks: &[Chunk], total_chars: usize) {
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(
                chunk.char_length <= 3000,
                "chunk {i} exceeds upper bound: {}",
                chunk.char_length
            );
            let is_last = i == chunks.len() - 1;
            if !(is_last && total_chars < 500) {
                assert!(
                    chunk.char_length >= 500,
                    "chunk {i} below lower bound: {}",
                    chunk.char_length
                );
            }
        }
    }

    fn assert_concat(chunks: &[Chunk], input: &str) {
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(normalize_ws(&joined), normalize_ws(input));
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunks = chunk_text("a short lecture note", &limits());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "a short lecture note");
    }

    #[test]
    fn test_empty_document() {
        assert!(chunk_text("   \n\n  ", &limits()).is_empty());
    }

    #[test]
    fn test_paragraphs_pack_greedily() {
        let paragraphs: Vec<String> = (0..10)
            .map(|i| format!("Paragraph {i}. {}", "content words here. ".repeat(40)))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_text(&text, &limits());
        assert!(chunks.len() >= 2);
        assert_bounds(&chunks, text.chars().count());
        assert_concat(&chunks, &text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_oversized_paragraph_splits_at_sentences() {
        let sentence = "The hero function leads every decision the type makes. ";
        let text = sentence.repeat(150); // ~8400 chars, one paragraph
        let chunks = chunk_text(text.trim(), &limits());
        assert!(chunks.len() >= 3);
        assert_bounds(&chunks, text.trim().chars().count());
        // Every chunk ends on a sentence terminator.
        for chunk in &chunks {
            assert!(chunk.text.trim_end().ends_with('.'));
        }
        assert_concat(&chunks, text.trim());
    }

    #[test]
    fn test_safety_net_no_terminators() {
        // 12,000 chars, no blank lines, no terminal punctuation.
        let text: String = "abcdefghij".repeat(1200);
        let chunks = chunk_text(&text, &limits());
        assert!(chunks.len() >= 4, "expected >= 4 chunks, got {}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.char_length <= 3000);
        }
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(normalize_ws(&joined), normalize_ws(&text));
    }

    #[test]
    fn test_long_document_multi_chunk() {
        let text = "Sentence with enough words to matter. ".repeat(160); // > 5000 chars
        let chunks = chunk_text(text.trim(), &limits());
        assert!(chunks.len() >= 2);
        assert_bounds(&chunks, text.trim().chars().count());
    }

    #[test]
    fn test_trailing_chunk_merged() {
        // Two paragraphs: one comfortable, one tiny. The tiny tail must
        // merge into its predecessor.
        let big = "A solid paragraph of lecture content. ".repeat(30); // ~1140
        let tiny = "Closing remark.";
        let text = format!("{}\n\n{}", big.trim(), tiny);
        let chunks = chunk_text(&text, &limits());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Closing remark."));
    }

    #[test]
    fn test_trailing_rebalance_keeps_bounds() {
        // Previous chunk near the cap plus a tail that cannot merge without
        // breaching 3000: the pair is rebalanced around the midpoint.
        let sentences = "This sentence keeps the chunk close to its cap. ".repeat(62); // 2976
        let tail = "The closing remark rounds out the lecture with a final thought.";
        let text = format!("{}\n\n{tail}", sentences.trim());
        let chunks = chunk_text(&text, &limits());
        let total = text.chars().count();
        assert!(chunks.len() >= 2);
        assert_bounds(&chunks, total);
        assert_concat(&chunks, &text);
    }

    #[test]
    fn test_order_is_source_order() {
        let text = (0..12)
            .map(|i| format!("Marker{i}. {}", "filler sentence goes on. ".repeat(30)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, &limits());
        let mut last_marker = -1i32;
        for chunk in &chunks {
            for i in 0..12 {
                if chunk.text.contains(&format!("Marker{i}.")) {
                    assert!(i as i32 >= last_marker);
                    last_marker = last_marker.max(i as i32);
                }
            }
        }
    }
}
