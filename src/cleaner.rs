//! LM-backed transcript condensation (ingestion stage 2).
//!
//! The normalized text is cut into character windows at paragraph
//! boundaries and each window is condensed independently through the text
//! model. A window that keeps failing after its bounded retries falls back
//! to the normalized text for that window only; the document stays eligible
//! for chunking and the degradation is recorded per window.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{LecternError, Result};
use crate::llm::TextModel;
use crate::observe::CostLedger;

/// Outcome of the cleaning stage. Window numbers are 1-based.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub text: String,
    /// Windows that fell back to normalized text.
    pub degraded_windows: Vec<usize>,
}

impl CleanOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_windows.is_empty()
    }

    /// Degraded-stage labels for the ingest report (`cleaner:window#2`).
    pub fn degraded_labels(&self) -> Vec<String> {
        self.degraded_windows
            .iter()
            .map(|w| format!("cleaner:window#{w}"))
            .collect()
    }
}

pub struct LmCleaner {
    model: Arc<dyn TextModel>,
    ledger: Arc<CostLedger>,
    window_chars: usize,
    max_retries: u32,
    max_tokens: u32,
    temperature: f32,
}

impl LmCleaner {
    pub fn new(
        model: Arc<dyn TextModel>,
        ledger: Arc<CostLedger>,
        window_chars: usize,
        max_retries: u32,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            ledger,
            window_chars,
            max_retries,
            max_tokens,
            temperature,
        }
    }

    /// Clean the full normalized text, window by window, in order.
    pub async fn clean(&self, normalized: &str, cancel: &CancellationToken) -> Result<CleanOutcome> {
        let windows = split_windows(normalized, self.window_chars);
        let mut cleaned: Vec<String> = Vec::with_capacity(windows.len());
        let mut degraded_windows = Vec::new();

        for (i, window) in windows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(LecternError::Cancelled);
            }
            let window_no = i + 1;
            match self.clean_window(window).await {
                Ok(text) => cleaned.push(text),
                Err(e) => {
                    tracing::warn!(window = window_no, error = %e, "cleaner window degraded");
                    self.ledger.mark_degraded();
                    degraded_windows.push(window_no);
                    cleaned.push(window.clone());
                }
            }
        }

        Ok(CleanOutcome {
            text: cleaned.join("\n\n"),
            degraded_windows,
        })
    }

    async fn clean_window(&self, window: &str) -> Result<String> {
        let prompt = cleaning_prompt(window);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1 << (attempt - 1).min(4)));
                tokio::time::sleep(delay).await;
            }
            match self
                .model
                .complete(&prompt, self.max_tokens, self.temperature)
                .await
            {
                Ok(response) => {
                    self.ledger
                        .record_call("cleaner", prompt.chars().count(), response.chars().count());
                    let trimmed = response.trim();
                    if trimmed.is_empty() {
                        return Err(LecternError::permanent("text-model", "empty cleaner output"));
                    }
                    return Ok(trimmed.to_string());
                }
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| LecternError::transient("text-model", "cleaner retries exhausted")))
    }
}

fn cleaning_prompt(window: &str) -> String {
    format!(
        "You are editing a transcribed typology lecture. Condense the text \
         below to roughly half its length by removing filler words, false \
         starts, and repetition. Keep every factual claim. Preserve every \
         personality type, cognitive function, and development code exactly \
         as written. Do not add any new claims. Return only the condensed \
         text.\n\n{window}"
    )
}

/// Split text into windows of at most `max_chars` characters, cutting at
/// paragraph boundaries when possible, then single newlines, then spaces,
/// then raw character count.
pub fn split_windows(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut windows = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in text.split("\n\n") {
        let para_chars = paragraph.chars().count();
        let sep_chars = if current.is_empty() { 0 } else { 2 };

        if current_chars + sep_chars + para_chars > max_chars && !current.is_empty() {
            windows.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if para_chars > max_chars {
            // Oversized paragraph: hard-split at newline/space boundaries.
            for piece in split_oversized(paragraph, max_chars) {
                if !current.is_empty() {
                    windows.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                windows.push(piece);
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
                current_chars += 2;
            }
            current.push_str(paragraph);
            current_chars += para_chars;
        }
    }

    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

fn split_oversized(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = paragraph;

    while remaining.chars().count() > max_chars {
        let limit_byte = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(b, _)| b)
            .unwrap_or(remaining.len());
        let head = &remaining[..limit_byte];
        let cut = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit_byte);
        pieces.push(remaining[..cut].trim().to_string());
        remaining = &remaining[cut..];
    }

    let tail = remaining.trim();
    if !tail.is_empty() {
        pieces.push(tail.to_string());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_window() {
        let windows = split_windows("one paragraph only", 10_000);
        assert_eq!(windows, vec!["one paragraph only".to_string()]);
    }

    #[test]
    fn test_splits_at_paragraph_boundaries() {
        let a = "a".repeat(6000);
        let b = "b".repeat(6000);
        let text = format!("{a}\n\n{b}");
        let windows = split_windows(&text, 10_000);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0], a);
        assert_eq!(windows[1], b);
    }

    #[test]
    fn test_packs_small_paragraphs() {
        let text = (0..8)
            .map(|i| format!("paragraph {i} {}", "x".repeat(2000)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let windows = split_windows(&text, 10_000);
        assert!(windows.len() >= 2);
        for w in &windows {
            assert!(w.chars().count() <= 10_000);
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let words: String = std::iter::repeat("word ").take(5000).collect();
        let windows = split_windows(words.trim(), 10_000);
        assert!(windows.len() >= 2);
        for w in &windows {
            assert!(w.chars().count() <= 10_000);
        }
        // No word is cut in half.
        for w in &windows {
            assert!(w.split_whitespace().all(|t| t == "word"));
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(split_windows("   ", 10_000).is_empty());
    }
}
