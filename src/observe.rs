//! Process-wide observability counters: external-call costs and warnings.
//!
//! The ledger is shared by every component that talks to an external model
//! or the vector store. Readers see eventually-consistent values; the ingest
//! orchestrator takes before/after snapshots to report per-document cost.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Approximate chars-per-token ratio used for cost estimation.
const CHARS_PER_TOKEN: u64 = 4;

/// Accumulated cost for one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCost {
    /// Number of external calls made by the stage.
    pub calls: u64,
    /// Characters sent to the external service.
    pub input_chars: u64,
    /// Characters received from the external service.
    pub output_chars: u64,
    /// Estimated token volume (input + output, chars / 4).
    pub estimated_tokens: u64,
}

impl StageCost {
    fn saturating_sub(&self, earlier: &StageCost) -> StageCost {
        StageCost {
            calls: self.calls.saturating_sub(earlier.calls),
            input_chars: self.input_chars.saturating_sub(earlier.input_chars),
            output_chars: self.output_chars.saturating_sub(earlier.output_chars),
            estimated_tokens: self.estimated_tokens.saturating_sub(earlier.estimated_tokens),
        }
    }

    fn is_zero(&self) -> bool {
        self.calls == 0 && self.input_chars == 0 && self.output_chars == 0
    }
}

/// Point-in-time copy of the ledger, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CostSnapshot {
    /// Per-stage accumulated cost.
    pub by_stage: BTreeMap<String, StageCost>,
}

impl CostSnapshot {
    /// Cost accrued between `earlier` and `self`, dropping untouched stages.
    pub fn since(&self, earlier: &CostSnapshot) -> CostSnapshot {
        let mut by_stage = BTreeMap::new();
        for (stage, cost) in &self.by_stage {
            let delta = match earlier.by_stage.get(stage) {
                Some(prev) => cost.saturating_sub(prev),
                None => cost.clone(),
            };
            if !delta.is_zero() {
                by_stage.insert(stage.clone(), delta);
            }
        }
        CostSnapshot { by_stage }
    }

    /// Total estimated tokens across all stages.
    pub fn total_tokens(&self) -> u64 {
        self.by_stage.values().map(|c| c.estimated_tokens).sum()
    }
}

/// Shared cost ledger plus warning/degradation counters.
///
/// Loaded once per process and handed around as an `Arc`. Counter updates
/// take a short mutex or an atomic; no reader blocks a writer for long.
#[derive(Debug, Default)]
pub struct CostLedger {
    stages: Mutex<BTreeMap<String, StageCost>>,
    warnings: AtomicU64,
    degraded_stages: AtomicU64,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one external call attributed to `stage`.
    pub fn record_call(&self, stage: &str, input_chars: usize, output_chars: usize) {
        let mut stages = self.stages.lock().expect("cost ledger poisoned");
        let entry = stages.entry(stage.to_string()).or_default();
        entry.calls += 1;
        entry.input_chars += input_chars as u64;
        entry.output_chars += output_chars as u64;
        entry.estimated_tokens += (input_chars as u64 + output_chars as u64) / CHARS_PER_TOKEN;
    }

    /// Count validator warnings (unknown enum items dropped, coercions).
    pub fn add_warnings(&self, count: u64) {
        self.warnings.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a stage that fell back to its degraded path.
    pub fn mark_degraded(&self) {
        self.degraded_stages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn degraded_stages(&self) -> u64 {
        self.degraded_stages.load(Ordering::Relaxed)
    }

    /// Copy the current per-stage costs.
    pub fn snapshot(&self) -> CostSnapshot {
        let stages = self.stages.lock().expect("cost ledger poisoned");
        CostSnapshot {
            by_stage: stages.clone(),
        }
    }
}
