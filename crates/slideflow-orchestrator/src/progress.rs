//! Progress aggregation for pipeline runs.
//!
//! Stages do not push progress. The orchestrator samples every active
//! [`ProgressSource`] on a fixed timer and folds the fractions into one
//! percentage. In batch mode each finished item contributes a full 100 units,
//! so one bar can span the whole batch (`0..=100 * len`).

use crate::pipeline::ProcessObject;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// Bit pattern marking a stage that has not reported yet (a NaN payload that
/// `f32::to_bits` never produces for values in `0.0..=1.0`).
const NOT_STARTED: u32 = u32::MAX;

/// Lock-free fraction-complete cell for stage implementations.
///
/// Written by the worker, read by the interactive thread without pausing the
/// worker.
#[derive(Debug)]
pub struct AtomicProgress(AtomicU32);

impl AtomicProgress {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(NOT_STARTED))
    }

    /// Stores a fraction, clamped to `0.0..=1.0`. NaN is ignored.
    pub fn set(&self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        self.0.store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    #[must_use]
    pub fn get(&self) -> Option<f32> {
        match self.0.load(Ordering::Acquire) {
            NOT_STARTED => None,
            bits => Some(f32::from_bits(bits)),
        }
    }
}

impl Default for AtomicProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress bar range for a run: 100 for single runs, `100 * len` for batches.
#[must_use]
pub fn progress_maximum(batch_len: Option<usize>) -> u32 {
    batch_len.map_or(100, |len| (len as u32).saturating_mul(100))
}

/// Average of the floored per-stage percentages, in `0.0..=100.0`.
///
/// Stages without the progress capability, or whose progress cannot be read
/// yet, are excluded rather than counted as zero. Returns `None` when no stage
/// reports.
#[must_use]
pub fn mean_stage_percent(stages: &[Arc<dyn ProcessObject>]) -> Option<f64> {
    let mut total = 0.0_f64;
    let mut count = 0_u32;

    for stage in stages {
        let Some(fraction) = stage.as_progress_source().and_then(|source| source.progress()) else {
            continue;
        };
        total += f64::from((fraction * 100.0).floor());
        count += 1;
    }

    (count > 0).then(|| total / f64::from(count))
}

/// Turns periodic stage samples into one non-decreasing percentage.
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    /// Units already completed before the current run (`batch_index * 100`).
    base: u32,
    /// Last value reported for the current run.
    last: Option<u32>,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets for a new run at `batch_index` (`None` for a single run).
    pub fn begin_run(&mut self, batch_index: Option<usize>) {
        self.base = batch_index.map_or(0, |index| (index as u32).saturating_mul(100));
        self.last = None;
    }

    /// Last value reported for the current run.
    #[must_use]
    pub fn last(&self) -> Option<u32> {
        self.last
    }

    /// Samples `stages` once.
    ///
    /// # Returns
    /// The new percentage if it differs from the last reported one. `None` when
    /// nothing reports yet (the previous value is kept) or nothing changed.
    pub fn sample(&mut self, stages: &[Arc<dyn ProcessObject>]) -> Option<u32> {
        let mean = mean_stage_percent(stages)?;
        let computed = self.base + mean.floor() as u32;
        let percent = self.last.map_or(computed, |last| last.max(computed));

        trace!(base = self.base, mean, percent, "Progress sample");

        if self.last == Some(percent) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }

    /// Marks the current run as fully done and returns its end value.
    pub fn complete(&mut self) -> u32 {
        let percent = self.base + 100;
        self.last = Some(percent);
        percent
    }
}
