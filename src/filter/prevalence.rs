//! Prevalence computation and the core-taxa filter.
//!
//! Prevalence is the fraction of samples in which a taxon is detected.
//! Both the detection and the prevalence comparison are configurable;
//! the default for each is inclusive (`>=`).

use crate::data::CountMatrix;
use crate::error::{DaaError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Comparison operator for a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// value >= threshold
    #[default]
    AtLeast,
    /// value > threshold
    Above,
}

impl Comparison {
    #[inline]
    pub fn passes(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtLeast => value >= threshold,
            Comparison::Above => value > threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::AtLeast => ">=",
            Comparison::Above => ">",
        }
    }
}

/// When a single count counts as "detected".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub threshold: f64,
    #[serde(default)]
    pub comparison: Comparison,
}

impl Default for Detection {
    /// Any non-zero count: `count >= 1`.
    fn default() -> Self {
        Self {
            threshold: 1.0,
            comparison: Comparison::AtLeast,
        }
    }
}

impl Detection {
    pub fn new(threshold: f64, comparison: Comparison) -> Self {
        Self {
            threshold,
            comparison,
        }
    }

    #[inline]
    pub fn is_detected(&self, count: u64) -> bool {
        self.comparison.passes(count as f64, self.threshold)
    }

    /// Whether a zero count can ever be detected (then sparse storage
    /// shortcuts do not apply).
    fn detects_zero(&self) -> bool {
        self.is_detected(0)
    }
}

/// Core-taxa filter: keep taxa whose prevalence passes `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceFilter {
    /// Minimum prevalence, a fraction in [0, 1].
    pub threshold: f64,
    #[serde(default)]
    pub comparison: Comparison,
    #[serde(default)]
    pub detection: Detection,
}

impl PrevalenceFilter {
    /// Inclusive filter with the default detection rule.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            comparison: Comparison::AtLeast,
            detection: Detection::default(),
        }
    }

    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detection = detection;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DaaError::InvalidParameter(
                "Prevalence threshold must be between 0 and 1".to_string(),
            ));
        }
        if !self.detection.threshold.is_finite() {
            return Err(DaaError::InvalidParameter(
                "Detection threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-taxon pass/fail, in row order.
    pub fn passing(&self, counts: &CountMatrix) -> Result<Vec<bool>> {
        self.validate()?;
        Ok(prevalence(counts, &self.detection)
            .into_iter()
            .map(|p| self.comparison.passes(p, self.threshold))
            .collect())
    }
}

/// Prevalence of every taxon, in row order.
///
/// Computed as `detected / n_samples`; for k of n samples this is the same
/// double as the literal k/n, so boundary comparisons behave as written.
pub fn prevalence(counts: &CountMatrix, detection: &Detection) -> Vec<f64> {
    let n_samples = counts.n_samples();
    if n_samples == 0 {
        return vec![0.0; counts.n_taxa()];
    }
    (0..counts.n_taxa())
        .into_par_iter()
        .map(|row| {
            let detected = if detection.detects_zero() {
                counts
                    .row_dense(row)
                    .into_iter()
                    .filter(|&c| detection.is_detected(c))
                    .count()
            } else {
                counts
                    .row_nonzero(row)
                    .into_iter()
                    .filter(|&c| detection.is_detected(c))
                    .count()
            };
            detected as f64 / n_samples as f64
        })
        .collect()
}

/// Result of prevalence filtering with statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResult {
    pub n_before: usize,
    pub n_after: usize,
    pub n_removed: usize,
    pub retention_rate: f64,
}

impl std::fmt::Display for FilterResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Filter Result")?;
        writeln!(f, "  Before:    {} taxa", self.n_before)?;
        writeln!(f, "  After:     {} taxa", self.n_after)?;
        writeln!(f, "  Removed:   {} taxa", self.n_removed)?;
        writeln!(f, "  Retained:  {:.1}%", self.retention_rate * 100.0)?;
        Ok(())
    }
}

/// Keep the taxa that pass the filter, in their original order.
///
/// Fails with `EmptyData` when nothing passes.
pub fn filter_prevalence(
    counts: &CountMatrix,
    filter: &PrevalenceFilter,
) -> Result<(CountMatrix, FilterResult)> {
    let keep: Vec<usize> = filter
        .passing(counts)?
        .into_iter()
        .enumerate()
        .filter_map(|(i, pass)| pass.then_some(i))
        .collect();

    if keep.is_empty() {
        return Err(DaaError::EmptyData(format!(
            "No taxa pass prevalence {} {:.1}%",
            filter.comparison.symbol(),
            filter.threshold * 100.0
        )));
    }

    let n_before = counts.n_taxa();
    let filtered = counts.subset_taxa(&keep)?;
    let n_after = filtered.n_taxa();
    let result = FilterResult {
        n_before,
        n_after,
        n_removed: n_before - n_after,
        retention_rate: n_after as f64 / n_before as f64,
    };
    Ok((filtered, result))
}
