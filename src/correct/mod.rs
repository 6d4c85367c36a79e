//! Multiple testing correction across taxa.
//!
//! - **bh**: Benjamini-Hochberg and Benjamini-Yekutieli (FDR)
//! - **fwer**: Holm and Bonferroni (family-wise error rate)

pub mod bh;
pub mod fwer;

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};

pub use bh::{correct_bh, correct_by};
pub use fwer::{correct_bonferroni, correct_holm};

/// Adjustment procedure applied to one method's p-value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    #[default]
    #[serde(alias = "bh", alias = "fdr")]
    BenjaminiHochberg,
    #[serde(alias = "by")]
    BenjaminiYekutieli,
    Holm,
    Bonferroni,
    /// Adjusted values equal the raw values.
    None,
}

impl CorrectionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CorrectionMethod::BenjaminiHochberg => "BH",
            CorrectionMethod::BenjaminiYekutieli => "BY",
            CorrectionMethod::Holm => "holm",
            CorrectionMethod::Bonferroni => "bonferroni",
            CorrectionMethod::None => "none",
        }
    }

    fn apply(&self, p_values: &[f64]) -> Vec<f64> {
        match self {
            CorrectionMethod::BenjaminiHochberg => correct_bh(p_values),
            CorrectionMethod::BenjaminiYekutieli => correct_by(p_values),
            CorrectionMethod::Holm => correct_holm(p_values),
            CorrectionMethod::Bonferroni => correct_bonferroni(p_values),
            CorrectionMethod::None => p_values.to_vec(),
        }
    }
}

impl std::str::FromStr for CorrectionMethod {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bh" | "fdr" | "benjamini_hochberg" => Ok(CorrectionMethod::BenjaminiHochberg),
            "by" | "benjamini_yekutieli" => Ok(CorrectionMethod::BenjaminiYekutieli),
            "holm" => Ok(CorrectionMethod::Holm),
            "bonferroni" => Ok(CorrectionMethod::Bonferroni),
            "none" => Ok(CorrectionMethod::None),
            other => Err(DaaError::InvalidParameter(format!(
                "Unknown correction method '{}'",
                other
            ))),
        }
    }
}

/// What to do with missing raw p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Missing stays missing and does not count towards the number of tests.
    #[default]
    Propagate,
    /// Any missing value is an error.
    FailFast,
}

/// Adjust a column of raw p-values, keeping positions.
///
/// Only present values are adjusted, and the number of tests is the number
/// of present values. Fails with `EmptyData` when there is nothing to
/// adjust and with `IncompleteData` on a missing value under
/// [`MissingPolicy::FailFast`].
pub fn adjust(
    p_values: &[Option<f64>],
    method: CorrectionMethod,
    policy: MissingPolicy,
) -> Result<Vec<Option<f64>>> {
    if p_values.is_empty() {
        return Err(DaaError::EmptyData("No p-values to correct".to_string()));
    }
    if policy == MissingPolicy::FailFast {
        if let Some(idx) = p_values.iter().position(|p| p.is_none()) {
            return Err(DaaError::IncompleteData(format!(
                "p-value at position {} is missing",
                idx
            )));
        }
    }

    let present: Vec<(usize, f64)> = p_values
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.map(|v| (i, v)))
        .collect();
    if present.is_empty() {
        return Err(DaaError::EmptyData(
            "Every p-value is missing; nothing to correct".to_string(),
        ));
    }
    if let Some((i, p)) = present
        .iter()
        .find(|(_, p)| !(0.0..=1.0).contains(p))
    {
        return Err(DaaError::InvalidParameter(format!(
            "p-value {} at position {} is outside [0, 1]",
            p, i
        )));
    }

    let raw: Vec<f64> = present.iter().map(|&(_, p)| p).collect();
    let adjusted = method.apply(&raw);

    let mut out = vec![None; p_values.len()];
    for (&(i, _), q) in present.iter().zip(adjusted) {
        out[i] = Some(q);
    }
    Ok(out)
}

/// Indices that sort `p_values` ascending.
pub(crate) fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..p_values.len()).collect();
    indices.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices
}
