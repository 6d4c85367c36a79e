//! Median-of-ratios size factors for count models.
//!
//! Each sample's size factor is the median, over taxa, of the ratio between
//! its count and the taxon's geometric mean across samples. Count GLMs use
//! `ln(size_factor)` as an offset.

use crate::data::CountMatrix;
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};

/// How reference geometric means are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeFactorMethod {
    /// Only taxa with a non-zero count in every sample contribute.
    Ratio,
    /// Geometric means over positive counts, so sparse tables still work.
    /// Factors are rescaled to a geometric mean of one.
    #[default]
    PosCounts,
}

/// Estimate one size factor per sample.
pub fn size_factors(counts: &CountMatrix, method: SizeFactorMethod) -> Result<Vec<f64>> {
    let n_samples = counts.n_samples();
    if n_samples == 0 || counts.n_taxa() == 0 {
        return Err(DaaError::EmptyData(
            "Cannot estimate size factors of an empty table".to_string(),
        ));
    }

    let rows: Vec<Vec<u64>> = (0..counts.n_taxa()).map(|r| counts.row_dense(r)).collect();

    // log geometric mean per taxon; None when the taxon cannot act as reference
    let log_geo_means: Vec<Option<f64>> = rows
        .iter()
        .map(|row| match method {
            SizeFactorMethod::Ratio => {
                if row.iter().all(|&c| c > 0) {
                    Some(row.iter().map(|&c| (c as f64).ln()).sum::<f64>() / n_samples as f64)
                } else {
                    None
                }
            }
            SizeFactorMethod::PosCounts => {
                if row.iter().any(|&c| c > 0) {
                    let sum: f64 = row.iter().filter(|&&c| c > 0).map(|&c| (c as f64).ln()).sum();
                    Some(sum / n_samples as f64)
                } else {
                    None
                }
            }
        })
        .collect();

    if log_geo_means.iter().all(|g| g.is_none()) {
        return Err(DaaError::EmptyData(
            "Every taxon contains at least one zero; use pos_counts size factors".to_string(),
        ));
    }

    let mut factors = Vec::with_capacity(n_samples);
    for (col, sample_id) in counts.sample_ids().iter().enumerate() {
        let mut log_ratios: Vec<f64> = rows
            .iter()
            .zip(log_geo_means.iter())
            .filter_map(|(row, lgm)| {
                let lgm = (*lgm)?;
                let c = row[col];
                (c > 0).then(|| (c as f64).ln() - lgm)
            })
            .collect();
        if log_ratios.is_empty() {
            return Err(DaaError::EmptyData(format!(
                "Sample '{}' has no counts usable for size factor estimation",
                sample_id
            )));
        }
        factors.push(median(&mut log_ratios).exp());
    }

    if method == SizeFactorMethod::PosCounts {
        let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
        for f in factors.iter_mut() {
            *f /= log_mean.exp();
        }
    }

    Ok(factors)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
