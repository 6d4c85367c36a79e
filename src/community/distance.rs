//! Bray-Curtis dissimilarity.

use crate::data::CountMatrix;
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Bray-Curtis dissimilarity `sum |a - b| / sum (a + b)` of two profiles.
///
/// Two empty profiles are at distance 0.
pub fn bray_curtis(a: &[u64], b: &[u64]) -> f64 {
    let (diff, total) = a.iter().zip(b.iter()).fold((0u64, 0u64), |(d, t), (&x, &y)| {
        (d + x.abs_diff(y), t + x + y)
    });
    if total == 0 {
        0.0
    } else {
        diff as f64 / total as f64
    }
}

/// Symmetric samples × samples Bray-Curtis matrix over the given sample
/// columns of `counts`.
///
/// Fails with `EmptyData` if any selected sample has no reads.
pub fn bray_curtis_matrix(counts: &CountMatrix, samples: &[usize]) -> Result<DMatrix<f64>> {
    let profiles: Vec<Vec<u64>> = samples.iter().map(|&j| counts.col_dense(j)).collect();
    if let Some(pos) = profiles.iter().position(|p| p.iter().all(|&c| c == 0)) {
        return Err(DaaError::EmptyData(format!(
            "Sample '{}' has no reads",
            counts.sample_ids()[samples[pos]]
        )));
    }

    let n = profiles.len();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| (0..n).map(|j| bray_curtis(&profiles[i], &profiles[j])).collect())
        .collect();
    Ok(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
}
