//! Benjamini-Hochberg and Benjamini-Yekutieli false discovery rate correction.

use super::ascending_order;

/// Apply Benjamini-Hochberg FDR correction.
///
/// For p-values sorted ascending, `q[i] = min(p[i] * m / rank[i], q[i+1])`,
/// capped at 1. The largest p-value is left unchanged.
pub fn correct_bh(p_values: &[f64]) -> Vec<f64> {
    step_up(p_values, 1.0)
}

/// Apply Benjamini-Yekutieli FDR correction, valid under arbitrary
/// dependence. BH scaled by `sum_{i=1}^m 1/i`.
pub fn correct_by(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let harmonic: f64 = (1..=m).map(|i| 1.0 / i as f64).sum();
    step_up(p_values, harmonic)
}

fn step_up(p_values: &[f64], scale: f64) -> Vec<f64> {
    let n = p_values.len();
    if n == 0 {
        return Vec::new();
    }

    let indices = ascending_order(p_values);
    let n_f64 = n as f64;

    // Start from largest p-value
    let mut q_sorted = vec![0.0; n];
    q_sorted[n - 1] = (p_values[indices[n - 1]] * scale).min(1.0);

    for i in (0..n - 1).rev() {
        let rank = i + 1;
        let adjusted = p_values[indices[i]] * scale * n_f64 / rank as f64;
        q_sorted[i] = adjusted.min(q_sorted[i + 1]).min(1.0);
    }

    // Restore original order
    let mut q_values = vec![0.0; n];
    for (i, &orig_idx) in indices.iter().enumerate() {
        q_values[orig_idx] = q_sorted[i];
    }
    q_values
}
