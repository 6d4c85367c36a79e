//! Holm and Bonferroni family-wise error rate correction.

use super::ascending_order;

/// Bonferroni: `min(1, m * p)`.
pub fn correct_bonferroni(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len() as f64;
    p_values.iter().map(|&p| (p * m).min(1.0)).collect()
}

/// Holm step-down: for p-values sorted ascending,
/// `q[i] = max_{j <= i} min(1, (m - j) * p[j])` with zero-based `j`.
pub fn correct_holm(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    let indices = ascending_order(p_values);

    let mut q_values = vec![0.0; n];
    let mut running = 0.0f64;
    for (i, &orig_idx) in indices.iter().enumerate() {
        let adjusted = (p_values[orig_idx] * (n - i) as f64).min(1.0);
        running = running.max(adjusted);
        q_values[orig_idx] = running;
    }
    q_values
}
