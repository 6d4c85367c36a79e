//! Wilcoxon rank-sum (Mann-Whitney U) test.

use super::{median, rank_with_ties, split_two, TaxonTest, TestOutput};
use crate::data::TaxonFrame;
use crate::error::TestFailure;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Group size below which, without ties, the exact null distribution is used.
const EXACT_LIMIT: usize = 50;

/// Two-sided Wilcoxon rank-sum test between the run's two levels.
///
/// The statistic is `W = R1 - n1 (n1 + 1) / 2` with `R1` the rank sum of
/// the first level. Effect is `median(second) - median(first)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WilcoxonTest;

impl TaxonTest for WilcoxonTest {
    fn name(&self) -> String {
        "wilcoxon".to_string()
    }

    fn required_levels(&self) -> Option<usize> {
        Some(2)
    }

    fn is_parametric(&self) -> bool {
        false
    }

    fn apply(&self, frame: &TaxonFrame) -> Result<TestOutput, TestFailure> {
        let (first, second) = split_two(frame, false, 1)?;
        let (m, n) = (first.len(), second.len());

        let pooled: Vec<f64> = first.iter().chain(second.iter()).copied().collect();
        let (ranks, ties) = rank_with_ties(&pooled);
        if ties.first() == Some(&pooled.len()) {
            return Err(TestFailure::AllTied);
        }

        let rank_sum: f64 = ranks[..m].iter().sum();
        let w = rank_sum - (m * (m + 1)) as f64 / 2.0;

        let p_value = if m < EXACT_LIMIT && n < EXACT_LIMIT && ties.is_empty() {
            exact_p_value(w.round() as usize, m, n)
        } else {
            normal_p_value(w, m, n, &ties)?
        };

        Ok(TestOutput {
            p_value,
            statistic: w,
            effect: Some(median(&second) - median(&first)),
        })
    }
}

/// Two-sided exact p-value of `W = q` for group sizes `m`, `n`.
fn exact_p_value(q: usize, m: usize, n: usize) -> f64 {
    let probs = exact_distribution(m, n);
    let mn = m * n;
    let p = if 2 * q > mn {
        probs[q..].iter().sum::<f64>()
    } else {
        probs[..=q].iter().sum::<f64>()
    };
    (2.0 * p).min(1.0)
}

/// `P(W = u)` for `u = 0..=m*n` under the null, without ties.
///
/// Counts subsets of `m` ranks out of `1..=m+n` by rank sum.
fn exact_distribution(m: usize, n: usize) -> Vec<f64> {
    let total = m + n;
    let min_sum = m * (m + 1) / 2;
    let max_sum = min_sum + m * n;

    // ways[j][s]: subsets of size j with rank sum s
    let mut ways = vec![vec![0.0f64; max_sum + 1]; m + 1];
    ways[0][0] = 1.0;
    for r in 1..=total {
        for j in (1..=m.min(r)).rev() {
            for s in (r..=max_sum).rev() {
                let prev = ways[j - 1][s - r];
                if prev > 0.0 {
                    ways[j][s] += prev;
                }
            }
        }
    }

    let counts = &ways[m][min_sum..=max_sum];
    let norm: f64 = counts.iter().sum();
    counts.iter().map(|c| c / norm).collect()
}

/// Two-sided normal approximation with tie and continuity correction.
fn normal_p_value(w: f64, m: usize, n: usize, ties: &[usize]) -> Result<f64, TestFailure> {
    let (mf, nf) = (m as f64, n as f64);
    let total = mf + nf;
    let tie_term: f64 = ties
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum::<f64>()
        / (total * (total - 1.0));
    let sigma = ((mf * nf / 12.0) * ((total + 1.0) - tie_term)).sqrt();
    if sigma <= 0.0 || !sigma.is_finite() {
        return Err(TestFailure::AllTied);
    }

    let diff = w - mf * nf / 2.0;
    let correction = if diff > 0.0 {
        0.5
    } else if diff < 0.0 {
        -0.5
    } else {
        0.0
    };
    let z = (diff - correction) / sigma;

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| TestFailure::Numerical(format!("normal distribution: {}", e)))?;
    Ok((2.0 * normal.cdf(-z.abs())).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::two_group_frame;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_complete_separation() {
        // wilcox.test(c(1, 2, 3), c(4, 5, 6)): W = 0, p = 0.1
        let frame = two_group_frame(&[1, 2, 3], &[4, 5, 6]);
        let out = WilcoxonTest.apply(&frame).unwrap();
        assert_relative_eq!(out.statistic, 0.0);
        assert_relative_eq!(out.p_value, 0.1, epsilon = 1e-12);
        assert_relative_eq!(out.effect.unwrap(), 3.0);
    }

    #[test]
    fn test_exact_distribution_sums_to_one() {
        let probs = exact_distribution(4, 5);
        assert_eq!(probs.len(), 21);
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // symmetric around mn/2
        for u in 0..=20 {
            assert_relative_eq!(probs[u], probs[20 - u], epsilon = 1e-12);
        }
        // 1 / C(9, 4)
        assert_relative_eq!(probs[0], 1.0 / 126.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normal_approximation_with_ties() {
        // wilcox.test(c(5, 23), c(6, 24, 6, 38)): W = 2, p = 0.4811
        let frame = two_group_frame(&[5, 23], &[6, 24, 6, 38]);
        let out = WilcoxonTest.apply(&frame).unwrap();
        assert_relative_eq!(out.statistic, 2.0);
        assert_relative_eq!(out.p_value, 0.48112, epsilon = 1e-4);
        assert_relative_eq!(out.effect.unwrap(), 1.0);
    }

    #[test]
    fn test_all_tied() {
        let frame = two_group_frame(&[0, 0], &[0, 0, 0]);
        assert_eq!(WilcoxonTest.apply(&frame).unwrap_err(), TestFailure::AllTied);
    }

    #[test]
    fn test_single_group_represented() {
        let frame = two_group_frame(&[], &[1, 2]);
        assert!(matches!(
            WilcoxonTest.apply(&frame),
            Err(TestFailure::WrongLevelCount { found: 1, .. })
        ));
    }
}
