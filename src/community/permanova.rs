//! One-factor PERMANOVA on Bray-Curtis dissimilarities.
//!
//! The pseudo-F of the grouping factor is compared with its distribution
//! under random relabelling of samples:
//!
//! ```text
//! SS_T = 1/N   sum_{i<j} d_ij^2
//! SS_W = sum_g 1/n_g sum_{i<j in g} d_ij^2
//! F    = (SS_B / (a - 1)) / (SS_W / (N - a))
//! p    = (#{F_perm >= F_obs - eps} + 1) / (n_permutations + 1)
//! ```

use super::bray_curtis_matrix;
use crate::data::{CountMatrix, Metadata};
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for PERMANOVA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanovaConfig {
    /// Number of label permutations.
    #[serde(default = "default_permutations")]
    pub n_permutations: usize,
    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_permutations() -> usize {
    999
}

fn default_seed() -> u64 {
    42
}

impl Default for PermanovaConfig {
    fn default() -> Self {
        Self {
            n_permutations: default_permutations(),
            seed: default_seed(),
        }
    }
}

/// PERMANOVA table for one grouping factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanovaResult {
    pub group_column: String,
    pub n_samples: usize,
    pub n_groups: usize,
    pub df_between: usize,
    pub df_within: usize,
    pub ss_between: f64,
    pub ss_within: f64,
    pub ss_total: f64,
    pub f_statistic: f64,
    /// Fraction of total dispersion explained by the grouping.
    pub r_squared: f64,
    pub p_value: f64,
    pub n_permutations: usize,
}

impl std::fmt::Display for PermanovaResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PERMANOVA on Bray-Curtis, factor '{}'", self.group_column)?;
        writeln!(f, "  samples: {}, groups: {}", self.n_samples, self.n_groups)?;
        writeln!(f, "  Df      SumsOfSqs   F          R2       Pr(>F)")?;
        writeln!(
            f,
            "  {:<7} {:<11.5} {:<10.4} {:<8.5} {:.4}",
            self.df_between, self.ss_between, self.f_statistic, self.r_squared, self.p_value
        )?;
        writeln!(f, "  {:<7} {:<11.5}", self.df_within, self.ss_within)?;
        write!(f, "  permutations: {}", self.n_permutations)
    }
}

/// Test whether community composition differs between levels of
/// `group_column`.
///
/// Samples with a missing group are left out. Requires aligned metadata,
/// at least two groups, more samples than groups and no empty sample.
pub fn permanova(
    counts: &CountMatrix,
    metadata: &Metadata,
    group_column: &str,
    config: &PermanovaConfig,
) -> Result<PermanovaResult> {
    metadata.check_alignment(counts.sample_ids())?;
    if config.n_permutations == 0 {
        return Err(DaaError::InvalidParameter(
            "n_permutations must be positive".to_string(),
        ));
    }

    let levels = metadata.levels(group_column)?;
    let mut samples = Vec::new();
    let mut groups = Vec::new();
    for (j, value) in metadata.column(group_column)?.into_iter().enumerate() {
        if let Some(level) = value.as_level() {
            samples.push(j);
            groups.push(levels.iter().position(|l| *l == level).unwrap_or(0));
        }
    }

    let n = samples.len();
    let a = levels.len();
    if a < 2 {
        return Err(DaaError::InvalidParameter(format!(
            "Column '{}' needs at least 2 groups, found {}",
            group_column, a
        )));
    }
    if n <= a {
        return Err(DaaError::InvalidParameter(format!(
            "{} samples are too few for {} groups",
            n, a
        )));
    }

    let dist = bray_curtis_matrix(counts, &samples)?;
    let squared = dist.map(|d| d * d);

    let ss_total = upper_sum(&squared) / n as f64;
    let ss_within = within_ss(&squared, &groups, a);
    if ss_within <= 0.0 {
        return Err(DaaError::Numerical(
            "Within-group dispersion is zero".to_string(),
        ));
    }
    let ss_between = ss_total - ss_within;
    let df_between = a - 1;
    let df_within = n - a;
    let f_stat = pseudo_f(ss_total, ss_within, df_between, df_within);

    info!(
        group_column,
        n_samples = n,
        n_groups = a,
        f = f_stat,
        "PERMANOVA observed statistic"
    );

    let exceed = (0..config.n_permutations)
        .into_par_iter()
        .filter(|&perm| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(perm as u64));
            let mut shuffled = groups.clone();
            shuffled.shuffle(&mut rng);
            let ss_w = within_ss(&squared, &shuffled, a);
            reaches(pseudo_f(ss_total, ss_w, df_between, df_within), f_stat)
        })
        .count();

    let p_value = (exceed + 1) as f64 / (config.n_permutations + 1) as f64;
    debug!(exceed, p_value, "PERMANOVA permutations done");

    Ok(PermanovaResult {
        group_column: group_column.to_string(),
        n_samples: n,
        n_groups: a,
        df_between,
        df_within,
        ss_between,
        ss_within,
        ss_total,
        f_statistic: f_stat,
        r_squared: ss_between / ss_total,
        p_value,
        n_permutations: config.n_permutations,
    })
}

/// Slack for counting a permuted F as reaching the observed one, so
/// relabellings that tie up to rounding are counted. Equals `sqrt(f64::EPSILON)`.
const F_TOLERANCE: f64 = 1.490_116_119_384_765_6e-8;

fn reaches(f_perm: f64, f_obs: f64) -> bool {
    f_perm >= f_obs - F_TOLERANCE
}

fn pseudo_f(ss_total: f64, ss_within: f64, df_between: usize, df_within: usize) -> f64 {
    if ss_within <= 0.0 {
        return f64::INFINITY;
    }
    ((ss_total - ss_within) / df_between as f64) / (ss_within / df_within as f64)
}

fn upper_sum(squared: &DMatrix<f64>) -> f64 {
    let n = squared.nrows();
    (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| squared[(i, j)])
        .sum()
}

fn within_ss(squared: &DMatrix<f64>, groups: &[usize], n_groups: usize) -> f64 {
    let mut sums = vec![0.0; n_groups];
    let mut sizes = vec![0usize; n_groups];
    for (i, &g) in groups.iter().enumerate() {
        sizes[g] += 1;
        for j in i + 1..groups.len() {
            if groups[j] == g {
                sums[g] += squared[(i, j)];
            }
        }
    }
    sums.iter()
        .zip(sizes.iter())
        .filter(|(_, &size)| size > 0)
        .map(|(s, &size)| s / size as f64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Variable;
    use approx::assert_relative_eq;

    fn separated() -> (CountMatrix, Metadata) {
        let samples: Vec<String> = (1..=8).map(|i| format!("s{}", i)).collect();
        let counts = CountMatrix::from_rows(
            vec!["a".into(), "b".into()],
            samples.clone(),
            &[
                vec![50, 48, 52, 47, 5, 6, 4, 7],
                vec![5, 6, 4, 7, 50, 48, 52, 47],
            ],
        )
        .unwrap();
        let group = (0..8)
            .map(|i| Variable::Categorical(if i < 4 { "A" } else { "B" }.to_string()))
            .collect();
        let metadata = Metadata::from_columns(samples, vec![("group".into(), group)]).unwrap();
        (counts, metadata)
    }

    #[test]
    fn test_separated_groups() {
        let (counts, metadata) = separated();
        let result = permanova(&counts, &metadata, "group", &PermanovaConfig::default()).unwrap();

        assert_eq!(result.df_between, 1);
        assert_eq!(result.df_within, 6);
        assert!(result.r_squared > 0.9);
        assert_relative_eq!(
            result.ss_between + result.ss_within,
            result.ss_total,
            epsilon = 1e-12
        );
        // 35 distinct splits, the observed one is the most extreme
        assert!(result.p_value < 0.1);
        assert!(result.p_value >= 1.0 / 1000.0);
    }

    #[test]
    fn test_rounding_ties_are_counted() {
        let f = 3.0f64;
        assert!(reaches(f, f));
        assert!(reaches(f - 1e-12, f));
        assert!(!reaches(f - 1e-3, f));
        assert!(reaches(f64::INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_label_swap_counts_as_tie() {
        // Swapping A and B gives the observed split back, so 2 of the 70
        // labellings reach the observed F: p is about 1/35.
        let (counts, metadata) = separated();
        let config = PermanovaConfig {
            n_permutations: 4999,
            seed: 11,
        };
        let result = permanova(&counts, &metadata, "group", &config).unwrap();
        assert!(result.p_value > 0.018 && result.p_value < 0.042);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let (counts, metadata) = separated();
        let config = PermanovaConfig {
            n_permutations: 199,
            seed: 7,
        };
        let a = permanova(&counts, &metadata, "group", &config).unwrap();
        let b = permanova(&counts, &metadata, "group", &config).unwrap();
        assert_eq!(a.p_value, b.p_value);
        assert_eq!(a.f_statistic, b.f_statistic);
    }

    #[test]
    fn test_requires_alignment() {
        let (counts, metadata) = separated();
        let mut order: Vec<String> = counts.sample_ids().to_vec();
        order.swap(0, 1);
        let shuffled = metadata.align_to(&order).unwrap();
        assert!(matches!(
            permanova(&counts, &shuffled, "group", &PermanovaConfig::default()),
            Err(DaaError::Alignment(_))
        ));
    }

    #[test]
    fn test_single_group_rejected() {
        let (counts, _) = separated();
        let samples = counts.sample_ids().to_vec();
        let group = vec![Variable::Categorical("A".into()); 8];
        let metadata = Metadata::from_columns(samples, vec![("group".into(), group)]).unwrap();
        assert!(permanova(&counts, &metadata, "group", &PermanovaConfig::default()).is_err());
    }
}
