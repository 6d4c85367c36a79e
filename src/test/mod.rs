//! Per-taxon statistical tests.
//!
//! Every test implements [`TaxonTest`] and sees one taxon at a time through
//! a [`TaxonFrame`]. Failures are returned as [`TestFailure`] and recorded
//! by the pipeline rather than aborting the run.
//!
//! - **t_test**: Welch or Student two-sample t-test
//! - **wilcoxon**: Wilcoxon rank-sum (Mann-Whitney) test
//! - **kruskal**: Kruskal-Wallis rank test over any number of levels
//! - **glm**: Wald test of a coefficient in a per-taxon GLM

pub mod t_test;
pub mod wilcoxon;

use crate::data::{Metadata, ModelSpec, TaxonFrame};
use crate::error::{Result, TestFailure};
use serde::{Deserialize, Serialize};

pub use glm::GlmTest;
pub use kruskal::KruskalWallisTest;
pub use t_test::TTest;
pub use wilcoxon::WilcoxonTest;

/// Outcome of one test on one taxon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutput {
    pub p_value: f64,
    pub statistic: f64,
    /// Effect size on the test's own scale; `None` when the test has none.
    pub effect: Option<f64>,
}

/// A statistical test applied independently to each taxon.
pub trait TaxonTest: Send + Sync {
    /// Column name of this test in the results table.
    fn name(&self) -> String;

    /// Parametric tests see transformed values, the others raw counts.
    fn is_parametric(&self) -> bool;

    fn apply(&self, frame: &TaxonFrame) -> std::result::Result<TestOutput, TestFailure>;

    /// Run-level checks against the metadata before any taxon is tested.
    fn validate(&self, _metadata: &Metadata) -> Result<()> {
        Ok(())
    }

    /// Metadata columns besides the grouping column that frames must carry.
    fn covariates(&self) -> Vec<String> {
        Vec::new()
    }

    /// Number of grouping levels the test compares, when it is fixed.
    fn required_levels(&self) -> Option<usize> {
        None
    }

    /// Whether frames must carry median-of-ratios size factors.
    fn needs_size_factors(&self) -> bool {
        false
    }
}

/// Serializable description of a test, as written in pipeline configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "test")]
pub enum TestSpec {
    TTest {
        #[serde(default)]
        equal_variance: bool,
    },
    Wilcoxon,
    KruskalWallis,
    Glm {
        model: ModelSpec,
        coefficient: String,
    },
    /// Negative binomial GLM of the grouping column (plus covariates) with
    /// median-of-ratios size factors.
    Deseq {
        coefficient: String,
        #[serde(default)]
        covariates: Vec<String>,
    },
}

impl TestSpec {
    /// Instantiate the test for a run grouped by `group_column`.
    pub fn build(&self, group_column: &str) -> Box<dyn TaxonTest> {
        match self {
            TestSpec::TTest { equal_variance } => Box::new(TTest {
                equal_variance: *equal_variance,
            }),
            TestSpec::Wilcoxon => Box::new(WilcoxonTest),
            TestSpec::KruskalWallis => Box::new(KruskalWallisTest),
            TestSpec::Glm { model, coefficient } => {
                Box::new(GlmTest::new(model.clone(), coefficient))
            }
            TestSpec::Deseq {
                coefficient,
                covariates,
            } => {
                let mut predictors: Vec<&str> = vec![group_column];
                predictors.extend(covariates.iter().map(|c| c.as_str()));
                Box::new(GlmTest::new(ModelSpec::deseq(&predictors), coefficient))
            }
        }
    }
}

/// The two groups of a two-sample test, in run level order.
///
/// Requires exactly two levels in the run and at least `required`
/// observations in each.
pub(crate) fn split_two(
    frame: &TaxonFrame,
    transformed: bool,
    required: usize,
) -> std::result::Result<(Vec<f64>, Vec<f64>), TestFailure> {
    if frame.group_levels.len() != 2 {
        return Err(TestFailure::WrongLevelCount {
            expected: "2".to_string(),
            found: frame.group_levels.len(),
        });
    }
    let take = |level: &String| {
        let values = frame.group_values(level, transformed);
        if values.len() < required {
            return Err(TestFailure::TooFewObservations {
                level: level.clone(),
                found: values.len(),
                required,
            });
        }
        Ok(values)
    };
    let first = take(&frame.group_levels[0])?;
    let second = take(&frame.group_levels[1])?;
    Ok((first, second))
}

/// Average ranks (1-based) of `values`, and the sizes of tied runs.
pub(crate) fn rank_with_ties(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut ties = Vec::new();
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let avg = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        if j > i {
            ties.push(j - i + 1);
        }
        i = j + 1;
    }
    (ranks, ties)
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with `n - 1` denominator.
pub(crate) fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::data::{CountMatrix, FrameContext, Metadata, TaxonFrame, Variable};

    /// Frame of a single taxon with the given counts per group, groups in
    /// the order listed.
    pub fn two_group_frame(first: &[u64], second: &[u64]) -> TaxonFrame {
        let groups: Vec<(&str, &[u64])> = vec![("A", first), ("B", second)];
        grouped_frame(&groups)
    }

    pub fn grouped_frame(groups: &[(&str, &[u64])]) -> TaxonFrame {
        let mut samples = Vec::new();
        let mut row = Vec::new();
        let mut labels = Vec::new();
        for (level, counts) in groups {
            for &c in counts.iter() {
                samples.push(format!("s{}", samples.len() + 1));
                row.push(c);
                labels.push(Variable::Categorical(level.to_string()));
            }
        }
        let counts = CountMatrix::from_rows(vec!["taxon".into()], samples.clone(), &[row])
            .expect("valid counts");
        let metadata = Metadata::from_columns(samples, vec![("group".into(), labels)])
            .expect("valid metadata");
        FrameContext::new(&counts, &metadata, "group", None, &[])
            .expect("aligned")
            .frame(&counts, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rank_with_ties() {
        let (ranks, ties) = rank_with_ties(&[5.0, 23.0, 6.0, 24.0, 6.0, 38.0]);
        assert_eq!(ranks, vec![1.0, 4.0, 2.5, 5.0, 2.5, 6.0]);
        assert_eq!(ties, vec![2]);
    }

    #[test]
    fn test_summaries() {
        assert_relative_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_relative_eq!(variance(&[1.0, 2.0, 3.0]), 1.0);
        assert_relative_eq!(median(&[6.0, 24.0, 6.0, 38.0]), 15.0);
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }

    #[test]
    fn test_split_two_requires_two_levels() {
        let frame = fixtures::grouped_frame(&[("A", &[1, 2]), ("B", &[3, 4]), ("C", &[5, 6])]);
        assert!(matches!(
            split_two(&frame, false, 2),
            Err(TestFailure::WrongLevelCount { found: 3, .. })
        ));
    }

    #[test]
    fn test_test_spec_yaml() {
        let yaml = "- test: t_test\n- test: wilcoxon\n- test: deseq\n  coefficient: groupB\n";
        let specs: Vec<TestSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs[0], TestSpec::TTest { equal_variance: false });
        let deseq = specs[2].build("group");
        assert!(deseq.needs_size_factors());
        assert_eq!(deseq.covariates(), vec!["group".to_string()]);
    }
}
