//! Two-sample t-test (Welch or Student).

use super::{mean, split_two, variance, TaxonTest, TestOutput};
use crate::data::TaxonFrame;
use crate::error::TestFailure;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Two-sided two-sample t-test between the run's two levels.
///
/// Effect is `mean(second) - mean(first)` and the statistic carries the
/// same sign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    /// Pooled variance (Student) instead of Welch's unequal variances.
    pub equal_variance: bool,
}

impl TTest {
    pub fn welch() -> Self {
        Self {
            equal_variance: false,
        }
    }

    pub fn student() -> Self {
        Self {
            equal_variance: true,
        }
    }
}

impl TaxonTest for TTest {
    fn name(&self) -> String {
        if self.equal_variance {
            "student_t".to_string()
        } else {
            "welch_t".to_string()
        }
    }

    fn required_levels(&self) -> Option<usize> {
        Some(2)
    }

    fn is_parametric(&self) -> bool {
        true
    }

    fn apply(&self, frame: &TaxonFrame) -> Result<TestOutput, TestFailure> {
        let (first, second) = split_two(frame, true, 2)?;
        let (n1, n2) = (first.len() as f64, second.len() as f64);
        let (m1, m2) = (mean(&first), mean(&second));
        let (v1, v2) = (variance(&first), variance(&second));

        let (se, df) = if self.equal_variance {
            let pooled = ((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / (n1 + n2 - 2.0);
            ((pooled * (1.0 / n1 + 1.0 / n2)).sqrt(), n1 + n2 - 2.0)
        } else {
            let a = v1 / n1;
            let b = v2 / n2;
            // Welch-Satterthwaite
            let df = (a + b).powi(2) / (a * a / (n1 - 1.0) + b * b / (n2 - 1.0));
            ((a + b).sqrt(), df)
        };

        if se <= 0.0 || !se.is_finite() {
            return Err(TestFailure::ZeroVariance);
        }

        let effect = m2 - m1;
        let statistic = effect / se;
        let t_dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|e| TestFailure::Numerical(format!("t distribution: {}", e)))?;
        let p_value = (2.0 * t_dist.sf(statistic.abs())).clamp(0.0, 1.0);

        Ok(TestOutput {
            p_value,
            statistic,
            effect: Some(effect),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::{grouped_frame, two_group_frame};
    use approx::assert_relative_eq;

    #[test]
    fn test_welch_dialister() {
        // t.test(c(6, 24, 6, 38), c(5, 23))
        let frame = two_group_frame(&[5, 23], &[6, 24, 6, 38]);
        let out = TTest::welch().apply(&frame).unwrap();

        assert_relative_eq!(out.effect.unwrap(), 4.5, epsilon = 1e-12);
        // se^2 = 162/2 + 241/4
        assert_relative_eq!(out.statistic, 4.5 / 141.25f64.sqrt(), epsilon = 1e-12);
        assert!(out.p_value > 0.5 && out.p_value < 1.0);
    }

    #[test]
    fn test_student_known_value() {
        // pooled variance 1, se = sqrt(2/3), t = 4 / 0.8165 = 4.899, df = 4
        let frame = two_group_frame(&[1, 2, 3], &[5, 6, 7]);
        let out = TTest::student().apply(&frame).unwrap();
        assert_relative_eq!(out.statistic, 4.0 / (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(out.p_value, 0.008050, epsilon = 1e-5);
    }

    #[test]
    fn test_too_few_observations() {
        let frame = two_group_frame(&[5], &[6, 24, 6]);
        assert_eq!(
            TTest::welch().apply(&frame).unwrap_err(),
            TestFailure::TooFewObservations {
                level: "A".into(),
                found: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_zero_variance() {
        let frame = two_group_frame(&[3, 3], &[3, 3, 3]);
        assert_eq!(
            TTest::welch().apply(&frame).unwrap_err(),
            TestFailure::ZeroVariance
        );
    }

    #[test]
    fn test_extreme_separation_keeps_positive_p() {
        // 10 vs 10 with near-constant groups: t in the thousands, df ~ 18
        let low: Vec<u64> = (0..10).map(|i| 100 + i % 2).collect();
        let high: Vec<u64> = (0..10).map(|i| 5000 + i % 2).collect();
        let higher: Vec<u64> = (0..10).map(|i| 9000 + i % 2).collect();

        let strong = TTest::welch().apply(&two_group_frame(&low, &high)).unwrap();
        let stronger = TTest::welch().apply(&two_group_frame(&low, &higher)).unwrap();

        assert!(strong.statistic > 1000.0);
        assert!(strong.p_value > 0.0 && strong.p_value < 1e-30);
        assert!(stronger.p_value > 0.0);
        assert!(stronger.p_value < strong.p_value);
    }

    #[test]
    fn test_single_level_run() {
        let frame = grouped_frame(&[("A", &[1, 2, 3])]);
        assert!(matches!(
            TTest::welch().apply(&frame),
            Err(TestFailure::WrongLevelCount { found: 1, .. })
        ));
    }
}
