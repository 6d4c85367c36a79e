//! Per-taxon paired record set: abundance, group and covariates per sample.

use crate::data::{CountMatrix, Metadata, Variable, VariableType};
use crate::error::{DaaError, Result};
use crate::filter::Detection;
use crate::normalize::Transform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which samples enter a taxon's frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SampleScope {
    /// Every sample with a grouping value.
    #[default]
    All,
    /// Only samples in which the taxon is detected (presence-conditional
    /// testing). A taxon detected in a single group then cannot be tested
    /// between groups and is reported with a missing p-value.
    Detected { detection: Detection },
}

/// Everything one test needs about one taxon.
///
/// Samples are those of the run, minus samples whose grouping value is
/// missing or outside the configured levels, minus samples excluded by the
/// [`SampleScope`]. Every vector is indexed the same way.
#[derive(Debug, Clone)]
pub struct TaxonFrame {
    pub taxon_id: String,
    pub sample_ids: Vec<String>,
    /// Raw counts.
    pub counts: Vec<f64>,
    /// Counts after the run's transform.
    pub values: Vec<f64>,
    /// Grouping level per sample.
    pub groups: Vec<String>,
    /// Run-wide level order of the grouping column; first is the reference.
    pub group_levels: Vec<String>,
    /// Name of the grouping column.
    pub group_column: String,
    /// Additional metadata columns, including the grouping column.
    pub covariates: BTreeMap<String, Vec<Variable>>,
    /// Run-wide level order of categorical covariates.
    pub categorical_levels: BTreeMap<String, Vec<String>>,
    /// Size factor per sample, when the run computed them.
    pub size_factors: Option<Vec<f64>>,
}

impl TaxonFrame {
    /// Number of samples in the frame.
    pub fn n(&self) -> usize {
        self.sample_ids.len()
    }

    /// Levels that actually occur in this frame, in run order.
    pub fn levels_present(&self) -> Vec<&str> {
        self.group_levels
            .iter()
            .filter(|level| self.groups.iter().any(|g| g == *level))
            .map(|s| s.as_str())
            .collect()
    }

    /// Values of one group, raw or transformed.
    pub fn group_values(&self, level: &str, transformed: bool) -> Vec<f64> {
        let source = if transformed { &self.values } else { &self.counts };
        self.groups
            .iter()
            .zip(source.iter())
            .filter(|(g, _)| g.as_str() == level)
            .map(|(_, &v)| v)
            .collect()
    }

    /// Values split by every level of the run, in level order.
    pub fn split(&self, transformed: bool) -> Vec<(String, Vec<f64>)> {
        self.group_levels
            .iter()
            .map(|level| (level.clone(), self.group_values(level, transformed)))
            .collect()
    }
}

/// Run-wide context from which per-taxon frames are cut.
///
/// Built once after alignment has been verified; holds only immutable
/// copies of what frames need, so frames can be built from many threads.
#[derive(Debug, Clone)]
pub struct FrameContext {
    group_column: String,
    sample_ids: Vec<String>,
    /// Grouping level per sample; `None` excludes the sample.
    groups: Vec<Option<String>>,
    group_levels: Vec<String>,
    covariates: BTreeMap<String, Vec<Variable>>,
    categorical_levels: BTreeMap<String, Vec<String>>,
    library_sizes: Vec<f64>,
    size_factors: Option<Vec<f64>>,
    transform: Transform,
    scope: SampleScope,
}

impl FrameContext {
    /// Prepare frames for `counts`, grouped by `group_column`.
    ///
    /// Fails with `Alignment` unless metadata lists the count matrix's
    /// samples in the same order. `level_order`, when given, fixes the
    /// level order (reference first) and restricts the run to those levels.
    pub fn new(
        counts: &CountMatrix,
        metadata: &Metadata,
        group_column: &str,
        level_order: Option<&[String]>,
        covariate_columns: &[&str],
    ) -> Result<Self> {
        metadata.check_alignment(counts.sample_ids())?;

        let present = metadata.levels(group_column)?;
        let group_levels: Vec<String> = match level_order {
            Some(order) => {
                if let Some(unknown) = order.iter().find(|l| !present.contains(l)) {
                    return Err(DaaError::InvalidParameter(format!(
                        "Level '{}' not found in column '{}'",
                        unknown, group_column
                    )));
                }
                order.to_vec()
            }
            None => present,
        };
        if group_levels.is_empty() {
            return Err(DaaError::EmptyData(format!(
                "Column '{}' has no non-missing values",
                group_column
            )));
        }

        let groups: Vec<Option<String>> = metadata
            .column(group_column)?
            .into_iter()
            .map(|v| v.as_level().filter(|l| group_levels.contains(l)))
            .collect();

        let mut covariates = BTreeMap::new();
        let mut categorical_levels = BTreeMap::new();
        for column in std::iter::once(group_column).chain(covariate_columns.iter().copied()) {
            if covariates.contains_key(column) {
                continue;
            }
            let values: Vec<Variable> = metadata.column(column)?.into_iter().cloned().collect();
            if column == group_column {
                categorical_levels.insert(column.to_string(), group_levels.clone());
                // grouping is categorical whatever its stored type
                let as_levels = values
                    .iter()
                    .map(|v| v.as_level().map(Variable::Categorical).unwrap_or(Variable::Missing))
                    .collect();
                covariates.insert(column.to_string(), as_levels);
                continue;
            }
            if metadata.column_type(column) == Some(VariableType::Categorical) {
                categorical_levels.insert(column.to_string(), metadata.levels(column)?);
            }
            covariates.insert(column.to_string(), values);
        }

        Ok(Self {
            group_column: group_column.to_string(),
            sample_ids: counts.sample_ids().to_vec(),
            groups,
            group_levels,
            covariates,
            categorical_levels,
            library_sizes: counts.col_sums().into_iter().map(|s| s as f64).collect(),
            size_factors: None,
            transform: Transform::Identity,
            scope: SampleScope::All,
        })
    }

    pub fn with_transform(mut self, transform: Transform) -> Result<Self> {
        transform.validate()?;
        if transform.needs_library_sizes() {
            if let Some(pos) = self.library_sizes.iter().position(|&l| l == 0.0) {
                return Err(DaaError::EmptyData(format!(
                    "Sample '{}' has zero reads; relative abundance is undefined",
                    self.sample_ids[pos]
                )));
            }
        }
        self.transform = transform;
        Ok(self)
    }

    pub fn with_scope(mut self, scope: SampleScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_size_factors(mut self, size_factors: Vec<f64>) -> Result<Self> {
        if size_factors.len() != self.sample_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: self.sample_ids.len(),
                actual: size_factors.len(),
            });
        }
        self.size_factors = Some(size_factors);
        Ok(self)
    }

    pub fn group_levels(&self) -> &[String] {
        &self.group_levels
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Cut the frame of one taxon (row of `counts`).
    pub fn frame(&self, counts: &CountMatrix, row: usize) -> TaxonFrame {
        let raw = counts.row_dense(row);
        let keep: Vec<usize> = (0..self.sample_ids.len())
            .filter(|&j| self.groups[j].is_some())
            .filter(|&j| match &self.scope {
                SampleScope::All => true,
                SampleScope::Detected { detection } => detection.is_detected(raw[j]),
            })
            .collect();

        let counts_kept: Vec<f64> = keep.iter().map(|&j| raw[j] as f64).collect();
        let values = keep
            .iter()
            .zip(counts_kept.iter())
            .map(|(&j, &c)| self.transform.apply(c, self.library_sizes[j]))
            .collect();

        TaxonFrame {
            taxon_id: counts.taxon_ids()[row].clone(),
            sample_ids: keep.iter().map(|&j| self.sample_ids[j].clone()).collect(),
            counts: counts_kept,
            values,
            groups: keep
                .iter()
                .filter_map(|&j| self.groups[j].clone())
                .collect(),
            group_levels: self.group_levels.clone(),
            group_column: self.group_column.clone(),
            covariates: self
                .covariates
                .iter()
                .map(|(name, vals)| (name.clone(), keep.iter().map(|&j| vals[j].clone()).collect()))
                .collect(),
            categorical_levels: self.categorical_levels.clone(),
            size_factors: self
                .size_factors
                .as_ref()
                .map(|sf| keep.iter().map(|&j| sf[j]).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Comparison;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fixture() -> (CountMatrix, Metadata) {
        let counts = CountMatrix::from_rows(
            ids(&["Dialister", "Other"]),
            ids(&["s1", "s2", "s3", "s4", "s5", "s6"]),
            &[vec![5, 23, 6, 24, 6, 38], vec![0, 3, 0, 0, 1, 2]],
        )
        .unwrap();
        let group = ["A", "A", "B", "B", "B", "B"]
            .iter()
            .map(|g| Variable::Categorical(g.to_string()))
            .collect();
        let bmi = (0..6).map(|i| Variable::Continuous(20.0 + i as f64)).collect();
        let metadata = Metadata::from_columns(
            ids(&["s1", "s2", "s3", "s4", "s5", "s6"]),
            vec![("group".into(), group), ("bmi".into(), bmi)],
        )
        .unwrap();
        (counts, metadata)
    }

    #[test]
    fn test_frame_pairs_values_with_groups() {
        let (counts, metadata) = fixture();
        let ctx = FrameContext::new(&counts, &metadata, "group", None, &["bmi"]).unwrap();
        let frame = ctx.frame(&counts, 0);

        assert_eq!(frame.taxon_id, "Dialister");
        assert_eq!(frame.group_values("A", false), vec![5.0, 23.0]);
        assert_eq!(frame.group_values("B", false), vec![6.0, 24.0, 6.0, 38.0]);
        assert_eq!(frame.levels_present(), vec!["A", "B"]);
        assert_eq!(frame.covariates["bmi"].len(), 6);
        assert_eq!(frame.values, frame.counts);
    }

    #[test]
    fn test_transform_applied_to_values_only() {
        let (counts, metadata) = fixture();
        let ctx = FrameContext::new(&counts, &metadata, "group", None, &[])
            .unwrap()
            .with_transform(Transform::Log1p)
            .unwrap();
        let frame = ctx.frame(&counts, 0);
        assert_eq!(frame.counts[0], 5.0);
        assert!((frame.values[0] - 6f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_detected_scope_drops_absent_samples() {
        let (counts, metadata) = fixture();
        let ctx = FrameContext::new(&counts, &metadata, "group", None, &[])
            .unwrap()
            .with_scope(SampleScope::Detected {
                detection: Detection::new(1.0, Comparison::AtLeast),
            });
        let frame = ctx.frame(&counts, 1);
        assert_eq!(frame.sample_ids, ids(&["s2", "s5", "s6"]));
        assert_eq!(frame.groups, ids(&["A", "B", "B"]));
    }

    #[test]
    fn test_level_order_restricts_and_orders() {
        let (counts, metadata) = fixture();
        let order = ids(&["B"]);
        let ctx = FrameContext::new(&counts, &metadata, "group", Some(&order), &[]).unwrap();
        let frame = ctx.frame(&counts, 0);
        assert_eq!(frame.n(), 4);
        assert_eq!(frame.group_levels, ids(&["B"]));

        let bad = ids(&["C"]);
        assert!(FrameContext::new(&counts, &metadata, "group", Some(&bad), &[]).is_err());
    }

    #[test]
    fn test_misaligned_metadata_rejected() {
        let (counts, metadata) = fixture();
        let reordered = metadata
            .align_to(&ids(&["s2", "s1", "s3", "s4", "s5", "s6"]))
            .unwrap();
        assert!(matches!(
            FrameContext::new(&counts, &reordered, "group", None, &[]),
            Err(DaaError::Alignment(_))
        ));
    }
}
