//! Pipeline runner: per-taxon testing followed by correction.

use crate::correct::{adjust, CorrectionMethod, MissingPolicy};
use crate::data::{
    CountMatrix, FrameContext, Metadata, ModelSpec, ResultTable, SampleScope, TaxonRecord,
    TestRecord,
};
use crate::error::{DaaError, Result};
use crate::filter::{prevalence, Detection, PrevalenceFilter};
use crate::normalize::{size_factors, SizeFactorMethod, Transform};
use crate::test::{TaxonTest, TestSpec};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Metadata column holding the groups to compare.
    pub group_column: String,
    /// Levels to compare, reference first. Defaults to all levels sorted.
    #[serde(default)]
    pub levels: Option<Vec<String>>,
    /// Taxa to test, in output order. Defaults to every taxon in table order.
    #[serde(default)]
    pub taxa: Option<Vec<String>>,
    #[serde(default)]
    pub prevalence_filter: Option<PrevalenceFilter>,
    /// Applied to the inputs of parametric tests only.
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub scope: SampleScope,
    pub tests: Vec<TestSpec>,
    #[serde(default)]
    pub correction: CorrectionMethod,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
    #[serde(default)]
    pub size_factor_method: SizeFactorMethod,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(DaaError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DaaError::from)
    }
}

/// Builder for constructing and running per-taxon testing pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create an empty pipeline comparing the levels of `group_column`.
    pub fn new(group_column: &str) -> Self {
        Self {
            config: PipelineConfig {
                name: "unnamed".to_string(),
                description: None,
                group_column: group_column.to_string(),
                levels: None,
                taxa: None,
                prevalence_filter: None,
                transform: Transform::default(),
                scope: SampleScope::default(),
                tests: Vec::new(),
                correction: CorrectionMethod::default(),
                missing_policy: MissingPolicy::default(),
                size_factor_method: SizeFactorMethod::default(),
            },
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Convert to config for serialization.
    pub fn to_config(&self) -> PipelineConfig {
        self.config.clone()
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.config.description = Some(description.to_string());
        self
    }

    /// Compare only these levels, in this order; the first is the reference.
    pub fn levels(mut self, levels: &[&str]) -> Self {
        self.config.levels = Some(levels.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Test only these taxa; rows follow this order.
    pub fn taxa(mut self, taxa: &[&str]) -> Self {
        self.config.taxa = Some(taxa.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Keep taxa present in at least `threshold` of samples.
    pub fn filter_prevalence(mut self, threshold: f64) -> Self {
        self.config.prevalence_filter = Some(PrevalenceFilter::new(threshold));
        self
    }

    pub fn filter(mut self, filter: PrevalenceFilter) -> Self {
        self.config.prevalence_filter = Some(filter);
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.config.transform = transform;
        self
    }

    /// Test only the samples in which each taxon is detected.
    pub fn presence_only(mut self, detection: Detection) -> Self {
        self.config.scope = SampleScope::Detected { detection };
        self
    }

    pub fn test(mut self, test: TestSpec) -> Self {
        self.config.tests.push(test);
        self
    }

    /// Add a Welch t-test.
    pub fn t_test(self) -> Self {
        self.test(TestSpec::TTest {
            equal_variance: false,
        })
    }

    /// Add a Wilcoxon rank-sum test.
    pub fn wilcoxon(self) -> Self {
        self.test(TestSpec::Wilcoxon)
    }

    /// Add a Kruskal-Wallis test.
    pub fn kruskal_wallis(self) -> Self {
        self.test(TestSpec::KruskalWallis)
    }

    /// Add a GLM Wald test of `coefficient`.
    pub fn glm(self, model: ModelSpec, coefficient: &str) -> Self {
        self.test(TestSpec::Glm {
            model,
            coefficient: coefficient.to_string(),
        })
    }

    /// Add a negative binomial test with median-of-ratios size factors.
    pub fn deseq(self, coefficient: &str) -> Self {
        self.test(TestSpec::Deseq {
            coefficient: coefficient.to_string(),
            covariates: Vec::new(),
        })
    }

    pub fn correct(mut self, method: CorrectionMethod) -> Self {
        self.config.correction = method;
        self
    }

    pub fn missing_policy(mut self, policy: MissingPolicy) -> Self {
        self.config.missing_policy = policy;
        self
    }

    pub fn size_factor_method(mut self, method: SizeFactorMethod) -> Self {
        self.config.size_factor_method = method;
        self
    }

    /// Run the configured tests on data.
    pub fn run(&self, counts: &CountMatrix, metadata: &Metadata) -> Result<ResultTable> {
        let tests: Vec<Box<dyn TaxonTest>> = self
            .config
            .tests
            .iter()
            .map(|spec| spec.build(&self.config.group_column))
            .collect();
        self.run_with(&tests, counts, metadata)
    }

    /// Run the given tests in place of the configured ones.
    ///
    /// Stages run in order: validate, align, size factors, select, test,
    /// correct. An error in any stage aborts the run and is wrapped with the
    /// stage name; a failure of one test on one taxon only leaves that
    /// p-value missing.
    pub fn run_with(
        &self,
        tests: &[Box<dyn TaxonTest>],
        counts: &CountMatrix,
        metadata: &Metadata,
    ) -> Result<ResultTable> {
        let cfg = &self.config;
        info!(pipeline = %cfg.name, n_tests = tests.len(), "starting run");

        let methods = stage("validate", self.validate(tests, metadata))?;

        let mut context = stage("align", self.frame_context(tests, counts, metadata))?;

        if tests.iter().any(|t| t.needs_size_factors()) {
            let factors = stage(
                "size_factors",
                size_factors(counts, cfg.size_factor_method),
            )?;
            context = stage("size_factors", context.with_size_factors(factors))?;
        }

        let rows = stage("select", self.select_taxa(counts))?;
        info!(n_taxa = rows.len(), "taxa selected");

        let detection = cfg
            .prevalence_filter
            .map(|f| f.detection)
            .unwrap_or_default();
        let prevalences = prevalence(counts, &detection);
        let n_samples = counts.n_samples().max(1) as f64;
        let totals = counts.row_sums();

        // collect preserves row order
        let records: Vec<TaxonRecord> = rows
            .par_iter()
            .map(|&row| {
                let frame = context.frame(counts, row);
                let test_records = tests
                    .iter()
                    .zip(methods.iter())
                    .map(|(test, method)| {
                        let outcome = test.apply(&frame);
                        match &outcome {
                            Ok(out) => {
                                debug!(taxon = %frame.taxon_id, method = %method, p_value = out.p_value, "test done")
                            }
                            Err(failure) => {
                                warn!(taxon = %frame.taxon_id, method = %method, reason = %failure, "test failed")
                            }
                        }
                        TestRecord::from_outcome(method, outcome)
                    })
                    .collect();
                TaxonRecord {
                    taxon_id: frame.taxon_id.clone(),
                    prevalence: prevalences[row],
                    mean_abundance: totals[row] as f64 / n_samples,
                    tests: test_records,
                }
            })
            .collect();

        let mut table = ResultTable::new(methods.clone(), cfg.correction.name(), records);
        for method in &methods {
            let raw = table.p_values(method)?;
            let adjusted = stage(
                "correct",
                adjust(&raw, cfg.correction, cfg.missing_policy)
                    .map_err(|e| for_method(e, method)),
            )?;
            table.set_adjusted(method, adjusted)?;
        }

        info!(n_rows = table.len(), correction = cfg.correction.name(), "run complete");
        Ok(table)
    }

    /// Check the configuration against the metadata; returns test names.
    fn validate(&self, tests: &[Box<dyn TaxonTest>], metadata: &Metadata) -> Result<Vec<String>> {
        let cfg = &self.config;
        if tests.is_empty() {
            return Err(DaaError::InvalidParameter(
                "Pipeline has no tests".to_string(),
            ));
        }
        if !metadata.has_column(&cfg.group_column) {
            return Err(DaaError::MissingColumn(cfg.group_column.clone()));
        }
        cfg.transform.validate()?;
        if let Some(filter) = &cfg.prevalence_filter {
            filter.validate()?;
        }

        let n_levels = match &cfg.levels {
            Some(levels) => levels.len(),
            None => metadata.levels(&cfg.group_column)?.len(),
        };

        let mut methods = Vec::with_capacity(tests.len());
        for test in tests {
            test.validate(metadata)?;
            let name = test.name();
            if let Some(required) = test.required_levels() {
                if required != n_levels {
                    return Err(DaaError::InvalidParameter(format!(
                        "Test '{}' compares exactly {} levels but column '{}' has {} in this run; \
                         choose them with `levels`",
                        name, required, cfg.group_column, n_levels
                    )));
                }
            }
            if methods.contains(&name) {
                return Err(DaaError::InvalidParameter(format!(
                    "Test '{}' is configured twice",
                    name
                )));
            }
            methods.push(name);
        }
        Ok(methods)
    }

    fn frame_context(
        &self,
        tests: &[Box<dyn TaxonTest>],
        counts: &CountMatrix,
        metadata: &Metadata,
    ) -> Result<FrameContext> {
        let cfg = &self.config;
        let mut covariates: Vec<String> = tests.iter().flat_map(|t| t.covariates()).collect();
        covariates.sort();
        covariates.dedup();
        let covariates: Vec<&str> = covariates.iter().map(|c| c.as_str()).collect();

        FrameContext::new(
            counts,
            metadata,
            &cfg.group_column,
            cfg.levels.as_deref(),
            &covariates,
        )?
        .with_transform(cfg.transform)
        .map(|ctx| ctx.with_scope(cfg.scope))
    }

    /// Row indices to test, in output order.
    fn select_taxa(&self, counts: &CountMatrix) -> Result<Vec<usize>> {
        let cfg = &self.config;
        let requested: Vec<usize> = match &cfg.taxa {
            None => (0..counts.n_taxa()).collect(),
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut rows = Vec::with_capacity(ids.len());
                for id in ids {
                    if !seen.insert(id.as_str()) {
                        return Err(DaaError::DuplicateId(id.clone()));
                    }
                    let row = counts.taxon_index(id).ok_or_else(|| {
                        DaaError::InvalidParameter(format!("Unknown taxon '{}'", id))
                    })?;
                    rows.push(row);
                }
                rows
            }
        };
        if requested.is_empty() {
            return Err(DaaError::EmptyData("No taxa requested".to_string()));
        }

        let Some(filter) = &cfg.prevalence_filter else {
            return Ok(requested);
        };
        let passing = filter.passing(counts)?;
        let kept: Vec<usize> = requested.into_iter().filter(|&r| passing[r]).collect();
        if kept.is_empty() {
            return Err(DaaError::EmptyData(format!(
                "No requested taxa pass prevalence {} {:.1}%",
                filter.comparison.symbol(),
                filter.threshold * 100.0
            )));
        }
        info!(
            kept = kept.len(),
            threshold = filter.threshold,
            "prevalence filter applied"
        );
        Ok(kept)
    }
}

/// Name the method whose p-value column could not be corrected.
fn for_method(err: DaaError, method: &str) -> DaaError {
    match err {
        DaaError::EmptyData(msg) => DaaError::EmptyData(format!("{} (method '{}')", msg, method)),
        DaaError::IncompleteData(msg) => {
            DaaError::IncompleteData(format!("{} (method '{}')", msg, method))
        }
        other => other,
    }
}

fn stage<T>(name: &str, result: Result<T>) -> Result<T> {
    result.map_err(|e| DaaError::in_stage(name, e))
}
