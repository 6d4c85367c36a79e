//! Per-taxon differential abundance testing for microbiome count data.
//!
//! For each taxon the library cuts a per-sample record set (abundance,
//! group, covariates), applies one or more statistical tests, collects
//! p-values and effect sizes into a results table, and corrects for
//! multiple testing across taxa.
//!
//! # Overview
//!
//! - **data**: count matrix, metadata, model specification, per-taxon frames, results
//! - **filter**: prevalence computation and core-taxa filter
//! - **normalize**: value transforms and median-of-ratios size factors
//! - **model**: per-taxon GLM fitting (OLS, Poisson and negative binomial IRLS)
//! - **test**: t-test, Wilcoxon rank-sum, Kruskal-Wallis, GLM Wald test
//! - **correct**: Benjamini-Hochberg, Benjamini-Yekutieli, Holm, Bonferroni
//! - **community**: Bray-Curtis distances and PERMANOVA
//! - **pipeline**: pipeline composition and execution
//!
//! # Example
//!
//! ```no_run
//! use taxon_da::prelude::*;
//!
//! let counts = CountMatrix::from_tsv("counts.tsv").unwrap();
//! let metadata = Metadata::from_tsv("metadata.tsv").unwrap();
//!
//! let results = Pipeline::new("group")
//!     .filter_prevalence(0.1)
//!     .transform(Transform::Log1p)
//!     .t_test()
//!     .wilcoxon()
//!     .deseq("grouptreatment")
//!     .run(&counts, &metadata)
//!     .unwrap();
//!
//! results.to_tsv("results.tsv").unwrap();
//! ```

pub mod community;
pub mod correct;
pub mod data;
pub mod error;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::community::{permanova, PermanovaConfig, PermanovaResult};
    pub use crate::correct::{adjust, CorrectionMethod, MissingPolicy};
    pub use crate::data::{
        CountMatrix, Family, Metadata, ModelSpec, ResultTable, SampleScope, TaxonFrame,
        TaxonRecord, TestRecord, Variable,
    };
    pub use crate::error::{DaaError, Result, TestFailure};
    pub use crate::filter::{filter_prevalence, prevalence, Comparison, Detection, PrevalenceFilter};
    pub use crate::normalize::{size_factors, SizeFactorMethod, Transform};
    pub use crate::pipeline::{Pipeline, PipelineConfig};
    pub use crate::test::{
        GlmTest, KruskalWallisTest, TTest, TaxonTest, TestOutput, TestSpec, WilcoxonTest,
    };
}
