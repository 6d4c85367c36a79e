//! Per-taxon regression models.
//!
//! - **lm**: Gaussian family, ordinary least squares
//! - **nb**: Poisson and negative binomial families, IRLS with log link
//!
//! Both drop aliased design columns before fitting and report their
//! coefficients as missing, so a model with an empty interaction cell
//! still yields estimates for the remaining terms.

pub mod lm;
pub mod nb;

use crate::data::{DesignMatrix, Family, ModelSpec, TaxonFrame};
use crate::error::TestFailure;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

pub use lm::fit_lm;
pub use nb::fit_count_glm;

/// Relative tolerance below which a design column is considered a linear
/// combination of the columns before it.
const ALIAS_TOL: f64 = 1e-7;

/// Fitted model for one taxon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFit {
    pub family: Family,
    pub coefficient_names: Vec<String>,
    /// `None` for aliased (non-estimable) coefficients.
    pub coefficients: Vec<Option<f64>>,
    pub std_errors: Vec<Option<f64>>,
    pub df_residual: usize,
    /// Residual variance (Gaussian) or NB size parameter theta.
    pub dispersion: Option<f64>,
    pub deviance: f64,
    pub iterations: usize,
}

impl ModelFit {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Estimate and standard error of a named coefficient, if estimable.
    pub fn coefficient(&self, name: &str) -> Option<(f64, f64)> {
        let idx = self.coefficient_index(name)?;
        Some((self.coefficients[idx]?, self.std_errors[idx]?))
    }
}

/// Fit `spec` to one taxon.
pub fn fit_model(spec: &ModelSpec, frame: &TaxonFrame) -> Result<ModelFit, TestFailure> {
    let design = DesignMatrix::from_spec(spec, frame)?;
    match spec.family {
        Family::Gaussian => {
            let y: Vec<f64> = design.rows().iter().map(|&i| frame.values[i]).collect();
            fit_lm(&y, &design)
        }
        Family::Poisson | Family::NegativeBinomial => {
            let y: Vec<f64> = design.rows().iter().map(|&i| frame.counts[i]).collect();
            let offset: Option<Vec<f64>> = if spec.use_size_factors {
                let sf = frame.size_factors.as_ref().ok_or_else(|| {
                    TestFailure::Numerical("size factors were not computed for this run".into())
                })?;
                Some(design.rows().iter().map(|&i| sf[i].ln()).collect())
            } else {
                None
            };
            fit_count_glm(&y, &design, offset.as_deref(), spec.family)
        }
    }
}

/// Which columns of `x` are estimable, scanning left to right.
///
/// Modified Gram-Schmidt: a column is aliased when what remains after
/// projecting out the kept columns is negligible relative to its norm.
pub(crate) fn estimable_columns(x: &DMatrix<f64>) -> Vec<bool> {
    let mut basis: Vec<nalgebra::DVector<f64>> = Vec::new();
    let mut keep = Vec::with_capacity(x.ncols());
    for j in 0..x.ncols() {
        let col = x.column(j).into_owned();
        let norm = col.norm();
        if norm == 0.0 || !norm.is_finite() {
            keep.push(false);
            continue;
        }
        let mut v = col;
        for q in &basis {
            let proj = q.dot(&v);
            v -= q * proj;
        }
        let resid = v.norm();
        if resid / norm < ALIAS_TOL {
            keep.push(false);
        } else {
            basis.push(v / resid);
            keep.push(true);
        }
    }
    keep
}

/// Columns of `x` selected by `keep`.
pub(crate) fn select_columns(x: &DMatrix<f64>, keep: &[bool]) -> DMatrix<f64> {
    let idx: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter_map(|(j, &k)| k.then_some(j))
        .collect();
    x.select_columns(idx.iter())
}

/// Spread estimates of the kept columns back over all columns.
pub(crate) fn expand(keep: &[bool], values: &[f64]) -> Vec<Option<f64>> {
    let mut it = values.iter();
    keep.iter()
        .map(|&k| if k { it.next().copied() } else { None })
        .collect()
}
