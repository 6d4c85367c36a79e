//! Gaussian linear model fitting via OLS.

use super::{estimable_columns, expand, select_columns, ModelFit};
use crate::data::{DesignMatrix, Family};
use crate::error::TestFailure;
use nalgebra::DVector;

/// Fit `y ~ X` by ordinary least squares.
///
/// Aliased columns are dropped and reported as missing coefficients.
/// Standard errors come from `sigma^2 (X'X)^-1` with
/// `sigma^2 = RSS / (n - rank)`.
pub fn fit_lm(y: &[f64], design: &DesignMatrix) -> Result<ModelFit, TestFailure> {
    let n = y.len();
    let keep = estimable_columns(design.matrix());
    let x = select_columns(design.matrix(), &keep);
    let rank = x.ncols();

    if rank == 0 {
        return Err(TestFailure::Singular(
            design.coefficient_names().join(", "),
        ));
    }
    let df_residual = n.saturating_sub(rank);
    if df_residual == 0 {
        return Err(TestFailure::Saturated);
    }

    let y_vec = DVector::from_column_slice(y);
    let xtx = x.transpose() * &x;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| TestFailure::Singular(design.coefficient_names().join(", ")))?;

    // beta = (X'X)^-1 X'y
    let beta = &xtx_inv * (x.transpose() * &y_vec);
    let residuals = &y_vec - &x * &beta;
    let rss = residuals.dot(&residuals);
    let sigma2 = rss / df_residual as f64;

    let std_errors: Vec<f64> = (0..rank)
        .map(|j| (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt())
        .collect();
    let coefficients: Vec<f64> = beta.iter().copied().collect();

    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(TestFailure::Numerical(
            "non-finite coefficient estimate".to_string(),
        ));
    }

    Ok(ModelFit {
        family: Family::Gaussian,
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients: expand(&keep, &coefficients),
        std_errors: expand(&keep, &std_errors),
        df_residual,
        dispersion: Some(sigma2),
        deviance: rss,
        iterations: 1,
    })
}
