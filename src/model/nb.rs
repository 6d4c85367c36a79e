//! Count GLMs with log link: Poisson and negative binomial.
//!
//! Fitted by iteratively reweighted least squares. For the negative
//! binomial family the size parameter theta is re-estimated by the method
//! of moments between IRLS passes until it settles.

use super::{estimable_columns, expand, select_columns, ModelFit};
use crate::data::{DesignMatrix, Family};
use crate::error::TestFailure;
use nalgebra::{DMatrix, DVector};

/// Maximum IRLS iterations per pass.
const MAX_ITER: usize = 50;

/// Maximum theta re-estimation rounds.
const MAX_THETA_ROUNDS: usize = 25;

/// Relative deviance change at convergence.
const TOL: f64 = 1e-8;

/// Relative theta change at convergence.
const THETA_TOL: f64 = 1e-6;

const MIN_MU: f64 = 1e-10;
const MAX_ETA: f64 = 700.0;
const MIN_THETA: f64 = 1e-4;
const MAX_THETA: f64 = 1e8;

/// Converged IRLS state for a fixed theta.
struct Irls {
    beta: DVector<f64>,
    mu: Vec<f64>,
    cov: DMatrix<f64>,
    deviance: f64,
    iterations: usize,
}

/// Fit a Poisson or negative binomial GLM of counts `y` on `design`.
///
/// `offset` enters the linear predictor unchanged, typically log size
/// factors. Aliased columns are reported as missing coefficients.
pub fn fit_count_glm(
    y: &[f64],
    design: &DesignMatrix,
    offset: Option<&[f64]>,
    family: Family,
) -> Result<ModelFit, TestFailure> {
    let n = y.len();
    let keep = estimable_columns(design.matrix());
    let x = select_columns(design.matrix(), &keep);
    let rank = x.ncols();
    let names = design.coefficient_names();

    if rank == 0 {
        return Err(TestFailure::Singular(names.join(", ")));
    }
    let df_residual = n.saturating_sub(rank);
    if df_residual == 0 {
        return Err(TestFailure::Saturated);
    }
    if y.iter().all(|&v| v == 0.0) {
        return Err(TestFailure::ZeroVariance);
    }
    let zeros = vec![0.0; n];
    let offset = offset.unwrap_or(&zeros);

    let (fit, theta) = match family {
        Family::Gaussian => {
            return Err(TestFailure::Numerical(
                "gaussian family is not a count model".to_string(),
            ))
        }
        Family::Poisson => (irls(y, &x, offset, None)?, None),
        Family::NegativeBinomial => {
            let mut fit = irls(y, &x, offset, None)?;
            let mut theta = moment_theta(y, &fit.mu, df_residual);
            let mut iterations = fit.iterations;
            let mut settled = false;
            for _ in 0..MAX_THETA_ROUNDS {
                fit = irls(y, &x, offset, Some(theta))?;
                iterations += fit.iterations;
                let updated = moment_theta(y, &fit.mu, df_residual);
                let change = (updated - theta).abs() / theta;
                theta = updated;
                if change < THETA_TOL {
                    settled = true;
                    break;
                }
            }
            if !settled {
                return Err(TestFailure::NotConverged(iterations));
            }
            fit.iterations = iterations;
            (fit, Some(theta))
        }
    };

    let coefficients: Vec<f64> = fit.beta.iter().copied().collect();
    let std_errors: Vec<f64> = (0..rank).map(|j| fit.cov[(j, j)].max(0.0).sqrt()).collect();
    if coefficients.iter().chain(std_errors.iter()).any(|v| !v.is_finite()) {
        return Err(TestFailure::Numerical(
            "non-finite coefficient estimate".to_string(),
        ));
    }

    Ok(ModelFit {
        family,
        coefficient_names: names.to_vec(),
        coefficients: expand(&keep, &coefficients),
        std_errors: expand(&keep, &std_errors),
        df_residual,
        dispersion: theta,
        deviance: fit.deviance,
        iterations: fit.iterations,
    })
}

/// IRLS with log link at fixed theta (`None` for Poisson).
fn irls(
    y: &[f64],
    x: &DMatrix<f64>,
    offset: &[f64],
    theta: Option<f64>,
) -> Result<Irls, TestFailure> {
    let n = y.len();
    let p = x.ncols();
    let mut mu: Vec<f64> = y.iter().map(|&v| v + 0.1).collect();
    let mut eta: Vec<f64> = mu.iter().map(|m| m.ln()).collect();
    let mut dev_old = deviance(y, &mu, theta);

    for iter in 1..=MAX_ITER {
        let mut xw = x.clone();
        let mut z = DVector::zeros(n);
        for i in 0..n {
            let w = match theta {
                Some(t) => mu[i] / (1.0 + mu[i] / t),
                None => mu[i],
            };
            z[i] = (eta[i] - offset[i]) + (y[i] - mu[i]) / mu[i];
            for j in 0..p {
                xw[(i, j)] *= w;
            }
        }

        // (X'WX)^-1 X'Wz
        let xtwx = xw.transpose() * x;
        let cov = xtwx.try_inverse().ok_or_else(|| {
            TestFailure::Singular("weighted cross-product is not invertible".to_string())
        })?;
        let beta = &cov * (xw.transpose() * &z);

        let lin = x * &beta;
        for i in 0..n {
            eta[i] = (lin[i] + offset[i]).min(MAX_ETA);
            mu[i] = eta[i].exp().max(MIN_MU);
        }

        let dev = deviance(y, &mu, theta);
        if !dev.is_finite() {
            return Err(TestFailure::Numerical("deviance is not finite".to_string()));
        }
        if (dev - dev_old).abs() / (dev.abs() + 0.1) < TOL {
            return Ok(Irls {
                beta,
                mu,
                cov,
                deviance: dev,
                iterations: iter,
            });
        }
        dev_old = dev;
    }

    Err(TestFailure::NotConverged(MAX_ITER))
}

/// Residual deviance for Poisson (`theta = None`) or negative binomial.
fn deviance(y: &[f64], mu: &[f64], theta: Option<f64>) -> f64 {
    let ylogy = |yi: f64, mi: f64| if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
    2.0 * y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| match theta {
            None => ylogy(yi, mi) - (yi - mi),
            Some(t) => ylogy(yi, mi) - (yi + t) * ((yi + t) / (mi + t)).ln(),
        })
        .sum::<f64>()
}

/// Method-of-moments theta from `Var(y) = mu + mu^2 / theta`.
///
/// No overdispersion beyond Poisson gives the upper bound.
fn moment_theta(y: &[f64], mu: &[f64], df_residual: usize) -> f64 {
    let excess: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| ((yi - mi).powi(2) - mi) / (mi * mi))
        .sum::<f64>()
        / df_residual as f64;
    if excess <= 0.0 || !excess.is_finite() {
        MAX_THETA
    } else {
        (1.0 / excess).clamp(MIN_THETA, MAX_THETA)
    }
}
