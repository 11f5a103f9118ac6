//! # Poisson GLM Fitting
//!
//! Iteratively reweighted least squares for count models with a log link.
//!
//! For the canonical Poisson/log pairing the IRLS working weights equal the mean,
//! `w = μ`, and the working response is `z = η + (y − μ)/μ`. Each iteration solves
//! the normal equations `XᵀWX β = XᵀWz` through a Cholesky factorization and the
//! loop stops once the relative deviance change `|ΔD| / (|D| + 0.1)` falls below
//! the configured tolerance.
//!
//! Standard errors come from `scale · (XᵀWX)⁻¹` evaluated at the converged mean.
//! The Poisson family fixes `scale = 1`; the quasi-Poisson family estimates it as
//! the Pearson χ² divided by the residual degrees of freedom.

use crate::matrix::{DesignMatrix, MatrixError};
use ndarray::{Array1, Array2, ArrayView1, Zip};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{FactorizeC, InverseC, SolveC, UPLO};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::gamma::ln_gamma;
use thiserror::Error;

/// Linear predictors are clamped to this magnitude before exponentiation.
const MAX_ETA: f64 = 700.0;

/// Error family of the count model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    Poisson,
    /// Poisson mean/variance structure with an estimated dispersion scale.
    QuasiPoisson,
}

/// Iteration controls for the IRLS loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmConfig {
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_tolerance: 1e-10,
        }
    }
}

#[derive(Error, Debug)]
pub enum FitError {
    #[error("Response has {y_len} rows but the design matrix has {x_rows}.")]
    DimensionMismatch { y_len: usize, x_rows: usize },
    #[error(
        "IRLS did not converge within {max_iterations} iterations. Last relative deviance change: {last_change:.3e}"
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },
    #[error("Non-finite {quantity} encountered at IRLS iteration {iteration}.")]
    NonFinite {
        quantity: &'static str,
        iteration: usize,
    },
    #[error(
        "The information matrix XᵀWX could not be factorized; the design may be rank deficient. Error: {0}"
    )]
    SingularInformation(LinalgError),
    #[error(
        "The design has {nobs} observations and {params} parameters; a positive residual degrees of freedom is required to estimate the dispersion scale."
    )]
    NoResidualDf { nobs: usize, params: usize },
    #[error("Failed to add the intercept column: {0}")]
    Design(#[from] MatrixError),
    #[error("Failed to construct the reference normal distribution: {0}")]
    Distribution(String),
}

/// Everything the fitter reports about a converged model.
///
/// Parameter-indexed vectors follow the column order of the design matrix, with
/// the fitter intercept first when the fit was requested with `constant = true`.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub family: Family,
    pub params: Array1<f64>,
    pub std_err: Array1<f64>,
    pub t_values: Array1<f64>,
    pub p_values: Array1<f64>,
    pub cov_params: Array2<f64>,
    pub fitted_values: Array1<f64>,
    /// Response residuals, `y − ŷ`.
    pub residuals: Array1<f64>,
    pub deviance: f64,
    pub pearson_chi2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub scale: f64,
    pub df_resid: isize,
    pub iterations: usize,
}

/// Fits `y ~ X` under a Poisson-type family with a log link.
///
/// When `constant` is true an intercept column is prepended to `x` and its
/// coefficient is returned as parameter 0.
pub fn fit(
    y: ArrayView1<f64>,
    x: &DesignMatrix,
    constant: bool,
    family: Family,
    config: &GlmConfig,
) -> Result<FitResult, FitError> {
    if y.len() != x.nrows() {
        return Err(FitError::DimensionMismatch {
            y_len: y.len(),
            x_rows: x.nrows(),
        });
    }
    let augmented;
    let x = if constant {
        augmented = x.with_intercept()?;
        &augmented
    } else {
        x
    };

    log::debug!(
        "Starting IRLS: {} observations, {} parameters, family {:?}",
        y.len(),
        x.ncols(),
        family
    );

    let mean_y = y.mean().unwrap_or(0.0);
    let mut mu = y.mapv(|yi| (yi + mean_y) / 2.0);
    let mut eta = mu.mapv(f64::ln);
    let mut deviance = poisson_deviance(y, &mu);
    let mut last_change = f64::INFINITY;

    for iteration in 1..=config.max_iterations {
        let (weights, z) = working_vectors(y, &eta, &mu);
        if !z.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFinite {
                quantity: "working response",
                iteration,
            });
        }

        let xtwx = x.weighted_gram(weights.view());
        let rhs = x.transpose_vector_multiply((&weights * &z).view());
        let factor = xtwx
            .factorizec(UPLO::Lower)
            .map_err(FitError::SingularInformation)?;
        let beta = factor.solvec(&rhs).map_err(FitError::SingularInformation)?;
        if !beta.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFinite {
                quantity: "coefficients",
                iteration,
            });
        }

        eta = x.matrix_vector_multiply(beta.view());
        mu = eta.mapv(|e| e.clamp(-MAX_ETA, MAX_ETA).exp());
        let new_deviance = poisson_deviance(y, &mu);
        if !new_deviance.is_finite() {
            return Err(FitError::NonFinite {
                quantity: "deviance",
                iteration,
            });
        }

        last_change = (deviance - new_deviance).abs() / (new_deviance.abs() + 0.1);
        deviance = new_deviance;
        log::debug!(
            "IRLS iteration {}: deviance = {:.6}, relative change = {:.3e}",
            iteration,
            deviance,
            last_change
        );

        if last_change < config.convergence_tolerance {
            log::debug!("IRLS converged after {} iterations", iteration);
            return summarize(y, x, beta, mu, deviance, family, iteration);
        }
    }

    log::warn!(
        "IRLS stopped at the iteration limit ({}) with relative change {:.3e}",
        config.max_iterations,
        last_change
    );
    Err(FitError::DidNotConverge {
        max_iterations: config.max_iterations,
        last_change,
    })
}

/// IRLS weights and working response for the Poisson/log pairing.
fn working_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    mu: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let weights = mu.clone();
    let z = Zip::from(eta)
        .and(y)
        .and(mu)
        .map_collect(|&e, &yi, &m| e + (yi - m) / m);
    (weights, z)
}

/// Unit deviance summed over observations: `2 Σ [y ln(y/μ) − (y − μ)]`.
pub fn poisson_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    2.0 * Zip::from(y).and(mu).fold(0.0, |acc, &yi, &m| {
        let log_term = if yi > 0.0 { yi * (yi / m).ln() } else { 0.0 };
        acc + log_term - (yi - m)
    })
}

/// `Σ [y ln μ − μ − ln Γ(y + 1)]`.
pub fn poisson_log_likelihood(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    Zip::from(y).and(mu).fold(0.0, |acc, &yi, &m| {
        let log_term = if yi > 0.0 { yi * m.ln() } else { 0.0 };
        acc + log_term - m - ln_gamma(yi + 1.0)
    })
}

fn summarize(
    y: ArrayView1<f64>,
    x: &DesignMatrix,
    params: Array1<f64>,
    mu: Array1<f64>,
    deviance: f64,
    family: Family,
    iterations: usize,
) -> Result<FitResult, FitError> {
    let nobs = y.len();
    let num_params = params.len();
    let df_resid = nobs as isize - num_params as isize;

    let pearson_chi2 = Zip::from(y)
        .and(&mu)
        .fold(0.0, |acc, &yi, &m| acc + (yi - m).powi(2) / m);
    let scale = match family {
        Family::Poisson => 1.0,
        Family::QuasiPoisson => {
            if df_resid <= 0 {
                return Err(FitError::NoResidualDf {
                    nobs,
                    params: num_params,
                });
            }
            pearson_chi2 / df_resid as f64
        }
    };

    let information = x.weighted_gram(mu.view());
    let unscaled_cov = information
        .factorizec(UPLO::Lower)
        .and_then(|factor| factor.invc())
        .map_err(FitError::SingularInformation)?;
    let cov_params = unscaled_cov * scale;
    let std_err = cov_params.diag().mapv(|v| v.max(0.0).sqrt());
    let t_values = &params / &std_err;

    let normal = Normal::new(0.0, 1.0).map_err(|e| FitError::Distribution(e.to_string()))?;
    let p_values = t_values.mapv(|t| 2.0 * normal.cdf(-t.abs()));

    let log_likelihood = poisson_log_likelihood(y, &mu);
    let aic = -2.0 * log_likelihood + 2.0 * num_params as f64;
    let residuals = &y - &mu;

    Ok(FitResult {
        family,
        params,
        std_err,
        t_values,
        p_values,
        cov_params,
        fitted_values: mu,
        residuals,
        deviance,
        pearson_chi2,
        log_likelihood,
        aic,
        scale,
        df_resid,
        iterations,
    })
}
