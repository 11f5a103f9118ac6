//! Shape and value checks applied to caller-supplied arrays before any matrix work.

use crate::matrix::MatrixError;
use ndarray::{ArrayView1, ArrayView2};
use thiserror::Error;

/// Every way a set of model inputs can be rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No observations were supplied; at least one flow is required.")]
    Empty,
    #[error("Input '{name}' has {found} rows, but '{reference}' has {expected}.")]
    LengthMismatch {
        name: String,
        found: usize,
        reference: String,
        expected: usize,
    },
    #[error("Flow at row {row} is negative ({value}); flows must be non-negative counts.")]
    NegativeFlow { row: usize, value: f64 },
    #[error("Input '{name}' contains a non-finite value ({value}) at row {row}.")]
    NonFinite { name: String, row: usize, value: f64 },
    #[error(
        "Input '{name}' contains a non-positive value ({value}) at row {row}, but it is log-transformed."
    )]
    NonPositiveLogInput { name: String, row: usize, value: f64 },
    #[error("The {variant} model requires '{input}', which was not supplied.")]
    MissingInput {
        variant: &'static str,
        input: &'static str,
    },
    #[error("The {variant} model does not accept '{input}'.")]
    UnexpectedInput {
        variant: &'static str,
        input: &'static str,
    },
    #[error("Requested location '{0}' does not occur in the location index.")]
    UnknownLocation(String),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Checks that every named input has the same number of rows as the first one.
///
/// Returns the shared row count `n`, failing if the inputs disagree or `n == 0`.
pub fn check_arrays(lengths: &[(&str, usize)]) -> Result<usize, ValidationError> {
    let Some(&(reference, n)) = lengths.first() else {
        return Err(ValidationError::Empty);
    };
    for &(name, found) in &lengths[1..] {
        if found != n {
            return Err(ValidationError::LengthMismatch {
                name: name.to_string(),
                found,
                reference: reference.to_string(),
                expected: n,
            });
        }
    }
    if n == 0 {
        return Err(ValidationError::Empty);
    }
    Ok(n)
}

/// Checks the dependent variable: length `n`, finite and non-negative.
pub fn check_y(y: ArrayView1<f64>, n: usize) -> Result<(), ValidationError> {
    if y.len() != n {
        return Err(ValidationError::LengthMismatch {
            name: "flows".to_string(),
            found: y.len(),
            reference: "observations".to_string(),
            expected: n,
        });
    }
    for (row, &value) in y.iter().enumerate() {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite {
                name: "flows".to_string(),
                row,
                value,
            });
        }
        if value < 0.0 {
            return Err(ValidationError::NegativeFlow { row, value });
        }
    }
    Ok(())
}

pub fn check_finite(name: &str, values: ArrayView1<f64>) -> Result<(), ValidationError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(ValidationError::NonFinite {
            name: name.to_string(),
            row,
            value: values[row],
        }),
        None => Ok(()),
    }
}

/// Rejects any entry that cannot be passed through a natural logarithm.
pub fn check_log_domain(name: &str, values: ArrayView2<f64>) -> Result<(), ValidationError> {
    for ((row, _), &value) in values.indexed_iter() {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite {
                name: name.to_string(),
                row,
                value,
            });
        }
        if value <= 0.0 {
            return Err(ValidationError::NonPositiveLogInput {
                name: name.to_string(),
                row,
                value,
            });
        }
    }
    Ok(())
}
