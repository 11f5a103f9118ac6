//! Cost transforms: how the raw separation cost enters the linear predictor.

use crate::validate::ValidationError;
use ndarray::{Array1, ArrayView1};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A caller-supplied scalar cost transform.
pub type CostFn = dyn Fn(f64) -> f64 + Send + Sync;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cost function must be \"exp\", \"pow\" or a function mapping a scalar to a scalar; got \"{0}\"")]
pub struct InvalidCostFunction(pub String);

/// The functional form of distance decay.
///
/// `Pow` models `flow ∝ cost^β` by entering `ln(cost)` into the linear predictor;
/// `Exp` models `flow ∝ exp(β·cost)` by entering the raw cost. `Custom` holds an
/// arbitrary transform behind an `Arc` so that local sub-models share the exact
/// function object of their parent.
#[derive(Clone)]
pub enum CostFunction {
    Pow,
    Exp,
    Custom(Arc<CostFn>),
}

impl CostFunction {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn apply(&self, cost: f64) -> f64 {
        match self {
            Self::Pow => cost.ln(),
            Self::Exp => cost,
            Self::Custom(f) => f(cost),
        }
    }

    /// Transforms the whole cost column, rejecting values the transform cannot map.
    pub fn transform(&self, cost: ArrayView1<f64>) -> Result<Array1<f64>, ValidationError> {
        let mut out = Array1::zeros(cost.len());
        for (row, (&raw, slot)) in cost.iter().zip(out.iter_mut()).enumerate() {
            if matches!(self, Self::Pow) && raw <= 0.0 {
                return Err(ValidationError::NonPositiveLogInput {
                    name: "cost".to_string(),
                    row,
                    value: raw,
                });
            }
            let value = self.apply(raw);
            if !value.is_finite() {
                return Err(ValidationError::NonFinite {
                    name: "transformed cost".to_string(),
                    row,
                    value,
                });
            }
            *slot = value;
        }
        Ok(out)
    }

    /// True when both values resolve to the same transform; custom functions
    /// compare by identity.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pow, Self::Pow) | (Self::Exp, Self::Exp) => true,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for CostFunction {
    fn default() -> Self {
        Self::Pow
    }
}

impl FromStr for CostFunction {
    type Err = InvalidCostFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pow" | "power" => Ok(Self::Pow),
            "exp" => Ok(Self::Exp),
            _ => Err(InvalidCostFunction(s.to_string())),
        }
    }
}

impl fmt::Debug for CostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pow => f.write_str("Pow"),
            Self::Exp => f.write_str("Exp"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl fmt::Display for CostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pow => f.write_str("pow"),
            Self::Exp => f.write_str("exp"),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}
