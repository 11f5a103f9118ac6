//! # Design Matrix Assembly
//!
//! Builds the response vector and design matrix for every gravity-model variant
//! from two explicit descriptions: which location fixed-effect blocks to include
//! ([`FixedEffectsMode`]) and which covariates were supplied ([`CovariateSpec`]).
//!
//! Column order is always:
//!
//! 1. the intercept (unconstrained layout only),
//! 2. destination indicators, then origin indicators, with the first column of the
//!    combined indicator block removed as the reference level,
//! 3. `ln` of each origin covariate column, then of each destination covariate column,
//! 4. the transformed cost.
//!
//! The unconstrained layout is stored densely; layouts with indicator blocks are
//! stored as CSR since they grow with the number of distinct locations.

use crate::cost::CostFunction;
use crate::encode::{self, IndicatorBlock};
use crate::matrix::{DesignMatrix, Entry, MatrixError};
use crate::validate::{self, ValidationError};
use faer::sparse::Triplet;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Which location fixed-effect blocks enter the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixedEffectsMode {
    None,
    OriginOnly,
    DestinationOnly,
    Both,
}

/// The column-layout rules for one [`FixedEffectsMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRule {
    /// An explicit column of ones is placed first in X.
    pub intercept_column: bool,
    /// The first column of the combined indicator block is removed.
    pub drop_reference: bool,
    /// The GLM fitter prepends its own intercept as parameter 0.
    pub fitter_constant: bool,
    pub sparse: bool,
}

impl FixedEffectsMode {
    pub fn rule(self) -> LayoutRule {
        match self {
            Self::None => LayoutRule {
                intercept_column: true,
                drop_reference: false,
                fitter_constant: false,
                sparse: false,
            },
            Self::OriginOnly | Self::DestinationOnly => LayoutRule {
                intercept_column: false,
                drop_reference: true,
                fitter_constant: true,
                sparse: true,
            },
            Self::Both => LayoutRule {
                intercept_column: false,
                drop_reference: true,
                fitter_constant: false,
                sparse: true,
            },
        }
    }

    pub fn includes_origins(self) -> bool {
        matches!(self, Self::OriginOnly | Self::Both)
    }

    pub fn includes_destinations(self) -> bool {
        matches!(self, Self::DestinationOnly | Self::Both)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "unconstrained",
            Self::OriginOnly => "production-constrained",
            Self::DestinationOnly => "attraction-constrained",
            Self::Both => "doubly-constrained",
        }
    }

    /// Number of design-matrix columns for the given numbers of distinct origins and
    /// destinations and the supplied covariates.
    pub fn expected_columns(
        self,
        distinct_origins: usize,
        distinct_destinations: usize,
        covariates: CovariateSpec,
    ) -> usize {
        let rule = self.rule();
        let mut indicators = 0;
        if self.includes_origins() {
            indicators += distinct_origins;
        }
        if self.includes_destinations() {
            indicators += distinct_destinations;
        }
        if rule.drop_reference {
            indicators = indicators.saturating_sub(1);
        }
        usize::from(rule.intercept_column) + indicators + covariates.columns() + 1
    }
}

/// How many covariate columns each side contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CovariateSpec {
    pub origin: usize,
    pub destination: usize,
}

impl CovariateSpec {
    pub fn columns(self) -> usize {
        self.origin + self.destination
    }
}

/// Borrowed model inputs; every supplied array must have the same row count.
#[derive(Debug, Clone, Copy)]
pub struct DesignInputs<'a> {
    pub flows: ArrayView1<'a, f64>,
    pub cost: ArrayView1<'a, f64>,
    pub origin_vars: Option<ArrayView2<'a, f64>>,
    pub dest_vars: Option<ArrayView2<'a, f64>>,
    pub origins: Option<&'a [String]>,
    pub destinations: Option<&'a [String]>,
}

impl DesignInputs<'_> {
    pub fn covariates(&self) -> CovariateSpec {
        CovariateSpec {
            origin: self.origin_vars.map_or(0, |v| v.ncols()),
            destination: self.dest_vars.map_or(0, |v| v.ncols()),
        }
    }

    /// Validates lengths and flows, returning the number of observations.
    pub fn check(&self) -> Result<usize, ValidationError> {
        let mut lengths = vec![("flows", self.flows.len()), ("cost", self.cost.len())];
        if let Some(v) = self.origin_vars {
            lengths.push(("o_vars", v.nrows()));
        }
        if let Some(v) = self.dest_vars {
            lengths.push(("d_vars", v.nrows()));
        }
        if let Some(ids) = self.origins {
            lengths.push(("origins", ids.len()));
        }
        if let Some(ids) = self.destinations {
            lengths.push(("destinations", ids.len()));
        }
        let n = validate::check_arrays(&lengths)?;
        validate::check_y(self.flows, n)?;
        validate::check_finite("cost", self.cost)?;
        Ok(n)
    }
}

/// The response, design matrix and column labels handed to the GLM fitter.
#[derive(Debug, Clone)]
pub struct Design {
    pub y: Array1<f64>,
    pub x: DesignMatrix,
    pub columns: Vec<String>,
    pub mode: FixedEffectsMode,
}

impl Design {
    pub fn nobs(&self) -> usize {
        self.y.len()
    }

    /// Whether the fitter must supply the intercept.
    pub fn constant(&self) -> bool {
        self.mode.rule().fitter_constant
    }

    /// Number of coefficients the fitter estimates, including a fitter intercept.
    pub fn num_params(&self) -> usize {
        self.x.ncols() + usize::from(self.constant())
    }

    /// Residual degrees of freedom of a fit on this design.
    pub fn df_resid(&self) -> isize {
        self.nobs() as isize - self.num_params() as isize
    }

    /// Labels of the fitted parameters in order.
    pub fn param_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.num_params());
        if self.constant() {
            names.push("intercept".to_string());
        }
        names.extend(self.columns.iter().cloned());
        names
    }
}

/// Accumulates the nonzero entries and labels of the assembled columns.
struct Columns {
    nrows: usize,
    entries: Vec<Entry>,
    labels: Vec<String>,
}

impl Columns {
    fn new(nrows: usize) -> Self {
        Self {
            nrows,
            entries: Vec::new(),
            labels: Vec::new(),
        }
    }

    fn push_dense(&mut self, label: String, values: ArrayView1<f64>) {
        let col = self.labels.len();
        self.entries.extend(
            values
                .iter()
                .enumerate()
                .filter(|&(_, &value)| value != 0.0)
                .map(|(row, &value)| Triplet::new(row, col, value)),
        );
        self.labels.push(label);
    }

    /// Appends indicator columns, optionally without the block's first level.
    fn push_indicators(&mut self, prefix: &str, block: &IndicatorBlock, skip_first: bool) {
        self.entries
            .extend(block.entries(self.labels.len(), skip_first));
        self.labels.extend(
            block
                .kept_levels(skip_first)
                .iter()
                .map(|level| format!("{prefix}[{level}]")),
        );
    }

    fn push_log_block(&mut self, prefix: &str, values: ArrayView2<f64>) {
        for (j, column) in values.columns().into_iter().enumerate() {
            let logged = column.mapv(f64::ln);
            self.push_dense(format!("{prefix}{j}"), logged.view());
        }
    }

    fn finish(self, sparse: bool) -> Result<(DesignMatrix, Vec<String>), MatrixError> {
        let ncols = self.labels.len();
        let x = if sparse {
            DesignMatrix::sparse(self.nrows, ncols, &self.entries)?
        } else {
            DesignMatrix::dense(self.nrows, ncols, &self.entries)
        };
        Ok((x, self.labels))
    }
}

/// Assembles `(y, X)` for the given fixed-effects mode.
///
/// All validation happens before any column is built: mismatched lengths, empty
/// input, negative flows, missing identifiers for a requested block, non-positive
/// covariates and costs the transform cannot map are reported as
/// [`ValidationError`]s.
pub fn build_design(
    inputs: &DesignInputs<'_>,
    mode: FixedEffectsMode,
    cost_function: &CostFunction,
) -> Result<Design, ValidationError> {
    let n = inputs.check()?;
    let origins = match (mode.includes_origins(), inputs.origins) {
        (true, None) => {
            return Err(ValidationError::MissingInput {
                variant: mode.label(),
                input: "origins",
            });
        }
        (true, Some(ids)) => Some(ids),
        (false, _) => None,
    };
    let destinations = match (mode.includes_destinations(), inputs.destinations) {
        (true, None) => {
            return Err(ValidationError::MissingInput {
                variant: mode.label(),
                input: "destinations",
            });
        }
        (true, Some(ids)) => Some(ids),
        (false, _) => None,
    };
    if let Some(v) = inputs.origin_vars {
        validate::check_log_domain("o_vars", v)?;
    }
    if let Some(v) = inputs.dest_vars {
        validate::check_log_domain("d_vars", v)?;
    }
    let transformed_cost = cost_function.transform(inputs.cost)?;

    let rule = mode.rule();
    let mut columns = Columns::new(n);
    if rule.intercept_column {
        columns.push_dense("intercept".to_string(), Array1::ones(n).view());
    }
    let mut reference_pending = rule.drop_reference;
    if let Some(ids) = destinations {
        columns.push_indicators("dest", &encode::encode(ids), reference_pending);
        reference_pending = false;
    }
    if let Some(ids) = origins {
        columns.push_indicators("origin", &encode::encode(ids), reference_pending);
    }
    if let Some(v) = inputs.origin_vars {
        columns.push_log_block("log_origin_var", v);
    }
    if let Some(v) = inputs.dest_vars {
        columns.push_log_block("log_dest_var", v);
    }
    columns.push_dense("cost".to_string(), transformed_cost.view());

    let (x, labels) = columns.finish(rule.sparse)?;
    log::debug!(
        "Built {} design matrix: {} rows x {} columns ({})",
        mode.label(),
        x.nrows(),
        x.ncols(),
        if x.is_sparse() { "sparse" } else { "dense" }
    );
    Ok(Design {
        y: inputs.flows.to_owned(),
        x,
        columns: labels,
        mode,
    })
}
