use crate::cost::{CostFunction, InvalidCostFunction};
use crate::design::{self, Design, DesignInputs, FixedEffectsMode};
use crate::glm::{self, Family, FitError, FitResult, GlmConfig};
use crate::validate::ValidationError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Public Data Structures ---

/// The four members of the Wilson family of spatial interaction models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Unconstrained: origin and destination covariates, no fixed effects.
    Gravity,
    /// Origin (production) constrained: origin fixed effects.
    Production,
    /// Destination (attraction) constrained: destination fixed effects.
    Attraction,
    /// Both origin and destination fixed effects.
    Doubly,
}

impl ModelKind {
    pub fn fixed_effects(self) -> FixedEffectsMode {
        match self {
            Self::Gravity => FixedEffectsMode::None,
            Self::Production => FixedEffectsMode::OriginOnly,
            Self::Attraction => FixedEffectsMode::DestinationOnly,
            Self::Doubly => FixedEffectsMode::Both,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gravity => "gravity",
            Self::Production => "production",
            Self::Attraction => "attraction",
            Self::Doubly => "doubly",
        }
    }

    /// Checks that the inputs this variant needs are present and that it is not
    /// handed covariates it would absorb into its fixed effects.
    pub fn check_inputs(self, data: &FlowData) -> Result<(), ValidationError> {
        let missing = |input| ValidationError::MissingInput {
            variant: self.name(),
            input,
        };
        let unexpected = |input| ValidationError::UnexpectedInput {
            variant: self.name(),
            input,
        };
        match self {
            Self::Gravity => {
                if data.origin_vars.is_none() {
                    return Err(missing("o_vars"));
                }
                if data.dest_vars.is_none() {
                    return Err(missing("d_vars"));
                }
            }
            Self::Production => {
                if data.origins.is_none() {
                    return Err(missing("origins"));
                }
                if data.origin_vars.is_some() {
                    return Err(unexpected("o_vars"));
                }
            }
            Self::Attraction => {
                if data.destinations.is_none() {
                    return Err(missing("destinations"));
                }
                if data.dest_vars.is_some() {
                    return Err(unexpected("d_vars"));
                }
            }
            Self::Doubly => {
                if data.origins.is_none() {
                    return Err(missing("origins"));
                }
                if data.destinations.is_none() {
                    return Err(missing("destinations"));
                }
                if data.origin_vars.is_some() {
                    return Err(unexpected("o_vars"));
                }
                if data.dest_vars.is_some() {
                    return Err(unexpected("d_vars"));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = GravityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gravity" | "unconstrained" => Ok(Self::Gravity),
            "production" | "origin" => Ok(Self::Production),
            "attraction" | "destination" => Ok(Self::Attraction),
            "doubly" | "both" => Ok(Self::Doubly),
            _ => Err(GravityError::InvalidConfiguration(format!(
                "unknown model kind '{s}'; expected gravity, production, attraction or doubly"
            ))),
        }
    }
}

/// Fitting options shared by every variant. Readable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Only `"glm"` is implemented.
    pub framework: String,
    /// Estimate a dispersion scale (quasi-Poisson) instead of fixing it at 1.
    pub quasi: bool,
    pub spatial_filter: bool,
    pub competing_destinations: bool,
    pub spatial_lag: bool,
    pub glm: GlmConfig,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            framework: "glm".to_string(),
            quasi: false,
            spatial_filter: false,
            competing_destinations: false,
            spatial_lag: false,
            glm: GlmConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("Failed to read options file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML options: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl ModelOptions {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn family(&self) -> Family {
        if self.quasi {
            Family::QuasiPoisson
        } else {
            Family::Poisson
        }
    }

    /// Rejects requests for behavior this crate does not provide.
    pub fn check(&self) -> Result<(), GravityError> {
        if self.spatial_filter {
            return Err(GravityError::NotImplemented(
                "Spatial filter model".to_string(),
            ));
        }
        if self.competing_destinations {
            return Err(GravityError::NotImplemented(
                "Competing destination model".to_string(),
            ));
        }
        if self.spatial_lag {
            return Err(GravityError::NotImplemented(
                "Spatial lag autoregressive model".to_string(),
            ));
        }
        if !self.framework.trim().eq_ignore_ascii_case("glm") {
            return Err(GravityError::NotImplemented(format!(
                "The '{}' framework (only GLM is available)",
                self.framework
            )));
        }
        Ok(())
    }
}

/// An owned observation set: one row per origin-destination flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowData {
    pub flows: Array1<f64>,
    pub cost: Array1<f64>,
    pub origins: Option<Vec<String>>,
    pub destinations: Option<Vec<String>>,
    /// Origin attributes, one column per attribute.
    pub origin_vars: Option<Array2<f64>>,
    /// Destination attributes, one column per attribute.
    pub dest_vars: Option<Array2<f64>>,
}

impl FlowData {
    pub fn new(flows: Array1<f64>, cost: Array1<f64>) -> Self {
        Self {
            flows,
            cost,
            origins: None,
            destinations: None,
            origin_vars: None,
            dest_vars: None,
        }
    }

    pub fn with_origins<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.origins = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_destinations<S: Into<String>>(
        mut self,
        ids: impl IntoIterator<Item = S>,
    ) -> Self {
        self.destinations = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_origin_vars(mut self, vars: Array2<f64>) -> Self {
        self.origin_vars = Some(vars);
        self
    }

    pub fn with_dest_vars(mut self, vars: Array2<f64>) -> Self {
        self.dest_vars = Some(vars);
        self
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn inputs(&self) -> DesignInputs<'_> {
        DesignInputs {
            flows: self.flows.view(),
            cost: self.cost.view(),
            origin_vars: self.origin_vars.as_ref().map(Array2::view),
            dest_vars: self.dest_vars.as_ref().map(Array2::view),
            origins: self.origins.as_deref(),
            destinations: self.destinations.as_deref(),
        }
    }

    /// Drops the covariates `kind` absorbs into its fixed effects, so that a table
    /// carrying every attribute can be fitted with any variant.
    pub fn for_kind(mut self, kind: ModelKind) -> Self {
        let (drop_origin, drop_dest) = match kind {
            ModelKind::Gravity => (false, false),
            ModelKind::Production => (true, false),
            ModelKind::Attraction => (false, true),
            ModelKind::Doubly => (true, true),
        };
        if drop_origin && self.origin_vars.take().is_some() {
            log::warn!("Ignoring origin attributes: the {kind} model absorbs them into its origin fixed effects");
        }
        if drop_dest && self.dest_vars.take().is_some() {
            log::warn!("Ignoring destination attributes: the {kind} model absorbs them into its destination fixed effects");
        }
        self
    }

    /// The observations at `rows`, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        let pick_ids = |ids: &Vec<String>| -> Vec<String> { rows.iter().map(|&i| ids[i].clone()).collect() };
        Self {
            flows: self.flows.select(Axis(0), rows),
            cost: self.cost.select(Axis(0), rows),
            origins: self.origins.as_ref().map(pick_ids),
            destinations: self.destinations.as_ref().map(pick_ids),
            origin_vars: self.origin_vars.as_ref().map(|v| v.select(Axis(0), rows)),
            dest_vars: self.dest_vars.as_ref().map(|v| v.select(Axis(0), rows)),
        }
    }
}

/// Every way building or using a gravity model can fail.
#[derive(Error, Debug)]
pub enum GravityError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} is not yet implemented.")]
    NotImplemented(String),
    #[error("Unsupported operation on the {variant} model: {reason}")]
    UnsupportedOperation {
        variant: &'static str,
        reason: String,
    },
    #[error("Fitting the {variant} model failed: {source}")]
    Fit {
        variant: &'static str,
        #[source]
        source: FitError,
    },
    #[error("Local calibration failed for location '{location}': {source}")]
    LocalFit {
        location: String,
        #[source]
        source: Box<GravityError>,
    },
}

impl From<InvalidCostFunction> for GravityError {
    fn from(err: InvalidCostFunction) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

/// A calibrated gravity-type spatial interaction model.
///
/// Construction always fits; the instance owns its inputs, design matrix and
/// results, none of which change afterwards.
#[derive(Debug, Clone)]
pub struct GravityModel {
    pub(crate) kind: ModelKind,
    pub(crate) data: FlowData,
    pub(crate) cost_function: CostFunction,
    pub(crate) options: ModelOptions,
    pub(crate) design: Design,
    pub(crate) results: FitResult,
}

impl GravityModel {
    /// Unconstrained model: `ln μ = k + α ln(o_vars) + γ ln(d_vars) + β f(cost)`.
    ///
    /// The location ids do not enter the fit; they are kept for
    /// [`local`](Self::local) calibration, which partitions by destination unless
    /// told otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn gravity(
        flows: Array1<f64>,
        origin_vars: Array2<f64>,
        dest_vars: Array2<f64>,
        cost: Array1<f64>,
        origins: Option<Vec<String>>,
        destinations: Option<Vec<String>>,
        cost_function: CostFunction,
        options: ModelOptions,
    ) -> Result<Self, GravityError> {
        let mut data = FlowData::new(flows, cost)
            .with_origin_vars(origin_vars)
            .with_dest_vars(dest_vars);
        data.origins = origins;
        data.destinations = destinations;
        Self::fit(ModelKind::Gravity, data, cost_function, options)
    }

    /// Production-constrained model with one fixed effect per origin.
    pub fn production(
        flows: Array1<f64>,
        origins: Vec<String>,
        dest_vars: Option<Array2<f64>>,
        cost: Array1<f64>,
        cost_function: CostFunction,
        options: ModelOptions,
    ) -> Result<Self, GravityError> {
        let mut data = FlowData::new(flows, cost).with_origins(origins);
        data.dest_vars = dest_vars;
        Self::fit(ModelKind::Production, data, cost_function, options)
    }

    /// Attraction-constrained model with one fixed effect per destination.
    pub fn attraction(
        flows: Array1<f64>,
        destinations: Vec<String>,
        origin_vars: Option<Array2<f64>>,
        cost: Array1<f64>,
        cost_function: CostFunction,
        options: ModelOptions,
    ) -> Result<Self, GravityError> {
        let mut data = FlowData::new(flows, cost).with_destinations(destinations);
        data.origin_vars = origin_vars;
        Self::fit(ModelKind::Attraction, data, cost_function, options)
    }

    /// Doubly-constrained model with origin and destination fixed effects.
    pub fn doubly(
        flows: Array1<f64>,
        origins: Vec<String>,
        destinations: Vec<String>,
        cost: Array1<f64>,
        cost_function: CostFunction,
        options: ModelOptions,
    ) -> Result<Self, GravityError> {
        let data = FlowData::new(flows, cost)
            .with_origins(origins)
            .with_destinations(destinations);
        Self::fit(ModelKind::Doubly, data, cost_function, options)
    }

    /// Validates `data` for `kind`, builds its design matrix and fits it.
    pub fn fit(
        kind: ModelKind,
        data: FlowData,
        cost_function: CostFunction,
        options: ModelOptions,
    ) -> Result<Self, GravityError> {
        options.check()?;
        kind.check_inputs(&data)?;
        let design = design::build_design(&data.inputs(), kind.fixed_effects(), &cost_function)?;
        Self::from_design(kind, data, cost_function, options, design)
    }

    /// Fits an already assembled design.
    pub(crate) fn from_design(
        kind: ModelKind,
        data: FlowData,
        cost_function: CostFunction,
        options: ModelOptions,
        design: Design,
    ) -> Result<Self, GravityError> {
        let results = glm::fit(
            design.y.view(),
            &design.x,
            design.constant(),
            options.family(),
            &options.glm,
        )
        .map_err(|source| GravityError::Fit {
            variant: kind.name(),
            source,
        })?;
        log::info!(
            "Calibrated {} model: {} observations, {} parameters, deviance {:.4}, AIC {:.4}",
            kind,
            design.nobs(),
            results.params.len(),
            results.deviance,
            results.aic
        );
        Ok(Self {
            kind,
            data,
            cost_function,
            options,
            design,
            results,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Number of observations.
    pub fn n(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &FlowData {
        &self.data
    }

    /// The resolved cost transform, shared with any local sub-model.
    pub fn cost_function(&self) -> &CostFunction {
        &self.cost_function
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn results(&self) -> &FitResult {
        &self.results
    }

    pub fn param_names(&self) -> Vec<String> {
        self.design.param_names()
    }

    pub fn params(&self) -> ArrayView1<'_, f64> {
        self.results.params.view()
    }

    pub fn std_err(&self) -> ArrayView1<'_, f64> {
        self.results.std_err.view()
    }

    pub fn t_values(&self) -> ArrayView1<'_, f64> {
        self.results.t_values.view()
    }

    pub fn p_values(&self) -> ArrayView1<'_, f64> {
        self.results.p_values.view()
    }

    pub fn cov_params(&self) -> ArrayView2<'_, f64> {
        self.results.cov_params.view()
    }

    /// Predicted flows.
    pub fn yhat(&self) -> ArrayView1<'_, f64> {
        self.results.fitted_values.view()
    }

    pub fn residuals(&self) -> ArrayView1<'_, f64> {
        self.results.residuals.view()
    }

    pub fn deviance(&self) -> f64 {
        self.results.deviance
    }

    pub fn log_likelihood(&self) -> f64 {
        self.results.log_likelihood
    }

    pub fn aic(&self) -> f64 {
        self.results.aic
    }
}
