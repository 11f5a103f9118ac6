#![deny(dead_code)]
#![deny(unused_imports)]

//! Calibration of Wilsonian gravity-type spatial interaction models.
//!
//! Four variants are provided through [`model::GravityModel`]: unconstrained,
//! production (origin) constrained, attraction (destination) constrained and
//! doubly constrained. All of them are Poisson GLMs with a log link whose design
//! matrix is assembled by [`design::build_design`].

pub mod cost;
pub mod data;
pub mod design;
pub mod encode;
pub mod glm;
pub mod local;
pub mod matrix;
pub mod model;
pub mod validate;

pub use cost::CostFunction;
pub use design::{CovariateSpec, FixedEffectsMode};
pub use local::{LocalAnchor, LocalResults};
pub use model::{FlowData, GravityError, GravityModel, ModelKind, ModelOptions};
