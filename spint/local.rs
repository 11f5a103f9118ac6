//! # Local Calibration
//!
//! Refits a model once per location, using only the flows anchored at that
//! location, to expose spatial variation in the estimated effects.
//!
//! Results are aligned arrays keyed by statistic name (`"aic"`, `"deviance"`,
//! `"param{k}"`, `"pvalue{k}"`, `"tvalue{k}"`), one entry per location in
//! ascending key order. The run is all-or-nothing: if any location cannot be
//! fitted the whole call fails and reports the first such location in key order.

use crate::design::{self, Design};
use crate::encode;
use crate::model::{FlowData, GravityError, GravityModel, ModelKind};
use crate::validate::{self, ValidationError};
use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Which location key partitions the observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAnchor {
    Origins,
    Destinations,
    /// A caller-supplied key per observation.
    Index(Vec<String>),
}

impl LocalAnchor {
    /// The anchor used by [`GravityModel::local`] for each variant.
    pub fn default_for(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Production => Self::Origins,
            ModelKind::Gravity | ModelKind::Attraction | ModelKind::Doubly => Self::Destinations,
        }
    }

    fn keys<'a>(&'a self, kind: ModelKind, data: &'a FlowData) -> Result<&'a [String], ValidationError> {
        let keys = match self {
            Self::Origins => data.origins.as_deref().ok_or(ValidationError::MissingInput {
                variant: kind.name(),
                input: "origins",
            })?,
            Self::Destinations => {
                data.destinations
                    .as_deref()
                    .ok_or(ValidationError::MissingInput {
                        variant: kind.name(),
                        input: "destinations",
                    })?
            }
            Self::Index(keys) => keys.as_slice(),
        };
        validate::check_arrays(&[("flows", data.len()), ("location index", keys.len())])?;
        Ok(keys)
    }
}

/// Per-location statistics, aligned to `locations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalResults {
    /// Location keys in ascending order.
    pub locations: Vec<String>,
    /// Names of the coefficients behind `param{k}`.
    pub param_names: Vec<String>,
    stats: BTreeMap<String, Vec<f64>>,
}

impl LocalResults {
    /// Values of one statistic, e.g. `"aic"` or `"param1"`.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.stats.get(name).map(Vec::as_slice)
    }

    pub fn aic(&self) -> &[f64] {
        &self.stats["aic"]
    }

    pub fn deviance(&self) -> &[f64] {
        &self.stats["deviance"]
    }

    pub fn param(&self, k: usize) -> Option<&[f64]> {
        self.get(&format!("param{k}"))
    }

    pub fn pvalue(&self, k: usize) -> Option<&[f64]> {
        self.get(&format!("pvalue{k}"))
    }

    pub fn tvalue(&self, k: usize) -> Option<&[f64]> {
        self.get(&format!("tvalue{k}"))
    }

    pub fn num_params(&self) -> usize {
        self.param_names.len()
    }

    /// Number of locations.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Statistic names and their values, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.stats.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// The fitted statistics of one location's sub-model.
struct LocalFit {
    param_names: Vec<String>,
    aic: f64,
    deviance: f64,
    params: Vec<f64>,
    p_values: Vec<f64>,
    t_values: Vec<f64>,
}

impl GravityModel {
    /// Calibrates one sub-model per location using the variant's natural anchor:
    /// origins for production-constrained models, destinations otherwise.
    ///
    /// `locs` restricts the run to the given keys; `None` or an empty slice means
    /// every key present in the data.
    pub fn local(&self, locs: Option<&[String]>) -> Result<LocalResults, GravityError> {
        self.local_with(LocalAnchor::default_for(self.kind), locs)
    }

    /// Calibrates one sub-model per value of `anchor`.
    ///
    /// Sub-models anchored on origins (destinations) leave out the origin
    /// (destination) covariates, which are constant within a partition and would
    /// duplicate the intercept. Under an [`LocalAnchor::Index`] any covariate
    /// block that is constant within the partition is left out for the same reason.
    pub fn local_with(
        &self,
        anchor: LocalAnchor,
        locs: Option<&[String]>,
    ) -> Result<LocalResults, GravityError> {
        if self.kind == ModelKind::Doubly {
            return Err(GravityError::UnsupportedOperation {
                variant: self.kind.name(),
                reason: "local models are not possible due to insufficient degrees of freedom"
                    .to_string(),
            });
        }

        let keys = anchor.keys(self.kind, &self.data)?;
        let mut partitions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (row, key) in keys.iter().enumerate() {
            partitions.entry(key.as_str()).or_default().push(row);
        }

        let selected: Vec<String> = match locs {
            Some(requested) if !requested.is_empty() => {
                let requested: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
                if let Some(unknown) = requested.iter().find(|k| !partitions.contains_key(*k)) {
                    return Err(ValidationError::UnknownLocation(unknown.to_string()).into());
                }
                requested.into_iter().map(str::to_string).collect()
            }
            _ => encode::unique_sorted(keys),
        };

        log::info!(
            "Local calibration of {} model over {} locations",
            self.kind,
            selected.len()
        );

        let fits: Vec<Result<LocalFit, GravityError>> = selected
            .par_iter()
            .map(|location| self.fit_location(&anchor, location, &partitions[location.as_str()]))
            .collect();

        let mut param_names: Option<Vec<String>> = None;
        let mut stats: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (location, fit) in selected.iter().zip(fits) {
            let fit = fit?;
            let names = param_names.get_or_insert_with(|| {
                for k in 0..fit.params.len() {
                    for stat in ["param", "pvalue", "tvalue"] {
                        stats.insert(format!("{stat}{k}"), Vec::with_capacity(selected.len()));
                    }
                }
                fit.param_names.clone()
            });
            if *names != fit.param_names {
                return Err(GravityError::UnsupportedOperation {
                    variant: self.kind.name(),
                    reason: format!(
                        "location '{location}' yields coefficients {:?}, but earlier locations yield {:?}",
                        fit.param_names, names
                    ),
                });
            }
            stats.entry("aic".to_string()).or_default().push(fit.aic);
            stats.entry("deviance".to_string()).or_default().push(fit.deviance);
            for (k, ((param, p), t)) in fit
                .params
                .iter()
                .zip(&fit.p_values)
                .zip(&fit.t_values)
                .enumerate()
            {
                stats.entry(format!("param{k}")).or_default().push(*param);
                stats.entry(format!("pvalue{k}")).or_default().push(*p);
                stats.entry(format!("tvalue{k}")).or_default().push(*t);
            }
        }

        Ok(LocalResults {
            locations: selected,
            param_names: param_names.unwrap_or_default(),
            stats,
        })
    }

    /// Builds and fits the sub-model of a single location.
    fn fit_location(
        &self,
        anchor: &LocalAnchor,
        location: &str,
        rows: &[usize],
    ) -> Result<LocalFit, GravityError> {
        let mut data = self.data.select(rows);
        match anchor {
            LocalAnchor::Origins => data.origin_vars = None,
            LocalAnchor::Destinations => data.dest_vars = None,
            LocalAnchor::Index(_) => {
                if data.origin_vars.as_ref().is_some_and(is_constant) {
                    data.origin_vars = None;
                }
                if data.dest_vars.as_ref().is_some_and(is_constant) {
                    data.dest_vars = None;
                }
            }
        }

        let wrap = |source: GravityError| GravityError::LocalFit {
            location: location.to_string(),
            source: Box::new(source),
        };
        let design: Design =
            design::build_design(&data.inputs(), self.kind.fixed_effects(), &self.cost_function)
                .map_err(|e| wrap(e.into()))?;
        if design.df_resid() <= 0 {
            return Err(GravityError::UnsupportedOperation {
                variant: self.kind.name(),
                reason: format!(
                    "location '{location}' has {} observations for {} parameters (insufficient degrees of freedom)",
                    design.nobs(),
                    design.num_params()
                ),
            });
        }

        log::debug!(
            "Fitting local {} model for '{}' on {} observations",
            self.kind,
            location,
            rows.len()
        );
        let model = GravityModel::from_design(
            self.kind,
            data,
            self.cost_function.clone(),
            self.options.clone(),
            design,
        )
        .map_err(wrap)?;

        Ok(LocalFit {
            param_names: model.param_names(),
            aic: model.aic(),
            deviance: model.deviance(),
            params: model.params().to_vec(),
            p_values: model.p_values().to_vec(),
            t_values: model.t_values().to_vec(),
        })
    }
}

/// Whether every column holds a single value.
fn is_constant(vars: &Array2<f64>) -> bool {
    vars.columns()
        .into_iter()
        .all(|column| column.iter().all(|&v| v == column[0]))
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostFunction;
    use crate::model::ModelOptions;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// Three origins with four flows each, to a spread of destinations.
    fn production_model() -> GravityModel {
        let flows = array![12.0, 7.0, 3.0, 9.0, 20.0, 14.0, 4.0, 6.0, 8.0, 15.0, 2.0, 5.0];
        let cost = array![1.0, 2.0, 4.0, 1.5, 1.0, 1.8, 3.5, 2.7, 2.2, 1.1, 4.2, 3.1];
        let dest_vars = array![
            [30.0], [20.0], [10.0], [25.0], [30.0], [20.0], [10.0], [25.0], [30.0], [20.0],
            [10.0], [25.0]
        ];
        let origins = ids(&["B", "B", "B", "B", "A", "A", "A", "A", "C", "C", "C", "C"]);
        GravityModel::production(
            flows,
            origins,
            Some(dest_vars),
            cost,
            CostFunction::Pow,
            ModelOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn results_are_aligned_and_sorted_by_location() {
        let model = production_model();
        let local = model.local(None).unwrap();
        assert_eq!(local.locations, ids(&["A", "B", "C"]));
        assert_eq!(local.param_names, ids(&["intercept", "log_dest_var0", "cost"]));
        assert_eq!(local.num_params(), 3);
        for (name, values) in local.iter() {
            assert_eq!(values.len(), 3, "statistic {name} is misaligned");
        }
        assert_eq!(local.iter().count(), 2 + 3 * 3);
        assert!(local.param(3).is_none());
    }

    #[test]
    fn each_entry_matches_a_standalone_fit_of_that_location() {
        let model = production_model();
        let local = model.local(None).unwrap();
        let rows_of_b = [0, 1, 2, 3];
        let data = model.data().select(&rows_of_b);
        let standalone = GravityModel::production(
            data.flows,
            data.origins.unwrap(),
            data.dest_vars,
            data.cost,
            CostFunction::Pow,
            ModelOptions::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(local.aic()[1], standalone.aic(), epsilon = 1e-10);
        for k in 0..3 {
            assert_abs_diff_eq!(local.param(k).unwrap()[1], standalone.params()[k], epsilon = 1e-10);
        }
    }

    #[test]
    fn requested_locations_are_deduplicated_and_sorted() {
        let model = production_model();
        let local = model.local(Some(ids(&["C", "A", "C"]).as_slice())).unwrap();
        assert_eq!(local.locations, ids(&["A", "C"]));
        assert_eq!(local.deviance().len(), 2);
    }

    #[test]
    fn unknown_locations_are_rejected() {
        let model = production_model();
        let err = model.local(Some(ids(&["Z"]).as_slice())).unwrap_err();
        assert!(matches!(
            err,
            GravityError::Validation(ValidationError::UnknownLocation(ref k)) if k == "Z"
        ));
    }

    #[test]
    fn degenerate_partition_aborts_the_whole_run() {
        let flows = array![12.0, 7.0, 3.0, 9.0, 20.0, 14.0];
        let cost = array![1.0, 2.0, 4.0, 1.5, 1.0, 1.8];
        let dest_vars = array![[30.0], [20.0], [10.0], [25.0], [30.0], [20.0]];
        let origins = ids(&["A", "A", "A", "A", "B", "B"]);
        let model = GravityModel::production(
            flows,
            origins,
            Some(dest_vars),
            cost,
            CostFunction::Pow,
            ModelOptions::default(),
        )
        .unwrap();
        let err = model.local(None).unwrap_err();
        match err {
            GravityError::UnsupportedOperation { variant, reason } => {
                assert_eq!(variant, "production");
                assert!(reason.contains("'B'"), "{reason}");
            }
            other => panic!("Expected UnsupportedOperation, got {:?}", other),
        }
    }

    #[test]
    fn index_anchor_must_match_the_observations() {
        let model = production_model();
        let err = model
            .local_with(LocalAnchor::Index(ids(&["r1", "r2"])), None)
            .unwrap_err();
        assert!(matches!(
            err,
            GravityError::Validation(ValidationError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn doubly_local_is_always_unsupported() {
        let model = GravityModel::doubly(
            array![10.0, 20.0, 5.0, 15.0, 7.0],
            ids(&["A", "A", "B", "B", "C"]),
            ids(&["X", "Y", "X", "Y", "X"]),
            array![1.0, 2.0, 1.5, 4.0, 3.0],
            CostFunction::Exp,
            ModelOptions::default(),
        )
        .unwrap();
        for anchor in [LocalAnchor::Origins, LocalAnchor::Destinations] {
            assert!(matches!(
                model.local_with(anchor, None),
                Err(GravityError::UnsupportedOperation { variant: "doubly", .. })
            ));
        }
        assert!(matches!(
            model.local(None),
            Err(GravityError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn local_models_share_the_parent_cost_function() {
        let shared = CostFunction::custom(|c| -c);
        let model = GravityModel::production(
            array![12.0, 7.0, 3.0, 9.0, 20.0, 14.0, 4.0, 6.0],
            ids(&["A", "A", "A", "A", "B", "B", "B", "B"]),
            None,
            array![1.0, 2.0, 4.0, 1.5, 1.0, 1.8, 3.5, 2.7],
            shared.clone(),
            ModelOptions::default(),
        )
        .unwrap();
        assert!(model.cost_function().same_as(&shared));
        let local = model.local(None).unwrap();
        assert_eq!(local.param_names, ids(&["intercept", "cost"]));
        assert!(local.param(1).unwrap().iter().all(|v| v.is_finite()));
    }
}
