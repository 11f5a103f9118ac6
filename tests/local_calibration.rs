mod common;

use approx::assert_abs_diff_eq;
use common::*;
use spint::validate::ValidationError;
use spint::{CostFunction, GravityError, GravityModel, LocalAnchor, ModelKind, ModelOptions};

fn fit(kind: ModelKind, data: spint::FlowData) -> GravityModel {
    GravityModel::fit(kind, data, CostFunction::Pow, ModelOptions::default()).unwrap()
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[test]
fn production_locals_recover_each_origin_effect() {
    let model = fit(ModelKind::Production, without_origin_vars(exact_flows()));
    let local = model.local(None).unwrap();
    assert_eq!(local.locations, names(&ORIGINS));
    assert_eq!(local.param_names, names(&["intercept", "log_dest_var0", "cost"]));
    for (i, intercept) in local.param(0).unwrap().iter().enumerate() {
        assert_abs_diff_eq!(*intercept, K + ALPHA * ORIGIN_POP[i].ln(), epsilon = 1e-6);
    }
    for value in local.param(1).unwrap() {
        assert_abs_diff_eq!(*value, GAMMA, epsilon = 1e-6);
    }
    for value in local.param(2).unwrap() {
        assert_abs_diff_eq!(*value, BETA, epsilon = 1e-6);
    }
    assert_eq!(local.aic().len(), 4);
    assert!(local.param(3).is_none());
}

#[test]
fn attraction_and_gravity_locals_agree_when_anchored_on_destinations() {
    let exact = exact_flows();
    let attraction = fit(ModelKind::Attraction, without_dest_vars(exact.clone()))
        .local(None)
        .unwrap();
    let gravity = fit(ModelKind::Gravity, exact)
        .local_with(LocalAnchor::Destinations, None)
        .unwrap();
    assert_eq!(attraction.locations, names(&DESTINATIONS));
    assert_eq!(attraction.param_names, gravity.param_names);
    assert_eq!(
        gravity.param_names,
        names(&["intercept", "log_origin_var0", "cost"])
    );
    for (j, intercept) in gravity.param(0).unwrap().iter().enumerate() {
        assert_abs_diff_eq!(*intercept, K + GAMMA * DEST_JOBS[j].ln(), epsilon = 1e-6);
    }
    for k in 0..3 {
        for (a, g) in attraction.param(k).unwrap().iter().zip(gravity.param(k).unwrap()) {
            assert_abs_diff_eq!(*a, *g, epsilon = 1e-6);
        }
    }
}

#[test]
fn gravity_locals_anchored_on_origins_drop_origin_covariates() {
    let local = fit(ModelKind::Gravity, exact_flows())
        .local_with(LocalAnchor::Origins, None)
        .unwrap();
    assert_eq!(local.param_names, names(&["intercept", "log_dest_var0", "cost"]));
    for value in local.param(1).unwrap() {
        assert_abs_diff_eq!(*value, GAMMA, epsilon = 1e-6);
    }
}

#[test]
fn custom_index_partitions_keep_every_covariate() {
    let keys: Vec<String> = (0..16)
        .map(|row| if row < 8 { "north" } else { "south" }.to_string())
        .collect();
    let local = fit(ModelKind::Gravity, exact_flows())
        .local_with(LocalAnchor::Index(keys), None)
        .unwrap();
    assert_eq!(local.locations, names(&["north", "south"]));
    assert_eq!(local.num_params(), 4);
    for (k, truth) in [K, ALPHA, GAMMA, BETA].into_iter().enumerate() {
        for value in local.param(k).unwrap() {
            assert_abs_diff_eq!(*value, truth, epsilon = 1e-6);
        }
    }
}

#[test]
fn single_location_local_matches_the_global_fit() {
    let data = without_origin_vars(observed_flows());
    let rows: Vec<usize> = (8..12).collect();
    let subset = data.select(&rows);
    assert!(subset.origins.as_ref().unwrap().iter().all(|o| o == "O3"));

    let global = fit(ModelKind::Production, subset);
    let local = global.local(None).unwrap();
    assert_eq!(local.locations, names(&["O3"]));
    for (k, estimate) in global.params().iter().enumerate() {
        assert_abs_diff_eq!(local.param(k).unwrap()[0], *estimate, epsilon = 1e-10);
        assert_abs_diff_eq!(local.pvalue(k).unwrap()[0], global.p_values()[k], epsilon = 1e-10);
        assert_abs_diff_eq!(local.tvalue(k).unwrap()[0], global.t_values()[k], epsilon = 1e-10);
    }
    assert_abs_diff_eq!(local.aic()[0], global.aic(), epsilon = 1e-10);
    assert_abs_diff_eq!(local.deviance()[0], global.deviance(), epsilon = 1e-10);
}

#[test]
fn requested_locations_are_returned_in_key_order() {
    let model = fit(ModelKind::Production, without_origin_vars(observed_flows()));
    let requested = names(&["O4", "O2"]);
    let local = model.local(Some(requested.as_slice())).unwrap();
    assert_eq!(local.locations, names(&["O2", "O4"]));
    assert_eq!(local.len(), 2);
    assert!(local.iter().all(|(_, values)| values.len() == 2));
}

#[test]
fn unknown_locations_are_rejected() {
    let model = fit(ModelKind::Production, without_origin_vars(observed_flows()));
    let err = model.local(Some(names(&["O9"]).as_slice())).unwrap_err();
    assert!(matches!(
        err,
        GravityError::Validation(ValidationError::UnknownLocation(ref key)) if key == "O9"
    ));
}

#[test]
fn index_anchor_must_cover_every_flow() {
    let model = fit(ModelKind::Gravity, observed_flows());
    let err = model
        .local_with(LocalAnchor::Index(names(&["a", "b"])), None)
        .unwrap_err();
    assert!(matches!(
        err,
        GravityError::Validation(ValidationError::LengthMismatch { .. })
    ));
}

#[test]
fn doubly_constrained_models_have_no_local_form() {
    let model = fit(ModelKind::Doubly, without_covariates(observed_flows()));
    for anchor in [LocalAnchor::Origins, LocalAnchor::Destinations] {
        assert!(matches!(
            model.local_with(anchor, None),
            Err(GravityError::UnsupportedOperation { variant: "doubly", .. })
        ));
    }
}

fn gravity_from_constructor(destinations: Option<Vec<String>>) -> GravityModel {
    let data = exact_flows();
    GravityModel::gravity(
        data.flows,
        data.origin_vars.unwrap(),
        data.dest_vars.unwrap(),
        data.cost,
        data.origins,
        destinations,
        CostFunction::Pow,
        ModelOptions::default(),
    )
    .unwrap()
}

#[test]
fn gravity_constructor_supports_local_calibration_by_destination() {
    let destinations = exact_flows().destinations;
    let local = gravity_from_constructor(destinations).local(None).unwrap();
    assert_eq!(local.locations, names(&DESTINATIONS));
    assert_eq!(local.param_names, names(&["intercept", "log_origin_var0", "cost"]));
    for (j, intercept) in local.param(0).unwrap().iter().enumerate() {
        assert_abs_diff_eq!(*intercept, K + GAMMA * DEST_JOBS[j].ln(), epsilon = 1e-6);
    }
    for value in local.param(2).unwrap() {
        assert_abs_diff_eq!(*value, BETA, epsilon = 1e-6);
    }
}

#[test]
fn gravity_constructor_without_destinations_names_the_missing_input() {
    let err = gravity_from_constructor(None).local(None).unwrap_err();
    assert!(matches!(
        err,
        GravityError::Validation(ValidationError::MissingInput {
            variant: "gravity",
            input: "destinations"
        })
    ));
}

#[test]
fn index_of_destination_ids_drops_the_constant_destination_covariate() {
    let model = fit(ModelKind::Gravity, exact_flows());
    let keys = model.data().destinations.clone().unwrap();
    let by_index = model.local_with(LocalAnchor::Index(keys), None).unwrap();
    let by_anchor = model.local_with(LocalAnchor::Destinations, None).unwrap();
    assert_eq!(by_index.param_names, by_anchor.param_names);
    assert_eq!(by_index.locations, by_anchor.locations);
    for k in 0..by_anchor.num_params() {
        for (a, b) in by_index.param(k).unwrap().iter().zip(by_anchor.param(k).unwrap()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }
}

#[test]
fn failed_partition_fit_aborts_with_the_first_failing_location() {
    // O3 and O4 have unit cost throughout, so ln(cost) is a zero column there.
    let mut data = without_covariates(observed_flows());
    for row in 8..16 {
        data.cost[row] = 1.0;
    }
    let model = fit(ModelKind::Production, data);
    match model.local(None).unwrap_err() {
        GravityError::LocalFit { location, source } => {
            assert_eq!(location, "O3");
            assert!(matches!(*source, GravityError::Fit { variant: "production", .. }));
        }
        other => panic!("Expected LocalFit, got {:?}", other),
    }
    let healthy = names(&["O1", "O2"]);
    assert_eq!(model.local(Some(healthy.as_slice())).unwrap().len(), 2);
}
