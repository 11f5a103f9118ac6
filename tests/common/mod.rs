#![allow(dead_code)]

use ndarray::{Array1, Array2};
use spint::FlowData;

pub const ORIGINS: [&str; 4] = ["O1", "O2", "O3", "O4"];
pub const DESTINATIONS: [&str; 4] = ["D1", "D2", "D3", "D4"];
pub const ORIGIN_POP: [f64; 4] = [100.0, 50.0, 200.0, 80.0];
pub const DEST_JOBS: [f64; 4] = [30.0, 60.0, 45.0, 20.0];
pub const COST: [[f64; 4]; 4] = [
    [1.0, 2.0, 3.0, 2.4],
    [2.5, 1.5, 2.0, 3.2],
    [3.0, 2.2, 1.2, 1.7],
    [1.8, 3.5, 2.6, 1.1],
];

/// Generating coefficients of the exact data set.
pub const K: f64 = 1.0;
pub const ALPHA: f64 = 0.5;
pub const GAMMA: f64 = 0.3;
pub const BETA: f64 = -1.2;

pub const OBSERVED: [[f64; 4]; 4] = [
    [52.0, 30.0, 12.0, 18.0],
    [20.0, 41.0, 25.0, 9.0],
    [15.0, 22.0, 60.0, 33.0],
    [40.0, 11.0, 19.0, 47.0],
];

fn table(flow: impl Fn(usize, usize) -> f64) -> FlowData {
    let mut flows = Vec::new();
    let mut cost = Vec::new();
    let mut origins = Vec::new();
    let mut destinations = Vec::new();
    let mut pop = Vec::new();
    let mut jobs = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            flows.push(flow(i, j));
            cost.push(COST[i][j]);
            origins.push(ORIGINS[i]);
            destinations.push(DESTINATIONS[j]);
            pop.push(ORIGIN_POP[i]);
            jobs.push(DEST_JOBS[j]);
        }
    }
    FlowData::new(Array1::from(flows), Array1::from(cost))
        .with_origins(origins)
        .with_destinations(destinations)
        .with_origin_vars(Array2::from_shape_vec((16, 1), pop).unwrap())
        .with_dest_vars(Array2::from_shape_vec((16, 1), jobs).unwrap())
}

/// Flows lying exactly on `ln μ = K + α ln pop + γ ln jobs + β ln cost`.
pub fn exact_flows() -> FlowData {
    table(|i, j| {
        (K + ALPHA * ORIGIN_POP[i].ln() + GAMMA * DEST_JOBS[j].ln() + BETA * COST[i][j].ln()).exp()
    })
}

/// Integer flows with no exact structure.
pub fn observed_flows() -> FlowData {
    table(|i, j| OBSERVED[i][j])
}

pub fn without_origin_vars(mut data: FlowData) -> FlowData {
    data.origin_vars = None;
    data
}

pub fn without_dest_vars(mut data: FlowData) -> FlowData {
    data.dest_vars = None;
    data
}

pub fn without_covariates(data: FlowData) -> FlowData {
    without_dest_vars(without_origin_vars(data))
}

/// Sums `values` over the observations sharing each key, in sorted key order.
pub fn totals_by(keys: &[String], values: &[f64]) -> Vec<(String, f64)> {
    let mut sums = std::collections::BTreeMap::<String, f64>::new();
    for (key, value) in keys.iter().zip(values) {
        *sums.entry(key.clone()).or_default() += value;
    }
    sums.into_iter().collect()
}
