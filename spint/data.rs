//! # Flow Table Loading
//!
//! Reads a delimited flow table into a [`FlowData`]. The header names the columns:
//!
//! - `origin`, `destination`: location identifiers (both optional),
//! - `flow`, `cost`: required numeric columns,
//! - `o_<name>` / `d_<name>`: any number of origin / destination attributes, in
//!   header order.
//!
//! Files ending in `.tsv` or `.txt` are read tab-separated; everything else is read
//! as comma-separated. Failures are assumed to be user-input errors and name the
//! offending column and line.

use crate::model::FlowData;
use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse the flow table: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Column '{column}' has a non-numeric value '{value}' on line {line}.")]
    NotNumeric {
        column: String,
        value: String,
        line: u64,
    },
    #[error("The flow table contains no data rows.")]
    NoRows,
    #[error("Attribute values do not form a {rows}x{columns} table: {source}")]
    AttributeShape {
        rows: usize,
        columns: usize,
        #[source]
        source: ndarray::ShapeError,
    },
}

/// Reads a flow table from `path`, picking the delimiter from the file extension.
pub fn load_flow_table(path: impl AsRef<Path>) -> Result<FlowData, DataError> {
    let path = path.as_ref();
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    };
    log::info!("Loading flow table from '{}'", path.display());
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?;
    read_flow_table(reader)
}

pub fn read_flow_table<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<FlowData, DataError> {
    let headers = reader.headers()?.clone();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| find(name).ok_or_else(|| DataError::ColumnNotFound(name.to_string()));

    let flow_col = required("flow")?;
    let cost_col = required("cost")?;
    let origin_col = find("origin");
    let destination_col = find("destination");
    let o_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with("o_"))
        .map(|(i, h)| (i, h.to_string()))
        .collect();
    let d_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with("d_"))
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut flows = Vec::new();
    let mut cost = Vec::new();
    let mut origins = Vec::new();
    let mut destinations = Vec::new();
    let mut o_values = Vec::new();
    let mut d_values = Vec::new();

    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let numeric = |col: usize, name: &str| -> Result<f64, DataError> {
            let raw = record.get(col).unwrap_or("");
            raw.parse::<f64>().map_err(|_| DataError::NotNumeric {
                column: name.to_string(),
                value: raw.to_string(),
                line,
            })
        };
        flows.push(numeric(flow_col, "flow")?);
        cost.push(numeric(cost_col, "cost")?);
        if let Some(col) = origin_col {
            origins.push(record.get(col).unwrap_or("").to_string());
        }
        if let Some(col) = destination_col {
            destinations.push(record.get(col).unwrap_or("").to_string());
        }
        for (col, name) in &o_cols {
            o_values.push(numeric(*col, name)?);
        }
        for (col, name) in &d_cols {
            d_values.push(numeric(*col, name)?);
        }
    }

    let n = flows.len();
    if n == 0 {
        return Err(DataError::NoRows);
    }
    log::info!(
        "Loaded {} flows with {} origin and {} destination attributes",
        n,
        o_cols.len(),
        d_cols.len()
    );

    Ok(FlowData {
        flows: Array1::from_vec(flows),
        cost: Array1::from_vec(cost),
        origins: origin_col.map(|_| origins),
        destinations: destination_col.map(|_| destinations),
        origin_vars: attribute_matrix(o_values, n, o_cols.len())?,
        dest_vars: attribute_matrix(d_values, n, d_cols.len())?,
    })
}

/// Reshapes row-major attribute values into an `rows x columns` matrix, or `None`
/// when the table has no such attributes.
fn attribute_matrix(
    values: Vec<f64>,
    rows: usize,
    columns: usize,
) -> Result<Option<Array2<f64>>, DataError> {
    if columns == 0 {
        return Ok(None);
    }
    Array2::from_shape_vec((rows, columns), values)
        .map(Some)
        .map_err(|source| DataError::AttributeShape {
            rows,
            columns,
            source,
        })
}
