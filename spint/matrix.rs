use faer::sparse::{SparseRowMat, Triplet};
use ndarray::{Array1, Array2, ArrayView1};
use std::fmt;
use thiserror::Error;

/// A nonzero design-matrix entry: `(row, column, value)`.
pub type Entry = Triplet<usize, usize, f64>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    #[error("Failed to assemble a {nrows}x{ncols} sparse matrix: {reason}")]
    SparseAssembly {
        nrows: usize,
        ncols: usize,
        reason: String,
    },
}

/// Unified design matrix representation for dense and sparse workflows.
#[derive(Clone)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseRowMat<usize, f64>),
}

impl fmt::Debug for DesignMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = if self.is_sparse() { "Sparse" } else { "Dense" };
        write!(f, "{storage}({}x{})", self.nrows(), self.ncols())
    }
}

fn fill_dense(nrows: usize, ncols: usize, entries: &[Entry]) -> Array2<f64> {
    let mut matrix = Array2::zeros((nrows, ncols));
    for entry in entries {
        matrix[[entry.row, entry.col]] += entry.val;
    }
    matrix
}

/// Every stored entry of a CSR matrix in row-major order.
fn stored_entries(matrix: &SparseRowMat<usize, f64>) -> Vec<Entry> {
    let (symbolic, values) = matrix.parts();
    let row_ptr = symbolic.row_ptr();
    let col_idx = symbolic.col_idx();
    let mut entries = Vec::with_capacity(values.len());
    for row in 0..matrix.nrows() {
        for idx in row_ptr[row]..row_ptr[row + 1] {
            entries.push(Triplet::new(row, col_idx[idx], values[idx]));
        }
    }
    entries
}

impl DesignMatrix {
    /// Builds a CSR matrix from its nonzero entries. Duplicate positions are summed.
    pub fn sparse(nrows: usize, ncols: usize, entries: &[Entry]) -> Result<Self, MatrixError> {
        SparseRowMat::try_new_from_triplets(nrows, ncols, entries)
            .map(Self::Sparse)
            .map_err(|e| MatrixError::SparseAssembly {
                nrows,
                ncols,
                reason: format!("{e:?}"),
            })
    }

    /// Builds a dense matrix holding the given entries.
    pub fn dense(nrows: usize, ncols: usize, entries: &[Entry]) -> Self {
        Self::Dense(fill_dense(nrows, ncols, entries))
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => {
                fill_dense(matrix.nrows(), matrix.ncols(), &stored_entries(matrix))
            }
        }
    }

    /// A single column as a dense vector.
    pub fn column(&self, j: usize) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.column(j).to_owned(),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.nrows());
                let (symbolic, values) = matrix.parts();
                let row_ptr = symbolic.row_ptr();
                let col_idx = symbolic.col_idx();
                for row in 0..matrix.nrows() {
                    for idx in row_ptr[row]..row_ptr[row + 1] {
                        if col_idx[idx] == j {
                            output[row] = values[idx];
                        }
                    }
                }
                output
            }
        }
    }

    /// Prepends an intercept column of ones, keeping the storage kind.
    pub fn with_intercept(&self) -> Result<Self, MatrixError> {
        match self {
            Self::Dense(matrix) => {
                let mut out = Array2::ones((matrix.nrows(), matrix.ncols() + 1));
                out.slice_mut(ndarray::s![.., 1..]).assign(matrix);
                Ok(Self::Dense(out))
            }
            Self::Sparse(matrix) => {
                let mut entries: Vec<Entry> = (0..matrix.nrows())
                    .map(|row| Triplet::new(row, 0, 1.0))
                    .collect();
                entries.extend(
                    stored_entries(matrix)
                        .into_iter()
                        .map(|e| Triplet::new(e.row, e.col + 1, e.val)),
                );
                Self::sparse(matrix.nrows(), matrix.ncols() + 1, &entries)
            }
        }
    }

    pub fn matrix_vector_multiply(&self, vector: ArrayView1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.dot(&vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.nrows());
                let (symbolic, values) = matrix.parts();
                let row_ptr = symbolic.row_ptr();
                let col_idx = symbolic.col_idx();
                for row in 0..matrix.nrows() {
                    let mut acc = 0.0;
                    for idx in row_ptr[row]..row_ptr[row + 1] {
                        acc += values[idx] * vector[col_idx[idx]];
                    }
                    output[row] = acc;
                }
                output
            }
        }
    }

    pub fn transpose_vector_multiply(&self, vector: ArrayView1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.t().dot(&vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.ncols());
                let (symbolic, values) = matrix.parts();
                let row_ptr = symbolic.row_ptr();
                let col_idx = symbolic.col_idx();
                for row in 0..matrix.nrows() {
                    let x = vector[row];
                    for idx in row_ptr[row]..row_ptr[row + 1] {
                        output[col_idx[idx]] += values[idx] * x;
                    }
                }
                output
            }
        }
    }

    /// Computes `Xᵀ diag(w) X`.
    pub fn weighted_gram(&self, weights: ArrayView1<f64>) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => {
                let weighted = matrix * &weights.insert_axis(ndarray::Axis(1));
                matrix.t().dot(&weighted)
            }
            Self::Sparse(matrix) => {
                let p = matrix.ncols();
                let mut gram = Array2::<f64>::zeros((p, p));
                let (symbolic, values) = matrix.parts();
                let row_ptr = symbolic.row_ptr();
                let col_idx = symbolic.col_idx();
                for row in 0..matrix.nrows() {
                    let w = weights[row];
                    let range = row_ptr[row]..row_ptr[row + 1];
                    for a in range.clone() {
                        let wa = w * values[a];
                        for b in range.clone() {
                            gram[[col_idx[a], col_idx[b]]] += wa * values[b];
                        }
                    }
                }
                gram
            }
        }
    }
}
