//! Dense linear algebra over flat row-major storage.
//!
//! Provides the small set of operations the GLS regression core needs:
//! Cholesky factorization, forward/back substitution against the factor,
//! symmetric-positive-definite inversion, and ordinary least squares on an
//! already-whitened system. Everything is `f64` and row-major; no external
//! linear-algebra crate is used.

use reticula_core::{ReticulaError, Result};

/// A dense row-major matrix of `f64`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matrix {
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl Matrix {
    /// An `nrows × ncols` matrix of zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// The `n × n` identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Build from a flat row-major vector.
    pub fn from_flat(data: Vec<f64>, nrows: usize, ncols: usize) -> Result<Self> {
        if data.len() != nrows * ncols {
            return Err(ReticulaError::InvalidInput(format!(
                "matrix data length {} does not match {}x{}",
                data.len(),
                nrows,
                ncols
            )));
        }
        Ok(Self { data, nrows, ncols })
    }

    /// Build from nested row vectors. All rows must have equal length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(nrows * ncols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != ncols {
                return Err(ReticulaError::InvalidInput(format!(
                    "row {} has length {}, expected {}",
                    i,
                    row.len(),
                    ncols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self { data, nrows, ncols })
    }

    /// Build an `n × k` matrix from `k` column vectors of length `n`.
    pub fn from_columns(columns: &[Vec<f64>], nrows: usize) -> Result<Self> {
        let ncols = columns.len();
        for (j, col) in columns.iter().enumerate() {
            if col.len() != nrows {
                return Err(ReticulaError::InvalidInput(format!(
                    "column {} has length {}, expected {}",
                    j,
                    col.len(),
                    nrows
                )));
            }
        }
        let mut m = Self::zeros(nrows, ncols);
        for (j, col) in columns.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                m.data[i * ncols + j] = v;
            }
        }
        Ok(m)
    }

    /// An `n × 1` column of ones (intercept-only design).
    pub fn ones_column(n: usize) -> Self {
        Self {
            data: vec![1.0; n],
            nrows: n,
            ncols: 1,
        }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Entry at `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(i < self.nrows && j < self.ncols);
        self.data[i * self.ncols + j]
    }

    /// Set entry at `(i, j)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        debug_assert!(i < self.nrows && j < self.ncols);
        self.data[i * self.ncols + j] = value;
    }

    /// Row `i` as a slice.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.ncols..(i + 1) * self.ncols]
    }

    /// Column `j` as an owned vector.
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.nrows).map(|i| self.get(i, j)).collect()
    }

    /// Flat row-major view of the data.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Transposed copy.
    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.ncols, self.nrows);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                t.set(j, i, self.get(i, j));
            }
        }
        t
    }

    /// Matrix product `self · other`.
    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.ncols != other.nrows {
            return Err(ReticulaError::InvalidInput(format!(
                "matmul shape mismatch: {}x{} · {}x{}",
                self.nrows, self.ncols, other.nrows, other.ncols
            )));
        }
        let mut out = Matrix::zeros(self.nrows, other.ncols);
        for i in 0..self.nrows {
            for k in 0..self.ncols {
                let aik = self.get(i, k);
                if aik == 0.0 {
                    continue;
                }
                for j in 0..other.ncols {
                    out.data[i * other.ncols + j] += aik * other.get(k, j);
                }
            }
        }
        Ok(out)
    }

    /// Matrix-vector product `self · v`.
    pub fn matvec(&self, v: &[f64]) -> Result<Vec<f64>> {
        if self.ncols != v.len() {
            return Err(ReticulaError::InvalidInput(format!(
                "matvec shape mismatch: {}x{} · {}",
                self.nrows,
                self.ncols,
                v.len()
            )));
        }
        Ok((0..self.nrows)
            .map(|i| self.row(i).iter().zip(v).map(|(a, b)| a * b).sum())
            .collect())
    }

    /// Select a submatrix from row and column index lists (indices may repeat,
    /// which implements row/column permutation as well as selection).
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> Result<Matrix> {
        for &i in rows {
            if i >= self.nrows {
                return Err(ReticulaError::InvalidInput(format!(
                    "row index {} out of range ({})",
                    i, self.nrows
                )));
            }
        }
        for &j in cols {
            if j >= self.ncols {
                return Err(ReticulaError::InvalidInput(format!(
                    "column index {} out of range ({})",
                    j, self.ncols
                )));
            }
        }
        let mut out = Matrix::zeros(rows.len(), cols.len());
        for (oi, &i) in rows.iter().enumerate() {
            for (oj, &j) in cols.iter().enumerate() {
                out.set(oi, oj, self.get(i, j));
            }
        }
        Ok(out)
    }

    /// Scale every entry in place.
    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.data {
            *v *= factor;
        }
    }
}

/// Lower-triangular Cholesky factor `L` with `A = L·Lᵗ`.
///
/// # Errors
///
/// Returns `Numerical` if `A` is not square or not positive definite.
pub fn cholesky_lower(a: &Matrix) -> Result<Matrix> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(ReticulaError::InvalidInput(format!(
            "Cholesky requires a square matrix, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    let mut l = Matrix::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a.get(i, j);
            for k in 0..j {
                sum -= l.get(i, k) * l.get(j, k);
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(ReticulaError::Numerical(format!(
                        "matrix is not positive definite (pivot {} at row {})",
                        sum, i
                    )));
                }
                l.set(i, j, sum.sqrt());
            } else {
                l.set(i, j, sum / l.get(j, j));
            }
        }
    }
    Ok(l)
}

/// Solve `L·x = b` by forward substitution (`L` lower triangular).
pub fn forward_solve(l: &Matrix, b: &[f64]) -> Result<Vec<f64>> {
    let n = l.nrows();
    if b.len() != n {
        return Err(ReticulaError::InvalidInput(format!(
            "forward_solve length mismatch: {} vs {}",
            b.len(),
            n
        )));
    }
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l.get(i, j) * x[j];
        }
        x[i] = sum / l.get(i, i);
    }
    Ok(x)
}

/// Solve `Lᵗ·x = b` by back substitution (`L` lower triangular).
pub fn back_solve_transposed(l: &Matrix, b: &[f64]) -> Result<Vec<f64>> {
    let n = l.nrows();
    if b.len() != n {
        return Err(ReticulaError::InvalidInput(format!(
            "back_solve length mismatch: {} vs {}",
            b.len(),
            n
        )));
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l.get(j, i) * x[j];
        }
        x[i] = sum / l.get(i, i);
    }
    Ok(x)
}

/// Solve `L·X = B` column by column (whitening a full matrix).
pub fn forward_solve_matrix(l: &Matrix, b: &Matrix) -> Result<Matrix> {
    if b.nrows() != l.nrows() {
        return Err(ReticulaError::InvalidInput(format!(
            "forward_solve_matrix shape mismatch: {}x{} vs {} rows",
            l.nrows(),
            l.ncols(),
            b.nrows()
        )));
    }
    let mut out = Matrix::zeros(b.nrows(), b.ncols());
    for j in 0..b.ncols() {
        let col = forward_solve(l, &b.column(j))?;
        for (i, v) in col.into_iter().enumerate() {
            out.set(i, j, v);
        }
    }
    Ok(out)
}

/// Invert a symmetric positive-definite matrix via its Cholesky factor.
pub fn invert_spd(a: &Matrix) -> Result<Matrix> {
    let n = a.nrows();
    let l = cholesky_lower(a)?;
    let mut inv = Matrix::zeros(n, n);
    // Solve A x = e_j for each basis vector.
    let mut e = vec![0.0; n];
    for j in 0..n {
        e[j] = 1.0;
        let y = forward_solve(&l, &e)?;
        let x = back_solve_transposed(&l, &y)?;
        for (i, v) in x.into_iter().enumerate() {
            inv.set(i, j, v);
        }
        e[j] = 0.0;
    }
    Ok(inv)
}

/// Log-determinant of an SPD matrix from its lower Cholesky factor:
/// `log|A| = 2·Σ log L[i,i]`.
pub fn log_det_from_cholesky(l: &Matrix) -> f64 {
    (0..l.nrows()).map(|i| l.get(i, i).ln()).sum::<f64>() * 2.0
}

/// An ordinary-least-squares fit on an (already whitened) system.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Estimated coefficients (empty for a zero-column design).
    pub coefficients: Vec<f64>,
    /// Fitted values `X·β̂` (identically zero for a zero-column design).
    pub fitted: Vec<f64>,
    /// Residuals `y − X·β̂`.
    pub residuals: Vec<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    /// `(XᵗX)⁻¹`, needed for coefficient covariance (0×0 when no columns).
    pub xtx_inv: Matrix,
}

/// Ordinary least squares via the normal equations and a Cholesky solve.
///
/// A design matrix with zero columns is permitted: the fit then has no
/// coefficients, fitted values are identically zero and the residuals equal
/// `y` (the degenerate no-regressor model).
///
/// # Errors
///
/// Returns `Numerical` if `XᵗX` is singular (collinear columns) and
/// `InvalidInput` on shape mismatches.
pub fn ols(x: &Matrix, y: &[f64]) -> Result<OlsFit> {
    let n = y.len();
    if x.nrows() != n {
        return Err(ReticulaError::InvalidInput(format!(
            "design has {} rows but response has {}",
            x.nrows(),
            n
        )));
    }
    let p = x.ncols();
    if p == 0 {
        let rss = y.iter().map(|v| v * v).sum();
        return Ok(OlsFit {
            coefficients: Vec::new(),
            fitted: vec![0.0; n],
            residuals: y.to_vec(),
            rss,
            xtx_inv: Matrix::zeros(0, 0),
        });
    }
    if p > n {
        return Err(ReticulaError::InvalidInput(format!(
            "design has more columns ({}) than rows ({})",
            p, n
        )));
    }
    let xt = x.transpose();
    let xtx = xt.matmul(x)?;
    let xty = xt.matvec(y)?;
    let l = cholesky_lower(&xtx).map_err(|_| {
        ReticulaError::Numerical("singular design matrix — columns may be collinear".into())
    })?;
    let z = forward_solve(&l, &xty)?;
    let coefficients = back_solve_transposed(&l, &z)?;
    let fitted = x.matvec(&coefficients)?;
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| a - b).collect();
    let rss = residuals.iter().map(|v| v * v).sum();
    let xtx_inv = invert_spd(&xtx)?;
    Ok(OlsFit {
        coefficients,
        fitted,
        residuals,
        rss,
        xtx_inv,
    })
}
