//! Sparse triplet assembly store and the linear-solver backend interface.
//!
//! Assembly writes COO triplets (duplicates sum); a backend consumes the
//! triplets through `LinSolver::init`/`factorize`/`solve`. The shipped
//! backend densifies and LU-factorizes with nalgebra, which is exact and
//! adequate for the test-scale problems; a distributed direct solver can
//! implement the same trait.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::{Result, SolverError};

/// COO triplet store for the augmented system matrix
#[derive(Debug, Clone)]
pub struct Triplet {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl Triplet {
    pub fn new(nrows: usize, ncols: usize, cap: usize) -> Self {
        Self {
            nrows,
            ncols,
            rows: Vec::with_capacity(cap),
            cols: Vec::with_capacity(cap),
            vals: Vec::with_capacity(cap),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    /// Clear entries, keeping the allocation
    pub fn reset(&mut self) {
        self.rows.clear();
        self.cols.clear();
        self.vals.clear();
    }

    /// Append one entry; duplicates are summed on conversion
    pub fn put(&mut self, i: usize, j: usize, v: f64) {
        debug_assert!(i < self.nrows && j < self.ncols);
        self.rows.push(i);
        self.cols.push(j);
        self.vals.push(v);
    }

    /// Densify (duplicates summed)
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(self.nrows, self.ncols);
        for ((&i, &j), &v) in self.rows.iter().zip(&self.cols).zip(&self.vals) {
            a[(i, j)] += v;
        }
        a
    }

    /// Convert to CSR (duplicates summed)
    pub fn to_csr(&self) -> Result<CsrMatrix<f64>> {
        let coo = CooMatrix::try_from_triplets(
            self.nrows,
            self.ncols,
            self.rows.clone(),
            self.cols.clone(),
            self.vals.clone(),
        )
        .map_err(|e| SolverError::LinSolver(format!("triplet conversion: {e:?}")))?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// Linear solver backend for the augmented Newton system
pub trait LinSolver: Send {
    /// Bind the matrix structure; called once per stage (or whenever the
    /// structure changes)
    fn init(&mut self, kb: &Triplet, symmetric: bool, verbose: bool) -> Result<()>;

    /// Factorize the current values; called every Newton iteration
    fn factorize(&mut self, kb: &Triplet) -> Result<()>;

    /// Solve for x given b; adds into x when `sum_to_x` is set
    fn solve(&mut self, x: &mut DVector<f64>, b: &DVector<f64>, sum_to_x: bool) -> Result<()>;

    /// Release factorization resources
    fn free(&mut self);
}

/// Dense LU backend (nalgebra)
#[derive(Default)]
pub struct DenseLu {
    n: usize,
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl DenseLu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinSolver for DenseLu {
    fn init(&mut self, kb: &Triplet, _symmetric: bool, _verbose: bool) -> Result<()> {
        if kb.nrows() != kb.ncols() {
            return Err(SolverError::LinSolver(format!(
                "matrix must be square; got {}x{}",
                kb.nrows(),
                kb.ncols()
            )));
        }
        self.n = kb.nrows();
        self.lu = None;
        Ok(())
    }

    fn factorize(&mut self, kb: &Triplet) -> Result<()> {
        if kb.nrows() != self.n {
            return Err(SolverError::LinSolver("matrix size changed after init".to_string()));
        }
        self.lu = Some(kb.to_dense().lu());
        Ok(())
    }

    fn solve(&mut self, x: &mut DVector<f64>, b: &DVector<f64>, sum_to_x: bool) -> Result<()> {
        let lu = self
            .lu
            .as_ref()
            .ok_or_else(|| SolverError::LinSolver("solve called before factorize".to_string()))?;
        let sol = lu
            .solve(b)
            .ok_or_else(|| SolverError::LinSolver("singular matrix".to_string()))?;
        if sum_to_x {
            *x += sol;
        } else {
            x.copy_from(&sol);
        }
        Ok(())
    }

    fn free(&mut self) {
        self.lu = None;
    }
}

/// Backend by name; the empty name selects the default
pub fn new_lin_solver(name: &str) -> Result<Box<dyn LinSolver>> {
    match name {
        "" | "dense-lu" => Ok(Box::new(DenseLu::new())),
        other => Err(SolverError::Input(format!("unknown linear solver '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triplet_sums_duplicates() {
        let mut t = Triplet::new(2, 2, 4);
        t.put(0, 0, 1.0);
        t.put(0, 0, 2.0);
        t.put(1, 1, 5.0);
        let a = t.to_dense();
        assert_eq!(a[(0, 0)], 3.0);
        assert_eq!(a[(1, 1)], 5.0);
        assert_eq!(t.to_csr().unwrap().nnz(), 2);
    }

    #[test]
    fn dense_lu_solves_small_system() {
        let mut t = Triplet::new(2, 2, 4);
        t.put(0, 0, 4.0);
        t.put(0, 1, 1.0);
        t.put(1, 0, 1.0);
        t.put(1, 1, 3.0);
        let b = DVector::from_vec(vec![1.0, 2.0]);

        let mut ls = DenseLu::new();
        ls.init(&t, true, false).unwrap();
        ls.factorize(&t).unwrap();
        let mut x = DVector::zeros(2);
        ls.solve(&mut x, &b, false).unwrap();

        // residual check
        let a = t.to_dense();
        let r = &b - a * &x;
        assert!(r.norm() < 1e-14);

        // sum_to_x accumulates
        let x0 = x.clone();
        ls.solve(&mut x, &b, true).unwrap();
        assert!((x - 2.0 * x0).norm() < 1e-14);
    }

    #[test]
    fn singular_matrix_reports_linsolver_error() {
        let mut t = Triplet::new(2, 2, 2);
        t.put(0, 0, 1.0);
        t.put(1, 0, 1.0);
        let mut ls = DenseLu::new();
        ls.init(&t, false, false).unwrap();
        ls.factorize(&t).unwrap();
        let mut x = DVector::zeros(2);
        let err = ls.solve(&mut x, &DVector::from_vec(vec![1.0, 0.0]), false);
        assert!(matches!(err, Err(SolverError::LinSolver(_))));
    }
}
