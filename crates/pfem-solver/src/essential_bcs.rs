//! Essential boundary conditions as constraint rows A·y = c(t) imposed
//! with Lagrange multipliers.
//!
//! Every category (single-point, rigid link, inclined support,
//! hydrostatic pressure, initial-valued) is one or more rows. During
//! Newton iterations the manager contributes
//!
//! ```text
//! fb[ny..] = c(t) − A·y          fb[..ny] −= Aᵀ·λ
//! ```
//!
//! and the off-diagonal A/Aᵀ blocks of the augmented Jacobian. Rows are
//! sorted by their smallest equation number before the matrix is built so
//! that serial and partitioned assembly produce the same structure.

use nalgebra::DVector;

use crate::error::{Result, SolverError};
use crate::lin_solver::Triplet;
use crate::solution::Solution;
use pfem_model::Func;

/// Right-hand side c(t) of one constraint row
#[derive(Debug, Clone)]
pub enum EbcRhs {
    /// c(t) = f(t)
    TimeFunc(Func),
    /// c(t) = c0 − f(t), e.g. hydrostatic pressure minus a drawdown
    OffsetMinus { c0: f64, f: Func },
    /// c(t) = y_initial · mult(t); the initial value is captured once
    /// after the stage solution is populated
    InitialScaled { mult: Func, y_ini: Option<f64> },
}

/// One constraint row
#[derive(Debug, Clone)]
pub struct EbcRow {
    /// What is constrained ("ux", "pl", "rigid", ...)
    pub key: String,
    /// Affected global equations
    pub eqs: Vec<usize>,
    /// Coefficients of A on those equations
    pub vals_a: Vec<f64>,
    /// Time-dependent right-hand side
    pub rhs: EbcRhs,
}

impl EbcRow {
    fn min_eq(&self) -> usize {
        self.eqs.iter().copied().min().unwrap_or(usize::MAX)
    }
}

/// The essential-BC manager
#[derive(Debug, Clone, Default)]
pub struct EssentialBcs {
    rows: Vec<EbcRow>,
    built: bool,
}

impl EssentialBcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nlam(&self) -> usize {
        self.rows.len()
    }

    /// Total nonzero count of A
    pub fn nnz_a(&self) -> usize {
        self.rows.iter().map(|r| r.vals_a.len()).sum()
    }

    pub fn rows(&self) -> &[EbcRow] {
        &self.rows
    }

    /// Add or replace a constraint row. A row targeting the same primary
    /// equation as an existing one replaces it (later overrides previous).
    pub fn set(&mut self, key: &str, eqs: Vec<usize>, vals_a: Vec<f64>, rhs: EbcRhs) -> Result<()> {
        if eqs.is_empty() || eqs.len() != vals_a.len() {
            return Err(SolverError::Input(format!(
                "constraint '{key}' has {} equations and {} coefficients",
                eqs.len(),
                vals_a.len()
            )));
        }
        let primary = eqs[0];
        let row = EbcRow { key: key.to_string(), eqs, vals_a, rhs };
        if let Some(existing) = self.rows.iter_mut().find(|r| r.eqs[0] == primary) {
            *existing = row;
        } else {
            self.rows.push(row);
        }
        self.built = false;
        Ok(())
    }

    /// Single-point constraint: y[eq] = f(t)
    pub fn set_single(&mut self, key: &str, eq: usize, f: Func) -> Result<()> {
        self.set(key, vec![eq], vec![1.0], EbcRhs::TimeFunc(f))
    }

    /// Rigid link: y[eq_a] − y[eq_b] = 0
    pub fn set_rigid(&mut self, eq_a: usize, eq_b: usize) -> Result<()> {
        self.set("rigid", vec![eq_a, eq_b], vec![1.0, -1.0], EbcRhs::TimeFunc(Func::Zero))
    }

    /// Inclined 2D support: cos(α)·y[eq_x] + sin(α)·y[eq_y] = 0
    pub fn set_incline2d(&mut self, eq_x: usize, eq_y: usize, alpha: f64) -> Result<()> {
        self.set(
            "incline2d",
            vec![eq_x, eq_y],
            vec![alpha.cos(), alpha.sin()],
            EbcRhs::TimeFunc(Func::Zero),
        )
    }

    /// Hydrostatic pressure: y[eq_pl] = pl_hydrostatic − f(t)
    pub fn set_hydrostatic(&mut self, eq_pl: usize, pl_hst: f64, f: Func) -> Result<()> {
        self.set("hst", vec![eq_pl], vec![1.0], EbcRhs::OffsetMinus { c0: pl_hst, f })
    }

    /// Initial-valued constraint: y[eq] = y_initial · mult(t)
    pub fn set_initial_valued(&mut self, key: &str, eq: usize, mult: Func) -> Result<()> {
        self.set(key, vec![eq], vec![1.0], EbcRhs::InitialScaled { mult, y_ini: None })
    }

    /// Sort rows deterministically and mark the structure final.
    /// Returns (nλ, nnz of A).
    pub fn build(&mut self, ny: usize) -> Result<(usize, usize)> {
        for row in &self.rows {
            for &eq in &row.eqs {
                if eq >= ny {
                    return Err(SolverError::Input(format!(
                        "constraint '{}' targets equation {eq} but ny = {ny}",
                        row.key
                    )));
                }
            }
        }
        self.rows.sort_by_key(EbcRow::min_eq);
        self.built = true;
        Ok((self.rows.len(), self.nnz_a()))
    }

    /// Capture y_initial for initial-valued rows from a populated solution
    pub fn capture_initial(&mut self, y: &DVector<f64>) {
        for row in &mut self.rows {
            if let EbcRhs::InitialScaled { y_ini, .. } = &mut row.rhs
                && y_ini.is_none()
            {
                *y_ini = Some(y[row.eqs[0]]);
            }
        }
    }

    /// Evaluate c(t) of one row
    pub fn rhs_at(&self, i: usize, t: f64) -> f64 {
        match &self.rows[i].rhs {
            EbcRhs::TimeFunc(f) => f.f(t, &[]),
            EbcRhs::OffsetMinus { c0, f } => c0 - f.f(t, &[]),
            EbcRhs::InitialScaled { mult, y_ini } => y_ini.unwrap_or(0.0) * mult.f(t, &[]),
        }
    }

    /// Contribute the constraint residuals and the −Aᵀλ reaction forces
    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, ny: usize, sol: &Solution) {
        for (i, row) in self.rows.iter().enumerate() {
            let mut ay = 0.0;
            for (&eq, &a) in row.eqs.iter().zip(&row.vals_a) {
                ay += a * sol.y[eq];
                fb[eq] -= a * sol.lam[i];
            }
            fb[ny + i] = self.rhs_at(i, sol.t) - ay;
        }
    }

    /// Contribute the A and Aᵀ off-diagonal blocks
    pub fn add_to_kb(&self, kb: &mut Triplet, ny: usize) {
        for (i, row) in self.rows.iter().enumerate() {
            for (&eq, &a) in row.eqs.iter().zip(&row.vals_a) {
                kb.put(ny + i, eq, a);
                kb.put(eq, ny + i, a);
            }
        }
    }

    /// The assembled constraint matrix A (nλ × ny), for inspection
    pub fn a_matrix(&self, ny: usize) -> Triplet {
        let mut a = Triplet::new(self.rows.len(), ny, self.nnz_a());
        for (i, row) in self.rows.iter().enumerate() {
            for (&eq, &v) in row.eqs.iter().zip(&row.vals_a) {
                a.put(i, eq, v);
            }
        }
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_on_same_primary_equation() {
        let mut ebcs = EssentialBcs::new();
        ebcs.set_single("ux", 3, Func::Cte { c: 1.0 }).unwrap();
        ebcs.set_single("ux", 3, Func::Cte { c: 2.0 }).unwrap();
        assert_eq!(ebcs.nlam(), 1);
        assert_eq!(ebcs.rhs_at(0, 0.0), 2.0);
    }

    #[test]
    fn build_sorts_rows_and_counts_nnz() {
        let mut ebcs = EssentialBcs::new();
        ebcs.set_rigid(7, 2).unwrap();
        ebcs.set_single("ux", 0, Func::Zero).unwrap();
        ebcs.set_incline2d(4, 5, 0.5).unwrap();
        let (nlam, nnz) = ebcs.build(8).unwrap();
        assert_eq!(nlam, 3);
        assert_eq!(nnz, 5);
        // sorted by smallest equation: 0, then 2 (rigid), then 4
        assert_eq!(ebcs.rows()[0].eqs[0], 0);
        assert_eq!(ebcs.rows()[1].min_eq(), 2);
        assert_eq!(ebcs.rows()[2].eqs[0], 4);
    }

    #[test]
    fn build_rejects_out_of_range_equation() {
        let mut ebcs = EssentialBcs::new();
        ebcs.set_single("pl", 10, Func::Zero).unwrap();
        assert!(ebcs.build(5).is_err());
    }

    #[test]
    fn residual_vanishes_at_constrained_solution() {
        let ny = 4;
        let mut ebcs = EssentialBcs::new();
        ebcs.set_single("ux", 1, Func::Cte { c: 0.3 }).unwrap();
        ebcs.set_rigid(2, 3).unwrap();
        ebcs.build(ny).unwrap();

        let mut sol = Solution::new(ny, ebcs.nlam(), 0);
        sol.y[1] = 0.3;
        sol.y[2] = 0.7;
        sol.y[3] = 0.7;

        let mut fb = DVector::zeros(ny + ebcs.nlam());
        ebcs.add_to_rhs(&mut fb, ny, &sol);
        for i in 0..ebcs.nlam() {
            assert!(fb[ny + i].abs() < 1e-15, "row {i}: {}", fb[ny + i]);
        }
    }

    #[test]
    fn reaction_forces_are_minus_a_transpose_lambda() {
        let ny = 2;
        let mut ebcs = EssentialBcs::new();
        ebcs.set_incline2d(0, 1, std::f64::consts::FRAC_PI_6).unwrap();
        ebcs.build(ny).unwrap();

        let mut sol = Solution::new(ny, 1, 0);
        sol.lam[0] = 5.0;
        let mut fb = DVector::zeros(ny + 1);
        ebcs.add_to_rhs(&mut fb, ny, &sol);
        let (c, s) = (std::f64::consts::FRAC_PI_6.cos(), std::f64::consts::FRAC_PI_6.sin());
        assert!((fb[0] + 5.0 * c).abs() < 1e-15);
        assert!((fb[1] + 5.0 * s).abs() < 1e-15);
    }

    #[test]
    fn initial_valued_rhs_scales_captured_value() {
        let mut ebcs = EssentialBcs::new();
        ebcs.set_initial_valued("pl", 0, Func::Lin { m: -0.5, c: 1.0 }).unwrap();
        ebcs.build(2).unwrap();
        let y = DVector::from_vec(vec![8.0, 0.0]);
        ebcs.capture_initial(&y);
        assert_eq!(ebcs.rhs_at(0, 0.0), 8.0);
        assert_eq!(ebcs.rhs_at(0, 2.0), 0.0);
    }

    #[test]
    fn a_matrix_structure() {
        let mut ebcs = EssentialBcs::new();
        ebcs.set_rigid(0, 3).unwrap();
        ebcs.build(4).unwrap();
        let a = ebcs.a_matrix(4).to_dense();
        assert_eq!(a.nrows(), 1);
        assert_eq!(a[(0, 0)], 1.0);
        assert_eq!(a[(0, 3)], -1.0);
    }
}
