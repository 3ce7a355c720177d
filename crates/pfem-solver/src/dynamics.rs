//! Generalized-trapezoidal / Newmark / HHT coefficient machinery.
//!
//! First-order DOFs are integrated with the θ-method:
//!
//! ```text
//! β1 = 1/(θ·h)        β2 = (1−θ)/θ
//! ```
//!
//! Second-order DOFs use Newmark parameters θ1 (= γ) and θ2 (= 2β), with
//! H = h²/2:
//!
//! ```text
//! α1 = 1/(θ2·H)       α2 = h/(θ2·H)        α3 = 1/θ2 − 1
//! α4 = θ1·h/(θ2·H)    α5 = 2θ1/θ2 − 1      α6 = (θ1/θ2 − 1)·h
//! ```
//!
//! With the Hilber–Hughes–Taylor modification (α ∈ [−1/3, 0]) the damping
//! and stiffness weights become α7 = (1+α)·α4 and α8 = 1+α, and θ1, θ2 are
//! overridden by (1−2α)/2 and (1−α)²/2.

use crate::error::{Result, SolverError};
use pfem_model::SolverData;

/// Coefficients recomputed once per time step from Δt
#[derive(Debug, Clone, Copy)]
pub struct DynCoefs {
    /// θ for the generalized trapezoidal method
    pub th: f64,
    /// Newmark θ1 (γ)
    pub th1: f64,
    /// Newmark θ2 (2β)
    pub th2: f64,
    /// HHT switch
    pub hht: bool,
    /// HHT α
    pub alpha: f64,
    /// Minimum admissible time step
    pub hmin: f64,

    pub beta1: f64,
    pub beta2: f64,
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub a4: f64,
    pub a5: f64,
    pub a6: f64,
    pub a7: f64,
    pub a8: f64,
}

impl DynCoefs {
    /// Validate solver data and build the coefficient set
    pub fn new(dat: &SolverData) -> Result<Self> {
        let (mut th1, mut th2) = (dat.theta1, dat.theta2);
        if dat.hht {
            if dat.alpha < -1.0 / 3.0 || dat.alpha > 0.0 {
                return Err(SolverError::Input(format!(
                    "HHT alpha must be in [-1/3, 0]; got {}",
                    dat.alpha
                )));
            }
            th1 = (1.0 - 2.0 * dat.alpha) / 2.0;
            th2 = (1.0 - dat.alpha) * (1.0 - dat.alpha) / 2.0;
        }
        if dat.theta < 1e-5 || dat.theta > 1.0 {
            return Err(SolverError::Input(format!(
                "theta must be in [1e-5, 1]; got {}",
                dat.theta
            )));
        }
        if th1 < 1e-4 || th1 > 1.0 {
            return Err(SolverError::Input(format!("theta1 must be in [1e-4, 1]; got {th1}")));
        }
        if th2 < 1e-4 || th2 > 1.0 {
            return Err(SolverError::Input(format!("theta2 must be in [1e-4, 1]; got {th2}")));
        }
        Ok(Self {
            th: dat.theta,
            th1,
            th2,
            hht: dat.hht,
            alpha: dat.alpha,
            hmin: dat.dt_min,
            beta1: 0.0,
            beta2: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
            a5: 0.0,
            a6: 0.0,
            a7: 0.0,
            a8: 0.0,
        })
    }

    /// Compute both the first-order (β) and second-order (α) coefficient
    /// sets for the given time step
    pub fn calc_both(&mut self, dt: f64) -> Result<()> {
        if dt < self.hmin {
            return Err(SolverError::Convergence(format!(
                "time step {dt} is smaller than the minimum {}",
                self.hmin
            )));
        }
        let h = dt;
        let hh = h * h / 2.0;
        self.beta1 = 1.0 / (self.th * h);
        self.beta2 = (1.0 - self.th) / self.th;
        self.a1 = 1.0 / (self.th2 * hh);
        self.a2 = h / (self.th2 * hh);
        self.a3 = 1.0 / self.th2 - 1.0;
        self.a4 = self.th1 * h / (self.th2 * hh);
        self.a5 = 2.0 * self.th1 / self.th2 - 1.0;
        self.a6 = (self.th1 / self.th2 - 1.0) * h;
        if self.hht {
            self.a7 = (1.0 + self.alpha) * self.a4;
            self.a8 = 1.0 + self.alpha;
        } else {
            self.a7 = self.a4;
            self.a8 = 1.0;
        }
        Ok(())
    }
}
