//! Global solution state.
//!
//! One `Solution` per domain per stage: the primary vector Y, the step
//! increment ΔY, time derivatives, the frozen star predictors (Ψ for
//! first-order equations, Z and Chi for second-order ones), the Lagrange
//! multipliers Λ, and the node-extrapolated integration-point values.
//!
//! Backup/restore snapshots the whole state so the driver can roll back a
//! diverged step before cutting Δt.

use nalgebra::DVector;

/// Per-step integration coefficients, copied from the dynamic-coefficient
/// machinery so elements can read them during assembly
#[derive(Debug, Clone, Copy)]
pub struct DynVals {
    pub beta1: f64,
    pub beta2: f64,
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub a4: f64,
    pub a5: f64,
    pub a6: f64,
    /// Damping weight: α4, or (1+α)·α4 under HHT
    pub a7: f64,
    /// Stiffness weight: 1, or 1+α under HHT
    pub a8: f64,
}

impl Default for DynVals {
    fn default() -> Self {
        Self {
            beta1: 0.0,
            beta2: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
            a5: 0.0,
            a6: 0.0,
            a7: 0.0,
            a8: 1.0,
        }
    }
}

/// Global solution vectors and flags
#[derive(Debug, Clone)]
pub struct Solution {
    /// Current time
    pub t: f64,
    /// Last time step
    pub dt: f64,
    /// Steady-state run: no time-derivative terms
    pub steady: bool,
    /// Axisymmetric 2D formulation
    pub axisym: bool,
    /// Plane-stress 2D formulation
    pub pstress: bool,
    /// Integration coefficients of the current step
    pub dcs: DynVals,

    /// Primary unknowns (length ny)
    pub y: DVector<f64>,
    /// Accumulated increment within the current step
    pub dy: DVector<f64>,
    /// First time derivative
    pub dydt: DVector<f64>,
    /// Second time derivative
    pub d2ydt2: DVector<f64>,
    /// Ψ star predictors (first-order equations)
    pub psi: DVector<f64>,
    /// Z star predictors (second-order equations)
    pub zet: DVector<f64>,
    /// Chi star predictors (second-order equations)
    pub chi: DVector<f64>,
    /// Lagrange multipliers (length nlam)
    pub lam: DVector<f64>,

    /// Node-extrapolated values by vertex id
    pub ext: Vec<Vec<f64>>,
    /// Number of elements contributing to each vertex
    pub cnt: Vec<usize>,

    bkp: Option<Box<Backup>>,
}

#[derive(Debug, Clone)]
struct Backup {
    t: f64,
    dt: f64,
    y: DVector<f64>,
    dy: DVector<f64>,
    dydt: DVector<f64>,
    d2ydt2: DVector<f64>,
    lam: DVector<f64>,
}

impl Solution {
    /// Allocate a zeroed solution for ny equations, nlam multipliers and
    /// nverts mesh vertices
    pub fn new(ny: usize, nlam: usize, nverts: usize) -> Self {
        Self {
            t: 0.0,
            dt: 0.0,
            steady: false,
            axisym: false,
            pstress: false,
            dcs: DynVals::default(),
            y: DVector::zeros(ny),
            dy: DVector::zeros(ny),
            dydt: DVector::zeros(ny),
            d2ydt2: DVector::zeros(ny),
            psi: DVector::zeros(ny),
            zet: DVector::zeros(ny),
            chi: DVector::zeros(ny),
            lam: DVector::zeros(nlam),
            ext: vec![Vec::new(); nverts],
            cnt: vec![0; nverts],
            bkp: None,
        }
    }

    pub fn ny(&self) -> usize {
        self.y.len()
    }

    pub fn nlam(&self) -> usize {
        self.lam.len()
    }

    /// Zero every array; keeps sizes and flags
    pub fn reset(&mut self) {
        self.t = 0.0;
        self.dt = 0.0;
        self.y.fill(0.0);
        self.dy.fill(0.0);
        self.dydt.fill(0.0);
        self.d2ydt2.fill(0.0);
        self.psi.fill(0.0);
        self.zet.fill(0.0);
        self.chi.fill(0.0);
        self.lam.fill(0.0);
        self.reset_ext();
        self.bkp = None;
    }

    /// Zero the extrapolation accumulators
    pub fn reset_ext(&mut self) {
        for e in &mut self.ext {
            e.clear();
        }
        self.cnt.fill(0);
    }

    /// Accumulate extrapolated values for a vertex
    pub fn add_ext(&mut self, vid: usize, vals: &[f64]) {
        let e = &mut self.ext[vid];
        if e.len() < vals.len() {
            e.resize(vals.len(), 0.0);
        }
        for (ei, v) in e.iter_mut().zip(vals.iter()) {
            *ei += v;
        }
        self.cnt[vid] += 1;
    }

    /// Averaged extrapolated value at a vertex (incident-count normalized)
    pub fn ext_avg(&self, vid: usize, comp: usize) -> f64 {
        if self.cnt[vid] == 0 {
            return 0.0;
        }
        self.ext[vid].get(comp).copied().unwrap_or(0.0) / self.cnt[vid] as f64
    }

    /// Snapshot the state reachable by a step rollback
    pub fn backup(&mut self) {
        self.bkp = Some(Box::new(Backup {
            t: self.t,
            dt: self.dt,
            y: self.y.clone(),
            dy: self.dy.clone(),
            dydt: self.dydt.clone(),
            d2ydt2: self.d2ydt2.clone(),
            lam: self.lam.clone(),
        }));
    }

    /// Roll back to the last snapshot; no-op when none exists
    pub fn restore(&mut self) {
        if let Some(b) = &self.bkp {
            self.t = b.t;
            self.dt = b.dt;
            self.y.copy_from(&b.y);
            self.dy.copy_from(&b.dy);
            self.dydt.copy_from(&b.dydt);
            self.d2ydt2.copy_from(&b.d2ydt2);
            self.lam.copy_from(&b.lam);
        }
    }
}
