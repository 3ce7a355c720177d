//! The FEM driver: stage orchestration and the implicit time loop.
//!
//! A run proceeds stage by stage. Each stage rebuilds the domains, seeds
//! the initial values and hands control to the time loop, which per step:
//! advances t, recomputes the integration coefficients, freezes the star
//! predictors, runs the Newton loop over every domain, recovers the time
//! derivatives, commits element states and writes output snapshots.
//!
//! Divergence control is coarse: a geometric, constitutive or
//! convergence failure rolls every domain back to the last converged
//! state and halves Δt; three consecutive failures (or underflowing the
//! Δt floor) abort the stage.

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;

use crate::domain::Domain;
use crate::dynamics::DynCoefs;
use crate::elements::ElemRegistry;
use crate::error::{Result, SolverError};
use crate::solution::DynVals;
use pfem_io::Summary;
use pfem_model::Sim;

/// One simulation: input document, domains and the time-loop state
pub struct Fem {
    pub sim: Arc<Sim>,
    pub registry: ElemRegistry,
    pub domains: Vec<Domain>,
    pub dyncfs: DynCoefs,
    pub summary: Summary,
    /// Output index of the next snapshot
    pub tidx: usize,
    /// Identifier when several simulations run concurrently
    pub gid: usize,
    t: f64,
}

impl Fem {
    pub fn new(sim: Sim) -> Result<Self> {
        Self::with_registry(sim, ElemRegistry::full())
    }

    /// Build with an explicit (possibly extended) element registry
    pub fn with_registry(sim: Sim, registry: ElemRegistry) -> Result<Self> {
        let sim = Arc::new(sim);
        let dyncfs = DynCoefs::new(&sim.solver)?;
        let mut domains = Vec::with_capacity(sim.regions.len());
        for reg_idx in 0..sim.regions.len() {
            domains.push(Domain::new(Arc::clone(&sim), reg_idx, 0, 1)?);
        }
        Ok(Self {
            sim,
            registry,
            domains,
            dyncfs,
            summary: Summary::new(),
            tidx: 0,
            gid: 0,
            t: 0.0,
        })
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    fn out_dir(&self, reg_idx: usize) -> Option<PathBuf> {
        if self.sim.out_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.sim.out_dir).join(format!("dom{reg_idx}")))
        }
    }

    /// Run every stage
    pub fn run(&mut self) -> Result<()> {
        for istg in 0..self.sim.stages.len() {
            self.set_stage(istg)?;
            if self.sim.stages[istg].control.skip {
                continue;
            }
            self.solve_stage(istg)?;
        }
        if !self.sim.out_dir.is_empty() {
            self.summary.save(&self.sim.out_dir)?;
        }
        Ok(())
    }

    /// Build all domains for a stage and seed the initial values
    pub fn set_stage(&mut self, istg: usize) -> Result<()> {
        for dom in &mut self.domains {
            dom.set_stage(istg, &self.registry)?;
            dom.set_ini_values(istg)?;
            // an imported checkpoint carries its own clock
            if dom.sol.t > self.t {
                self.t = dom.sol.t;
            }
            for k in 0..dom.fixed_km.len() {
                let i = dom.fixed_km[k];
                dom.elems[i].recompute(!self.sim.steady)?;
            }
        }
        for dom in &mut self.domains {
            dom.sol.t = self.t;
        }
        self.summary.stage_tidx.push(self.tidx);
        Ok(())
    }

    /// Advance one stage's time loop
    pub fn solve_stage(&mut self, istg: usize) -> Result<()> {
        let control = self.sim.stages[istg].control.clone();
        let dt_fn = self.sim.funcs.get(&control.dt)?;
        let dtout_fn = if control.dtout.is_empty() {
            None
        } else {
            Some(self.sim.funcs.get(&control.dtout)?)
        };

        let t_end = self.t + control.tf;
        self.output(istg)?;
        let mut next_out = self.t + dtout_fn.as_ref().map(|f| f.f(self.t, &[])).unwrap_or(0.0);

        while self.t < t_end - 1e-13 {
            let mut dt = dt_fn.f(self.t, &[]).min(t_end - self.t);
            let mut ndiv = 0usize;
            loop {
                match self.step(dt) {
                    Ok(()) => break,
                    Err(e) if recoverable(&e) => {
                        for dom in &mut self.domains {
                            dom.rollback()?;
                        }
                        ndiv += 1;
                        dt /= 2.0;
                        if ndiv >= self.sim.solver.ndvg_max {
                            return Err(SolverError::Convergence(format!(
                                "{ndiv} consecutive failures at t = {}: {e}",
                                self.t
                            )));
                        }
                        if dt < self.sim.solver.dt_min {
                            return Err(SolverError::Convergence(format!(
                                "time step underflow at t = {}: {e}",
                                self.t
                            )));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            self.t += dt;
            if dtout_fn.is_none() || self.t >= next_out - 1e-13 {
                self.output(istg)?;
                if let Some(f) = &dtout_fn {
                    next_out = self.t + f.f(self.t, &[]);
                }
            }
        }
        Ok(())
    }

    /// One implicit step across every domain
    pub fn step(&mut self, dt: f64) -> Result<()> {
        self.dyncfs.calc_both(dt)?;
        let dcs = DynVals {
            beta1: self.dyncfs.beta1,
            beta2: self.dyncfs.beta2,
            a1: self.dyncfs.a1,
            a2: self.dyncfs.a2,
            a3: self.dyncfs.a3,
            a4: self.dyncfs.a4,
            a5: self.dyncfs.a5,
            a6: self.dyncfs.a6,
            a7: self.dyncfs.a7,
            a8: self.dyncfs.a8,
        };
        let steady = self.sim.steady;
        let ctrl = &self.sim.solver;

        // snapshot every domain before touching any of them, so a failure
        // in one can roll all of them back to this step's start
        for dom in &mut self.domains {
            dom.sol.dcs = dcs;
            dom.sol.backup();
            dom.sol.dt = dt;
            if !steady {
                // stars from the previous step, frozen through this one
                dom.compute_stars();
                dom.interp_star_vars()?;
            }
            dom.sol.t += dt;
            dom.sol.dy.fill(0.0);
        }

        for dom in &mut self.domains {
            // Newton loop
            let mut norm0 = 0.0;
            let mut converged = false;
            for it in 0..ctrl.it_max {
                let norm = dom.assemble_rhs()?;
                if !norm.is_finite() {
                    return Err(SolverError::Convergence(format!(
                        "non-finite residual at t = {}",
                        dom.sol.t
                    )));
                }
                if it == 0 {
                    norm0 = norm;
                }
                if norm <= ctrl.tol_abs + ctrl.tol_rel * norm0 && (it > 0 || norm <= ctrl.tol_abs) {
                    converged = true;
                    break;
                }
                dom.assemble_kb(it == 0)?;
                dom.solve_and_update()?;
            }
            if !converged {
                return Err(SolverError::Convergence(format!(
                    "Newton did not converge within {} iterations at t = {}",
                    ctrl.it_max, dom.sol.t
                )));
            }

            if !steady {
                dom.recover_derivs();
            }
            dom.update_ivs()?;
        }

        // all domains converged; seal the step
        for dom in &mut self.domains {
            dom.commit_step()?;
        }
        Ok(())
    }

    /// Record an output time and write snapshots when an output directory
    /// is configured
    fn output(&mut self, istg: usize) -> Result<()> {
        self.summary.out_times.push(self.t);
        for reg_idx in 0..self.domains.len() {
            if let Some(dir) = self.out_dir(reg_idx) {
                let snap = self.domains[reg_idx].snapshot(self.tidx, istg)?;
                pfem_io::save_snapshot(dir, &snap)?;
            }
        }
        self.tidx += 1;
        Ok(())
    }
}

/// Errors the driver may retry with a smaller time step
fn recoverable(e: &SolverError) -> bool {
    matches!(
        e,
        SolverError::Geometric { .. } | SolverError::Constitutive { .. } | SolverError::Convergence(_)
    )
}

/// Run independent simulations concurrently. Each `Fem` owns its input,
/// domains and solution; nothing mutable is shared.
pub fn run_many(fems: &mut [Fem]) -> Vec<Result<()>> {
    fems.par_iter_mut().map(Fem::run).collect()
}
