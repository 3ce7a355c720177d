//! Simulation core for transient, nonlinear, multi-physics continuum
//! problems: solid mechanics, Darcy-type seepage in unsaturated porous
//! media, scalar diffusion and their coupled formulations.
//!
//! The engine turns a mesh plus per-cell physics descriptors into a
//! linearized system for each Newton iteration of each time step,
//! coordinating essential constraints with Lagrange multipliers. Element
//! kinds plug in through a registry and a uniform contract (residual,
//! tangent, internal-variable lifecycle, ip output); the engine consumes
//! them without knowing any physics.

pub mod domain;
pub mod dynamics;
pub mod elements;
pub mod error;
pub mod essential_bcs;
pub mod fem;
pub mod geost;
pub mod ips;
pub mod lin_solver;
pub mod shapes;
pub mod solution;

pub use domain::{Dof, Domain, Node, PtNat};
pub use dynamics::DynCoefs;
pub use elements::{
    ElemBeam, ElemCtx, ElemDiffusion, ElemJoint, ElemKind, ElemLiquid, ElemLiquidGas,
    ElemRegistry, ElemRod, ElemSolid, ElemSolidLiquid, ElemSolidThermal, Info, Ramp,
};
pub use error::{Result, SolverError};
pub use essential_bcs::{EbcRhs, EbcRow, EssentialBcs};
pub use fem::{run_many, Fem};
pub use geost::{ColumnProfile, GeoState};
pub use ips::{Ip, IpRecord, IpsMap};
pub use lin_solver::{new_lin_solver, DenseLu, LinSolver, Triplet};
pub use shapes::{get_ips, ShapeScratch};
pub use solution::{DynVals, Solution};
