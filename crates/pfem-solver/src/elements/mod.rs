//! Element kinds and the uniform contract the engine consumes.
//!
//! Kinds are a tagged variant (`ElemKind`); the engine drives them through
//! dispatch methods without knowing any physics. Capability queries
//! (stateful, connector, extrapolator, fixed-KM, ip-output) are pattern
//! matches that the domain resolves into index subsets at stage build.
//!
//! A registry maps a type string to an (info-builder, allocator) pair.
//! It is constructed explicitly by the caller, with no global mutable
//! state, so concurrent simulations and tests stay independent.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SolverError};
use crate::ips::IpsMap;
use crate::lin_solver::Triplet;
use crate::solution::Solution;
use pfem_model::{Cell, ElemData, FaceCond, Func, FuncRegistry, MatRegistry};

pub mod beam;
pub mod diffusion;
pub mod joint;
pub mod liquid;
pub mod liquid_gas;
pub mod ramp;
pub mod rod;
pub mod solid;
pub mod solid_liquid;
pub mod solid_thermal;

pub use beam::ElemBeam;
pub use diffusion::ElemDiffusion;
pub use joint::ElemJoint;
pub use liquid::ElemLiquid;
pub use liquid_gas::ElemLiquidGas;
pub use ramp::Ramp;
pub use rod::ElemRod;
pub use solid::ElemSolid;
pub use solid_liquid::ElemSolidLiquid;
pub use solid_thermal::ElemSolidThermal;

/// Mandel off-diagonal scaling
pub const SQ2: f64 = std::f64::consts::SQRT_2;

/// Displacement DOF keys for the space dimension
pub fn ukeys(ndim: usize) -> &'static [&'static str] {
    if ndim == 3 { &["ux", "uy", "uz"] } else { &["ux", "uy"] }
}

/// What an element kind needs from the engine for one cell
#[derive(Debug, Clone)]
pub struct Info {
    /// DOF keys per local node
    pub dofs: Vec<Vec<String>>,
    /// Solution-key to flux-key map
    pub y2f: Vec<(String, String)>,
    /// DOF keys that are first order in time
    pub t1: Vec<String>,
    /// DOF keys that are second order in time
    pub t2: Vec<String>,
    /// Number of values extrapolated from ips to nodes
    pub nextrap: usize,
}

impl Info {
    pub fn new() -> Self {
        Self { dofs: Vec::new(), y2f: Vec::new(), t1: Vec::new(), t2: Vec::new(), nextrap: 0 }
    }
}

impl Default for Info {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocation context handed to element factories
pub struct ElemCtx<'a> {
    pub ndim: usize,
    pub cell: &'a Cell,
    /// Vertex coordinates, nverts × ndim
    pub x: DMatrix<f64>,
    /// Effective face conditions (mesh records plus stage additions)
    pub face_conds: Vec<FaceCond>,
    pub edata: &'a ElemData,
    pub mats: &'a MatRegistry,
    pub funcs: &'a FuncRegistry,
    pub axisym: bool,
    pub pstress: bool,
}

/// Local vertex indices of the seep ("fl"-carrying) nodes, in ascending
/// order, derived from the face conditions with the given key
pub fn dual_face_verts(cell: &Cell, face_conds: &[FaceCond], key: &str) -> Vec<usize> {
    let mut verts: Vec<usize> = face_conds
        .iter()
        .filter(|fc| fc.key == key)
        .flat_map(|fc| cell.shape.face_verts(fc.face).iter().copied())
        .collect();
    verts.sort_unstable();
    verts.dedup();
    verts
}

/// The tagged element variant
#[derive(Debug)]
pub enum ElemKind {
    Diffusion(ElemDiffusion),
    Liquid(ElemLiquid),
    LiquidGas(ElemLiquidGas),
    Solid(ElemSolid),
    SolidLiquid(ElemSolidLiquid),
    SolidThermal(ElemSolidThermal),
    Rod(ElemRod),
    Beam(ElemBeam),
    Joint(ElemJoint),
}

macro_rules! dispatch {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            ElemKind::Diffusion($e) => $body,
            ElemKind::Liquid($e) => $body,
            ElemKind::LiquidGas($e) => $body,
            ElemKind::Solid($e) => $body,
            ElemKind::SolidLiquid($e) => $body,
            ElemKind::SolidThermal($e) => $body,
            ElemKind::Rod($e) => $body,
            ElemKind::Beam($e) => $body,
            ElemKind::Joint($e) => $body,
        }
    };
}

impl ElemKind {
    /// Cell id
    pub fn id(&self) -> usize {
        dispatch!(self, e => e.cid)
    }

    /// Receive the global equation numbers grouped by local node, plus
    /// the dual ("fl") equations of seep/convective faces
    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], dual_eqs: &[usize]) -> Result<()> {
        dispatch!(self, e => e.set_eqs(eqs, dual_eqs))
    }

    /// Receive an element-wide condition ("g" gravity, "s" source)
    pub fn set_ele_conds(&mut self, key: &str, f: Func, extra: &str) -> Result<()> {
        dispatch!(self, e => e.set_ele_conds(key, f, extra))
    }

    /// Cache the star-variable predictors at the integration points
    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        dispatch!(self, e => e.interp_star_vars(sol))
    }

    /// Add −R to the global residual at the mapped equations
    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        dispatch!(self, e => e.add_to_rhs(fb, sol))
    }

    /// Add the consistent tangent into the sparse triplet
    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, first_it: bool) -> Result<()> {
        dispatch!(self, e => e.add_to_kb(kb, sol, first_it))
    }

    /// Serialize internal state for checkpointing
    pub fn encode(&self) -> Result<serde_json::Value> {
        dispatch!(self, e => e.encode())
    }

    /// Restore internal state from a checkpoint
    pub fn decode(&mut self, v: &serde_json::Value) -> Result<()> {
        dispatch!(self, e => e.decode(v))
    }

    /// Upper bound on this element's tangent nonzeros
    pub fn nnz_estimate(&self) -> usize {
        dispatch!(self, e => e.nnz_estimate())
    }

    // ---- capability queries ------------------------------------------

    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ElemKind::Liquid(_)
                | ElemKind::LiquidGas(_)
                | ElemKind::Solid(_)
                | ElemKind::SolidLiquid(_)
                | ElemKind::SolidThermal(_)
        )
    }

    pub fn is_connector(&self) -> bool {
        matches!(self, ElemKind::Joint(_))
    }

    pub fn is_extrapolator(&self) -> bool {
        matches!(
            self,
            ElemKind::Liquid(_) | ElemKind::LiquidGas(_) | ElemKind::Solid(_) | ElemKind::SolidLiquid(_)
        )
    }

    pub fn has_fixed_km(&self) -> bool {
        matches!(self, ElemKind::Rod(_) | ElemKind::Beam(_))
    }

    pub fn is_out_iper(&self) -> bool {
        !matches!(self, ElemKind::Joint(_))
    }

    // ---- stateful subset ---------------------------------------------

    /// Update internal variables from ΔY after Newton converged
    pub fn update(&mut self, sol: &Solution) -> Result<()> {
        match self {
            ElemKind::Liquid(e) => e.update(sol),
            ElemKind::LiquidGas(e) => e.update(sol),
            ElemKind::Solid(e) => e.update(sol),
            ElemKind::SolidLiquid(e) => e.update(sol),
            ElemKind::SolidThermal(e) => e.update(sol),
            _ => Ok(()),
        }
    }

    /// Allocate and initialise the internal-variable arrays
    pub fn set_ini_ivs(
        &mut self,
        sol: &Solution,
        ivs: Option<&HashMap<String, Vec<f64>>>,
    ) -> Result<()> {
        match self {
            ElemKind::Liquid(e) => e.set_ini_ivs(sol, ivs),
            ElemKind::LiquidGas(e) => e.set_ini_ivs(sol, ivs),
            ElemKind::Solid(e) => e.set_ini_ivs(sol, ivs),
            ElemKind::SolidLiquid(e) => e.set_ini_ivs(sol, ivs),
            ElemKind::SolidThermal(e) => e.set_ini_ivs(sol, ivs),
            _ => Ok(()),
        }
    }

    /// Copy States into StatesBkp (or StatesAux)
    pub fn backup_ivs(&mut self, aux: bool) -> Result<()> {
        match self {
            ElemKind::Liquid(e) => e.backup_ivs(aux),
            ElemKind::LiquidGas(e) => e.backup_ivs(aux),
            ElemKind::Solid(e) => e.backup_ivs(aux),
            ElemKind::SolidLiquid(e) => e.backup_ivs(aux),
            ElemKind::SolidThermal(e) => e.backup_ivs(aux),
            _ => Ok(()),
        }
    }

    /// Copy StatesBkp (or StatesAux) back into States
    pub fn restore_ivs(&mut self, aux: bool) -> Result<()> {
        match self {
            ElemKind::Liquid(e) => e.restore_ivs(aux),
            ElemKind::LiquidGas(e) => e.restore_ivs(aux),
            ElemKind::Solid(e) => e.restore_ivs(aux),
            ElemKind::SolidLiquid(e) => e.restore_ivs(aux),
            ElemKind::SolidThermal(e) => e.restore_ivs(aux),
            _ => Ok(()),
        }
    }

    /// Reset displacement-related state after displacements were zeroed
    pub fn ureset(&mut self, sol: &Solution) -> Result<()> {
        match self {
            ElemKind::Solid(e) => e.ureset(sol),
            ElemKind::SolidLiquid(e) => e.ureset(sol),
            ElemKind::SolidThermal(e) => e.ureset(sol),
            _ => Ok(()),
        }
    }

    // ---- connector subset --------------------------------------------

    /// Wire a joint to the elements it bridges; returns the extra
    /// nonzeros it adds to the tangent
    pub fn connect(&mut self, cid2elem: &[Option<usize>], cell: &Cell) -> Result<usize> {
        match self {
            ElemKind::Joint(e) => e.connect(cid2elem, cell),
            _ => Ok(0),
        }
    }

    // ---- extrapolator subset -----------------------------------------

    /// Contribute per-ip values to the node-extrapolated arrays
    pub fn add_to_ext(&self, sol: &mut Solution) -> Result<()> {
        match self {
            ElemKind::Liquid(e) => e.add_to_ext(sol),
            ElemKind::LiquidGas(e) => e.add_to_ext(sol),
            ElemKind::Solid(e) => e.add_to_ext(sol),
            ElemKind::SolidLiquid(e) => e.add_to_ext(sol),
            _ => Ok(()),
        }
    }

    // ---- ip-output subset --------------------------------------------

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        dispatch!(self, e => e.out_ip_coords())
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        dispatch!(self, e => e.out_ip_keys())
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, sol: &Solution) -> Result<()> {
        dispatch!(self, e => e.out_ip_vals(map, sol))
    }

    // ---- fixed-KM subset ---------------------------------------------

    /// Rebuild the fixed stiffness (and mass) matrices
    pub fn recompute(&mut self, with_m: bool) -> Result<()> {
        match self {
            ElemKind::Rod(e) => e.recompute(with_m),
            ElemKind::Beam(e) => e.recompute(with_m),
            _ => Ok(()),
        }
    }
}

/// Attach the integration-point index to a geometric/constitutive error
pub(crate) fn at_ip(e: SolverError, idx: usize) -> SolverError {
    match e {
        SolverError::Geometric { cid, reason, .. } => SolverError::Geometric { cid, ip: idx, reason },
        SolverError::Constitutive { cid, reason, .. } => {
            SolverError::Constitutive { cid, ip: idx, reason }
        }
        other => other,
    }
}

type InfoFn = fn(&Cell, &[FaceCond], &ElemData, usize) -> Result<Info>;
type AllocFn = fn(&ElemCtx) -> Result<ElemKind>;

/// Explicit element registry mapping a type tag to its factories
pub struct ElemRegistry {
    map: HashMap<String, (InfoFn, AllocFn)>,
}

impl ElemRegistry {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Registry with every built-in kind
    pub fn full() -> Self {
        let mut reg = Self::new();
        reg.register("diffusion", diffusion::info, diffusion::alloc);
        reg.register("liquid", liquid::info, liquid::alloc);
        reg.register("liquid-gas", liquid_gas::info, liquid_gas::alloc);
        reg.register("solid", solid::info, solid::alloc);
        reg.register("solid-liquid", solid_liquid::info, solid_liquid::alloc);
        reg.register("solid-thermal", solid_thermal::info, solid_thermal::alloc);
        reg.register("rod", rod::info, rod::alloc);
        reg.register("beam", beam::info, beam::alloc);
        reg.register("joint", joint::info, joint::alloc);
        reg
    }

    pub fn register(&mut self, name: &str, info: InfoFn, alloc: AllocFn) {
        self.map.insert(name.to_string(), (info, alloc));
    }

    pub fn info(
        &self,
        kind: &str,
        cell: &Cell,
        face_conds: &[FaceCond],
        edata: &ElemData,
        ndim: usize,
    ) -> Result<Info> {
        let (f, _) = self
            .map
            .get(kind)
            .ok_or_else(|| SolverError::Input(format!("unknown element kind '{kind}'")))?;
        f(cell, face_conds, edata, ndim)
    }

    pub fn alloc(&self, kind: &str, ctx: &ElemCtx) -> Result<ElemKind> {
        let (_, f) = self
            .map
            .get(kind)
            .ok_or_else(|| SolverError::Input(format!("unknown element kind '{kind}'")))?;
        f(ctx)
    }
}

impl Default for ElemRegistry {
    fn default() -> Self {
        Self::full()
    }
}
