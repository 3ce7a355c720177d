//! Simulation-input document.
//!
//! One `Sim` enumerates regions (mesh + per-tag element data), materials,
//! functions, stages and solver control. The CLI reads it from JSON; the
//! structure itself is the library boundary.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::functions::FuncRegistry;
use crate::materials::MatRegistry;
use crate::mesh::Mesh;
use crate::Result;

/// Per-tag element data: which element kind and materials a cell tag uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElemData {
    /// Cell tag this record applies to
    pub tag: i32,
    /// Element kind name in the element registry
    pub kind: String,
    /// Primary material name
    pub mat: String,
    /// Secondary material for coupled kinds (e.g. porous for "solid-liquid")
    #[serde(default)]
    pub mat_extra: String,
    /// Key-coded extra parameters, e.g. "!area:0.01 !cdam:0.1"
    #[serde(default)]
    pub extra: String,
    /// Start the simulation with these cells inactive
    #[serde(default)]
    pub inactive: bool,
    /// Number of volume integration points (0 = shape default)
    #[serde(default)]
    pub nip: usize,
    /// Number of face integration points (0 = shape default)
    #[serde(default)]
    pub nip_face: usize,
}

/// One region: a mesh plus element data per cell tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub mesh: Mesh,
    pub edata: Vec<ElemData>,
}

impl Region {
    /// Element data for a cell tag, if any
    pub fn edata_for(&self, tag: i32) -> Option<&ElemData> {
        self.edata.iter().find(|e| e.tag == tag)
    }
}

/// Element-wide condition applied per cell tag ("g" gravity, "s" source)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EleCond {
    pub tags: Vec<i32>,
    pub keys: Vec<String>,
    pub funcs: Vec<String>,
    #[serde(default)]
    pub extra: String,
}

/// Face boundary condition applied per cell tag and local face index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBc {
    pub cell_tags: Vec<i32>,
    pub face: usize,
    pub key: String,
    pub func: String,
    #[serde(default)]
    pub extra: String,
}

/// Node boundary condition applied per vertex tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBc {
    pub vert_tags: Vec<i32>,
    pub key: String,
    pub func: String,
    #[serde(default)]
    pub extra: String,
}

/// One layer of the geostatic (porous layering) initial state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IniLayer {
    /// Cell tags forming the layer
    pub tags: Vec<i32>,
    /// Earth-pressure coefficient at rest
    pub k0: f64,
    /// Surcharge applied at the top of this layer (topmost layer only)
    #[serde(default)]
    pub surcharge: f64,
}

/// Geostatic initial state: layered column with hydrostatic pressures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IniPorous {
    pub layers: Vec<IniLayer>,
    /// Water table elevation
    pub zwater: f64,
    /// Gravity magnitude
    pub gravity: f64,
}

/// Source of initial values for a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IniSource {
    /// Layered porous column (hydrostatic + overburden integration)
    Porous(IniPorous),
    /// Explicit uniform stress field
    Stress { sx: f64, sy: f64, sz: f64 },
    /// Evaluate a function at each node for each DOF key
    Fcn { items: Vec<(String, String)> },
    /// Import a previous checkpoint (snapshot `tidx` under `path`)
    Import { path: String, tidx: usize, reset_u: bool },
}

/// Per-stage time-loop control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageControl {
    /// Final time of the stage
    pub tf: f64,
    /// Name of the Δt function
    pub dt: String,
    /// Name of the Δtout function (empty: output every step)
    #[serde(default)]
    pub dtout: String,
    /// Build the stage but skip its time loop
    #[serde(default)]
    pub skip: bool,
}

/// One simulation stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub activate: Vec<i32>,
    #[serde(default)]
    pub deactivate: Vec<i32>,
    #[serde(default)]
    pub ini: Option<IniSource>,
    #[serde(default)]
    pub ele_conds: Vec<EleCond>,
    #[serde(default)]
    pub face_bcs: Vec<FaceBc>,
    #[serde(default)]
    pub node_bcs: Vec<NodeBc>,
    pub control: StageControl,
}

/// Global solver options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverData {
    /// θ for the generalized trapezoidal method
    pub theta: f64,
    /// Newmark θ1 (γ)
    pub theta1: f64,
    /// Newmark θ2 (2β)
    pub theta2: f64,
    /// Hilber–Hughes–Taylor switch
    #[serde(default)]
    pub hht: bool,
    /// HHT α ∈ [−1/3, 0]
    #[serde(default)]
    pub alpha: f64,
    /// Minimum admissible time step
    pub dt_min: f64,
    /// Relative residual tolerance for Newton convergence
    pub tol_rel: f64,
    /// Absolute residual tolerance
    pub tol_abs: f64,
    /// Maximum Newton iterations per step
    pub it_max: usize,
    /// Consecutive divergence-control failures before aborting
    #[serde(default = "default_ndvg")]
    pub ndvg_max: usize,
    /// Linear solver name ("dense-lu")
    #[serde(default)]
    pub linsol: String,
}

fn default_ndvg() -> usize {
    3
}

impl Default for SolverData {
    fn default() -> Self {
        Self {
            theta: 0.5,
            theta1: 0.5,
            theta2: 0.5,
            hht: false,
            alpha: 0.0,
            dt_min: 1e-8,
            tol_rel: 1e-10,
            tol_abs: 1e-12,
            it_max: 20,
            ndvg_max: 3,
            linsol: String::new(),
        }
    }
}

/// The full simulation-input document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sim {
    #[serde(default)]
    pub name: String,
    pub ndim: usize,
    /// Steady-state run (no time derivatives)
    #[serde(default)]
    pub steady: bool,
    /// Axisymmetric 2D formulation
    #[serde(default)]
    pub axisym: bool,
    /// Plane-stress 2D formulation
    #[serde(default)]
    pub pstress: bool,
    pub regions: Vec<Region>,
    pub mats: MatRegistry,
    pub funcs: FuncRegistry,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub solver: SolverData,
    /// Output directory for snapshots and the summary
    #[serde(default)]
    pub out_dir: String,
}

impl Sim {
    /// Parse from a JSON string and rebuild mesh lookups
    pub fn from_json_str(s: &str) -> Result<Self> {
        let mut sim: Sim = serde_json::from_str(s)?;
        for reg in &mut sim.regions {
            reg.mesh.build_lookups();
            reg.mesh.validate()?;
        }
        Ok(sim)
    }

    /// Read from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }
}

/// Extract a float from a key-coded extra string like "!kappa:1e3 !beta:80"
pub fn keycode_f64(extra: &str, key: &str) -> Option<f64> {
    for tok in extra.split_whitespace() {
        let tok = tok.strip_prefix('!').unwrap_or(tok);
        if let Some((k, v)) = tok.split_once(':')
            && k == key
        {
            return v.parse().ok();
        }
    }
    None
}

/// True when a key-coded flag is present, e.g. "!sramp"
pub fn keycode_flag(extra: &str, key: &str) -> bool {
    extra
        .split_whitespace()
        .any(|tok| tok.strip_prefix('!').unwrap_or(tok).split(':').next() == Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycode_parsing() {
        let extra = "!kappa:1e3 !beta:80 !sramp";
        assert_eq!(keycode_f64(extra, "kappa"), Some(1e3));
        assert_eq!(keycode_f64(extra, "beta"), Some(80.0));
        assert_eq!(keycode_f64(extra, "missing"), None);
        assert!(keycode_flag(extra, "sramp"));
        assert!(!keycode_flag(extra, "macaulay"));
    }

    #[test]
    fn sim_roundtrip_through_json() {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(0, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 1.0]);
        mesh.add_vert(0, vec![0.0, 1.0]);
        mesh.add_cell(-1, crate::mesh::ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();

        let sim = Sim {
            name: "square".to_string(),
            ndim: 2,
            steady: true,
            axisym: false,
            pstress: false,
            regions: vec![Region {
                mesh,
                edata: vec![ElemData {
                    tag: -1,
                    kind: "diffusion".to_string(),
                    mat: "m1".to_string(),
                    mat_extra: String::new(),
                    extra: String::new(),
                    inactive: false,
                    nip: 0,
                    nip_face: 0,
                }],
            }],
            mats: MatRegistry::new(),
            funcs: FuncRegistry::new(),
            stages: vec![Stage {
                name: "s1".to_string(),
                activate: vec![],
                deactivate: vec![],
                ini: None,
                ele_conds: vec![],
                face_bcs: vec![],
                node_bcs: vec![],
                control: StageControl { tf: 1.0, dt: "dt".to_string(), dtout: String::new(), skip: false },
            }],
            solver: SolverData::default(),
            out_dir: String::new(),
        };

        let s = serde_json::to_string(&sim).unwrap();
        let back = Sim::from_json_str(&s).unwrap();
        assert_eq!(back.regions[0].mesh.cells.len(), 1);
        assert_eq!(back.regions[0].edata_for(-1).unwrap().kind, "diffusion");
        assert!(back.regions[0].edata_for(-2).is_none());
    }
}
