//! Material parameter records and constitutive models.
//!
//! Models are fetched by name from a central registry. Four categories are
//! covered:
//! - small-strain solids (linear elasticity),
//! - scalar diffusion with nonlinear conductivity,
//! - porous media (compressible fluids, retention curve, relative
//!   conductivities, generalized storage coefficients),
//! - thermal properties.
//!
//! The storage coefficients follow the mass-balance linearisation for
//! unsaturated flow: with capillary pressure pc, liquid saturation sl(pc)
//! and slope Cc = dsl/dpc,
//!
//! ```text
//! d(nf·sl·ρl)/dt = Cpl·dpl/dt + Cpg·dpg/dt
//! d(nf·sg·ρg)/dt = Dpl·dpl/dt + Dpg·dpg/dt
//! ```
//!
//! All first derivatives of (Cpl, Cpg, Dpl, Dpg) with respect to (pl, pg)
//! are analytic so that element tangents stay consistent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ModelError, Result};

/// Linear-elastic small-strain solid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinElast {
    /// Young's modulus [Pa]
    pub e: f64,
    /// Poisson's ratio [-]
    pub nu: f64,
    /// Density [kg/m³]
    pub rho: f64,
}

impl LinElast {
    /// Shear modulus G = E / (2(1+ν))
    pub fn shear_modulus(&self) -> f64 {
        self.e / (2.0 * (1.0 + self.nu))
    }

    /// Bulk modulus K = E / (3(1−2ν))
    pub fn bulk_modulus(&self) -> f64 {
        self.e / (3.0 * (1.0 - 2.0 * self.nu))
    }
}

/// Scalar diffusion with cubic conductivity multiplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diffusion {
    /// Storage coefficient ρ
    pub rho: f64,
    /// Constant anisotropic conductivity tensor
    pub kcte: [[f64; 3]; 3],
    /// Polynomial coefficients of k(u) = a0 + a1·u + a2·u² + a3·u³
    pub a: [f64; 4],
}

impl Diffusion {
    /// Isotropic convenience constructor
    pub fn isotropic(rho: f64, k: f64, a: [f64; 4]) -> Self {
        Self { rho, kcte: [[k, 0.0, 0.0], [0.0, k, 0.0], [0.0, 0.0, k]], a }
    }

    pub fn kval(&self, u: f64) -> f64 {
        self.a[0] + self.a[1] * u + self.a[2] * u * u + self.a[3] * u * u * u
    }

    pub fn dkdu(&self, u: f64) -> f64 {
        self.a[1] + 2.0 * self.a[2] * u + 3.0 * self.a[3] * u * u
    }
}

/// Slightly compressible fluid: ρ(p) = ρ0 + C·(p − p0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fluid {
    /// Reference density [kg/m³]
    pub rho0: f64,
    /// Reference pressure [Pa]
    pub p0: f64,
    /// Compressibility dρ/dp [kg/(m³·Pa)]
    pub cc: f64,
}

impl Fluid {
    pub fn rho(&self, p: f64) -> f64 {
        self.rho0 + self.cc * (p - self.p0)
    }

    /// Hydrostatic pressure a depth dz below a point at pressure p_top,
    /// accounting for the density increase with pressure.
    ///
    /// Solves dp/dz' = g·ρ(p) in closed form (linear ODE).
    pub fn hydrostatic(&self, p_top: f64, dz: f64, g: f64) -> f64 {
        let a = g * self.cc;
        if a.abs() < 1e-13 {
            return p_top + g * self.rho(p_top) * dz;
        }
        let b = g * (self.rho0 - self.cc * self.p0);
        (p_top + b / a) * (a * dz).exp() - b / a
    }
}

/// Liquid retention curve sl(pc)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Retention {
    /// Brooks–Corey: sl = sl_min + (sl_max − sl_min)·(pc_ae/pc)^λ for
    /// pc > pc_ae, saturated below the air-entry value
    BrooksCorey {
        lambda: f64,
        pc_ae: f64,
        sl_min: f64,
        sl_max: f64,
    },
    /// Linear desaturation between pc = 0 and pc = pc_max
    LinSat {
        pc_max: f64,
        sl_min: f64,
        sl_max: f64,
    },
}

impl Retention {
    pub fn sl_max(&self) -> f64 {
        match self {
            Retention::BrooksCorey { sl_max, .. } | Retention::LinSat { sl_max, .. } => *sl_max,
        }
    }

    pub fn sl_min(&self) -> f64 {
        match self {
            Retention::BrooksCorey { sl_min, .. } | Retention::LinSat { sl_min, .. } => *sl_min,
        }
    }

    /// Saturation at capillary pressure pc
    pub fn sl(&self, pc: f64) -> f64 {
        match *self {
            Retention::BrooksCorey { lambda, pc_ae, sl_min, sl_max } => {
                if pc <= pc_ae {
                    sl_max
                } else {
                    sl_min + (sl_max - sl_min) * (pc_ae / pc).powf(lambda)
                }
            }
            Retention::LinSat { pc_max, sl_min, sl_max } => {
                if pc <= 0.0 {
                    sl_max
                } else if pc >= pc_max {
                    sl_min
                } else {
                    sl_max - (sl_max - sl_min) * pc / pc_max
                }
            }
        }
    }

    /// Slope Cc = dsl/dpc (non-positive)
    pub fn cc(&self, pc: f64) -> f64 {
        match *self {
            Retention::BrooksCorey { lambda, pc_ae, sl_min, sl_max } => {
                if pc <= pc_ae {
                    0.0
                } else {
                    -lambda * (sl_max - sl_min) * pc_ae.powf(lambda) * pc.powf(-lambda - 1.0)
                }
            }
            Retention::LinSat { pc_max, sl_min, sl_max } => {
                if pc <= 0.0 || pc >= pc_max {
                    0.0
                } else {
                    -(sl_max - sl_min) / pc_max
                }
            }
        }
    }

    /// Curvature dCc/dpc
    pub fn dcc_dpc(&self, pc: f64) -> f64 {
        match *self {
            Retention::BrooksCorey { lambda, pc_ae, sl_min, sl_max } => {
                if pc <= pc_ae {
                    0.0
                } else {
                    lambda * (lambda + 1.0) * (sl_max - sl_min) * pc_ae.powf(lambda)
                        * pc.powf(-lambda - 2.0)
                }
            }
            Retention::LinSat { .. } => 0.0,
        }
    }
}

/// Liquid-phase coefficients at a single pressure state (pg = 0, pc = −pl)
#[derive(Debug, Clone, Copy)]
pub struct LiqCoefs {
    pub pc: f64,
    pub sl: f64,
    pub rho_l: f64,
    /// dρl/dpl
    pub drhol_dpl: f64,
    /// Storage coefficient Cpl
    pub cpl: f64,
    pub dcpl_dpl: f64,
    /// Relative conductivity krl(sl)
    pub krl: f64,
    pub dkrl_dpl: f64,
}

/// Full coefficient set for the two-phase formulation (pc = pg − pl)
#[derive(Debug, Clone, Copy)]
pub struct LgsCoefs {
    pub pc: f64,
    pub sl: f64,
    pub sg: f64,
    pub rho_l: f64,
    pub rho_g: f64,
    pub drhol_dpl: f64,
    pub drhog_dpg: f64,
    pub cpl: f64,
    pub cpg: f64,
    pub dpl: f64,
    pub dpg: f64,
    pub dcpl_dpl: f64,
    pub dcpl_dpg: f64,
    pub dcpg_dpl: f64,
    pub dcpg_dpg: f64,
    pub ddpl_dpl: f64,
    pub ddpl_dpg: f64,
    pub ddpg_dpl: f64,
    pub ddpg_dpg: f64,
    pub krl: f64,
    pub krg: f64,
    pub dkrl_dpl: f64,
    pub dkrl_dpg: f64,
    pub dkrg_dpl: f64,
    pub dkrg_dpg: f64,
}

/// Porous medium: solid skeleton + fluids + retention + conductivities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Porous {
    /// Reference porosity [-]
    pub nf0: f64,
    /// Solid grain density [kg/m³]
    pub rho_s: f64,
    /// Saturated liquid conductivity tensor [m/s]
    pub kl_sat: [[f64; 3]; 3],
    /// Saturated gas conductivity tensor [m/s]
    pub kg_sat: [[f64; 3]; 3],
    /// Retention curve
    pub lrm: Retention,
    /// Liquid fluid model
    pub liq: Fluid,
    /// Gas fluid model
    pub gas: Fluid,
    /// Corey exponent for krl(sl)
    pub kr_exp_l: f64,
    /// Corey exponent for krg(sg)
    pub kr_exp_g: f64,
}

impl Porous {
    /// Isotropic convenience constructor
    pub fn isotropic(nf0: f64, rho_s: f64, kl: f64, kg: f64, lrm: Retention, liq: Fluid, gas: Fluid) -> Self {
        let diag = |k: f64| [[k, 0.0, 0.0], [0.0, k, 0.0], [0.0, 0.0, k]];
        Self {
            nf0,
            rho_s,
            kl_sat: diag(kl),
            kg_sat: diag(kg),
            lrm,
            liq,
            gas,
            kr_exp_l: 3.0,
            kr_exp_g: 3.0,
        }
    }

    /// Relative liquid conductivity (Corey power law) and its sl-derivative
    fn krl_pair(&self, sl: f64) -> (f64, f64) {
        let (lo, hi) = (self.lrm.sl_min(), self.lrm.sl_max());
        let se = (sl - lo) / (hi - lo);
        if se <= 0.0 {
            return (0.0, 0.0);
        }
        if se >= 1.0 {
            return (1.0, 0.0);
        }
        let n = self.kr_exp_l;
        (se.powf(n), n * se.powf(n - 1.0) / (hi - lo))
    }

    /// Relative gas conductivity over sg ∈ [1 − sl_max, 1 − sl_min]
    fn krg_pair(&self, sg: f64) -> (f64, f64) {
        let (lo, hi) = (1.0 - self.lrm.sl_max(), 1.0 - self.lrm.sl_min());
        let se = (sg - lo) / (hi - lo);
        if se <= 0.0 {
            return (0.0, 0.0);
        }
        if se >= 1.0 {
            return (1.0, 0.0);
        }
        let n = self.kr_exp_g;
        (se.powf(n), n * se.powf(n - 1.0) / (hi - lo))
    }

    /// Mixture density for the coupled momentum balance (single liquid)
    pub fn rho_mix(&self, sl: f64, rho_l: f64) -> f64 {
        (1.0 - self.nf0) * self.rho_s + self.nf0 * sl * rho_l
    }

    /// Liquid-only coefficient set at liquid pressure pl (pc = −pl)
    pub fn liq_coefs(&self, pl: f64) -> LiqCoefs {
        let pc = -pl;
        let sl = self.lrm.sl(pc);
        let cc = self.lrm.cc(pc);
        let ccd = self.lrm.dcc_dpc(pc);
        let rho_l = self.liq.rho(pl);
        let cl = self.liq.cc;
        let nf = self.nf0;
        let (krl, dkrl_dsl) = self.krl_pair(sl);
        LiqCoefs {
            pc,
            sl,
            rho_l,
            drhol_dpl: cl,
            cpl: nf * (sl * cl - rho_l * cc),
            dcpl_dpl: nf * (-2.0 * cl * cc + rho_l * ccd),
            krl,
            // dsl/dpl = -Cc
            dkrl_dpl: -dkrl_dsl * cc,
        }
    }

    /// Two-phase coefficient set at (pl, pg) with pc = pg − pl
    pub fn lgs_coefs(&self, pl: f64, pg: f64) -> LgsCoefs {
        let pc = pg - pl;
        let sl = self.lrm.sl(pc);
        let sg = 1.0 - sl;
        let cc = self.lrm.cc(pc);
        let ccd = self.lrm.dcc_dpc(pc);
        let rho_l = self.liq.rho(pl);
        let rho_g = self.gas.rho(pg);
        let cl = self.liq.cc;
        let cg = self.gas.cc;
        let nf = self.nf0;
        let (krl, dkrl_dsl) = self.krl_pair(sl);
        let (krg, dkrg_dsg) = self.krg_pair(sg);
        LgsCoefs {
            pc,
            sl,
            sg,
            rho_l,
            rho_g,
            drhol_dpl: cl,
            drhog_dpg: cg,
            cpl: nf * (sl * cl - rho_l * cc),
            cpg: nf * rho_l * cc,
            dpl: nf * rho_g * cc,
            dpg: nf * (sg * cg - rho_g * cc),
            // dsl/dpl = -Cc, dsl/dpg = +Cc, dCc/dpl = -Ccd, dCc/dpg = +Ccd
            dcpl_dpl: nf * (-2.0 * cl * cc + rho_l * ccd),
            dcpl_dpg: nf * (cl * cc - rho_l * ccd),
            dcpg_dpl: nf * (cl * cc - rho_l * ccd),
            dcpg_dpg: nf * rho_l * ccd,
            ddpl_dpl: -nf * rho_g * ccd,
            ddpl_dpg: nf * (cg * cc + rho_g * ccd),
            ddpg_dpl: nf * (cg * cc + rho_g * ccd),
            ddpg_dpg: nf * (-2.0 * cg * cc - rho_g * ccd),
            krl,
            krg,
            dkrl_dpl: -dkrl_dsl * cc,
            dkrl_dpg: dkrl_dsl * cc,
            dkrg_dpl: dkrg_dsg * cc,
            dkrg_dpg: -dkrg_dsg * cc,
        }
    }
}

/// Thermal properties for the coupled solid–thermal element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thermal {
    /// Isotropic conductivity [W/(m·K)]
    pub kcond: f64,
    /// Volumetric heat capacity ρc [J/(m³·K)]
    pub rho_c: f64,
    /// Linear thermal expansion coefficient [1/K]
    pub alpha_t: f64,
    /// Velocity-coupling coefficient in the heat balance
    pub tc: f64,
}

/// Model variants a material record may hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MaterialModel {
    LinElast(LinElast),
    Diffusion(Diffusion),
    Porous(Porous),
    Thermal(Thermal),
}

/// A named material record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub model: MaterialModel,
}

/// Registry of materials by name with typed accessors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatRegistry {
    map: HashMap<String, Material>,
}

impl MatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mat: Material) {
        self.map.insert(mat.name.clone(), mat);
    }

    pub fn get(&self, name: &str) -> Result<&Material> {
        self.map
            .get(name)
            .ok_or_else(|| ModelError::UnknownMaterial(name.to_string()))
    }

    pub fn get_solid(&self, name: &str) -> Result<LinElast> {
        match &self.get(name)?.model {
            MaterialModel::LinElast(m) => Ok(*m),
            _ => Err(ModelError::MaterialKind { name: name.to_string(), wanted: "solid" }),
        }
    }

    pub fn get_diffusion(&self, name: &str) -> Result<Diffusion> {
        match &self.get(name)?.model {
            MaterialModel::Diffusion(m) => Ok(m.clone()),
            _ => Err(ModelError::MaterialKind { name: name.to_string(), wanted: "diffusion" }),
        }
    }

    pub fn get_porous(&self, name: &str) -> Result<Porous> {
        match &self.get(name)?.model {
            MaterialModel::Porous(m) => Ok(m.clone()),
            _ => Err(ModelError::MaterialKind { name: name.to_string(), wanted: "porous" }),
        }
    }

    pub fn get_thermal(&self, name: &str) -> Result<Thermal> {
        match &self.get(name)?.model {
            MaterialModel::Thermal(m) => Ok(*m),
            _ => Err(ModelError::MaterialKind { name: name.to_string(), wanted: "thermal" }),
        }
    }
}
