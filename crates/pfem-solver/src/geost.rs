//! Geostatic initial state for layered porous columns.
//!
//! Layers are sorted top to bottom. Down each column the liquid pressure
//! follows the hydrostatic profile of the layer's fluid model and the
//! total vertical stress accumulates the overburden ρ·g·Δz, starting from
//! the surcharge applied at the surface. Horizontal stresses come from
//! the earth-pressure coefficient K0 applied to the effective vertical
//! stress.

use crate::error::{Result, SolverError};
use pfem_model::materials::Porous;
use pfem_model::{IniPorous, Mesh};

/// Number of overburden integration sub-steps per layer
const NSUB: usize = 64;

/// One resolved layer of the column
#[derive(Debug, Clone)]
pub struct GeoLayer {
    pub tags: Vec<i32>,
    pub ztop: f64,
    pub zbot: f64,
    pub k0: f64,
    pub por: Porous,
    /// Total vertical stress at the layer top (tension positive, so
    /// compression is negative)
    sv_top: f64,
}

/// Point state along the column
#[derive(Debug, Clone, Copy)]
pub struct GeoState {
    pub pl: f64,
    pub pg: f64,
    pub rho_l: f64,
    pub rho_g: f64,
    /// Mixture density
    pub rho: f64,
    /// Total vertical stress (negative in compression)
    pub sv: f64,
    pub k0: f64,
}

/// Resolved column profile
#[derive(Debug, Clone)]
pub struct ColumnProfile {
    pub zwater: f64,
    pub gravity: f64,
    layers: Vec<GeoLayer>,
}

impl ColumnProfile {
    /// Resolve layer geometry from cell tags and integrate the overburden
    /// top to bottom. `porous_of` maps a layer's first tag to its medium.
    pub fn new(
        mesh: &Mesh,
        ini: &IniPorous,
        porous_of: impl Fn(i32) -> Result<Porous>,
    ) -> Result<Self> {
        if ini.layers.is_empty() {
            return Err(SolverError::Input("geostatic initial state has no layers".to_string()));
        }
        let mut layers = Vec::with_capacity(ini.layers.len());
        for lay in &ini.layers {
            let (zbot, ztop) = mesh.zrange_of_tags(&lay.tags).ok_or_else(|| {
                SolverError::Input(format!("geostatic layer with tags {:?} has no cells", lay.tags))
            })?;
            layers.push(GeoLayer {
                tags: lay.tags.clone(),
                ztop,
                zbot,
                k0: lay.k0,
                por: porous_of(lay.tags[0])?,
                sv_top: -lay.surcharge,
            });
        }
        // top to bottom
        layers.sort_by(|a, b| b.ztop.total_cmp(&a.ztop));

        let mut profile = Self { zwater: ini.zwater, gravity: ini.gravity, layers };
        profile.integrate_overburden();
        Ok(profile)
    }

    /// Hydrostatic liquid pressure at elevation z: positive below the
    /// water table, linear suction above it
    pub fn pl_at(&self, z: f64) -> f64 {
        let liq = &self.pick_layer(z).por.liq;
        if z <= self.zwater {
            liq.hydrostatic(0.0, self.zwater - z, self.gravity)
        } else {
            -liq.rho0 * self.gravity * (z - self.zwater)
        }
    }

    fn pick_layer(&self, z: f64) -> &GeoLayer {
        self.layers
            .iter()
            .find(|l| z >= l.zbot - 1e-10 && z <= l.ztop + 1e-10)
            .unwrap_or(&self.layers[self.layers.len() - 1])
    }

    /// Mixture density at elevation z
    fn rho_at(&self, z: f64) -> f64 {
        let lay = self.pick_layer(z);
        let pl = self.pl_at(z);
        let pc = -pl;
        let sl = lay.por.lrm.sl(pc).min(lay.por.lrm.sl_max());
        let rho_l = lay.por.liq.rho(pl);
        let rho_g = lay.por.gas.rho(0.0);
        (1.0 - lay.por.nf0) * lay.por.rho_s + lay.por.nf0 * (sl * rho_l + (1.0 - sl) * rho_g)
    }

    /// Chain sv_top through the stack: the surcharge loads the topmost
    /// layer and each layer adds its own weight
    fn integrate_overburden(&mut self) {
        let mut sv = self.layers[0].sv_top;
        for li in 0..self.layers.len() {
            let (ztop, zbot) = (self.layers[li].ztop, self.layers[li].zbot);
            self.layers[li].sv_top = sv;
            let dz = (ztop - zbot) / NSUB as f64;
            for k in 0..NSUB {
                let za = ztop - k as f64 * dz;
                let zb = za - dz;
                let rho_mid = (self.rho_at(za) + self.rho_at(zb)) / 2.0;
                sv -= rho_mid * self.gravity * dz;
            }
        }
    }

    /// Full state at elevation z
    pub fn state_at(&self, z: f64) -> GeoState {
        let lay = self.pick_layer(z);
        let pl = self.pl_at(z);
        let pc = -pl;
        let sl = lay.por.lrm.sl(pc).min(lay.por.lrm.sl_max());
        let rho_l = lay.por.liq.rho(pl);
        let rho_g = lay.por.gas.rho(0.0);
        let rho = (1.0 - lay.por.nf0) * lay.por.rho_s + lay.por.nf0 * (sl * rho_l + (1.0 - sl) * rho_g);

        // integrate from the layer top down to z
        let mut sv = lay.sv_top;
        let nfine = NSUB;
        let dz = (lay.ztop - z) / nfine as f64;
        if dz > 0.0 {
            for k in 0..nfine {
                let za = lay.ztop - k as f64 * dz;
                let zb = za - dz;
                let rho_mid = (self.rho_at(za) + self.rho_at(zb)) / 2.0;
                sv -= rho_mid * self.gravity * dz;
            }
        }
        GeoState { pl, pg: 0.0, rho_l, rho_g, rho, sv, k0: lay.k0 }
    }

    /// Tags participating in any layer
    pub fn tags(&self) -> Vec<i32> {
        self.layers.iter().flat_map(|l| l.tags.iter().copied()).collect()
    }
}
