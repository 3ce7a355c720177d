//! Single-liquid seepage element for unsaturated porous media.
//!
//! One "pl" DOF per node. The mass balance at an integration point reads
//!
//! ```text
//! Cpl·dpl/dt + div(ρl·wl) = 0,   ρl·wl = krl(sl)·K_l_sat·(ρl·g − ∇pl)
//! ```
//!
//! with the storage coefficient Cpl and the relative conductivity krl
//! supplied by the porous-medium model.
//!
//! "seep" faces regularize the unilateral free-surface constraint with a
//! dual variable fl on the face vertices and a ramp function: with
//! g = pl − plmax(t),
//!
//! ```text
//! rx = ρl·ramp(fl + κ·g)     at the pl equations
//! rf = fl − ramp(fl + κ·g)   at the fl equations
//! ```
//!
//! so that at equilibrium either the face seeps at pl = plmax with outflow
//! fl, or it stays dry with fl = 0.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::elements::{at_ip, dual_face_verts, ElemCtx, ElemKind, Info, Ramp};
use crate::error::{Result, SolverError};
use crate::ips::{Ip, IpsMap};
use crate::lin_solver::Triplet;
use crate::shapes::{get_ips, shape_values, ShapeScratch};
use crate::solution::Solution;
use pfem_model::materials::Porous;
use pfem_model::sim::keycode_f64;
use pfem_model::{Cell, ElemData, FaceCond, Func, ShapeKind};

/// Per-ip internal variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateLiquid {
    /// Converged liquid pressure
    pub pl: f64,
    /// Saturation
    pub sl: f64,
    /// Liquid density
    pub rho_l: f64,
    /// Reference porosity
    pub ns0: f64,
}

/// One regularized seepage face
#[derive(Debug)]
pub(crate) struct SeepFace {
    pub face: usize,
    /// Drawdown of plmax over time: plmax(t) = plmax_ini − shift(t)
    pub shift: Func,
    pub ramp: Ramp,
    pub kappa: f64,
    /// plmax at t = 0 per face ip, captured when the stage state is seeded
    pub plmax_ini: Vec<f64>,
}

pub fn info(cell: &Cell, fcs: &[FaceCond], _edata: &ElemData, _ndim: usize) -> Result<Info> {
    let mut inf = Info::new();
    inf.dofs = vec![vec!["pl".to_string()]; cell.shape.nverts()];
    for &lv in &dual_face_verts(cell, fcs, "seep") {
        inf.dofs[lv].push("fl".to_string());
    }
    inf.y2f = vec![("pl".to_string(), "ql".to_string())];
    inf.t1 = vec!["pl".to_string()];
    inf.nextrap = 1; // rho_l
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    let mdl = ctx.mats.get_porous(&ctx.edata.mat)?;
    let (ips, fips) = get_ips(ctx.cell.shape, ctx.edata.nip, ctx.edata.nip_face)?;

    let seep_verts = dual_face_verts(ctx.cell, &ctx.face_conds, "seep");
    let mut seep_faces = Vec::new();
    let mut flux_faces = Vec::new();
    for fc in &ctx.face_conds {
        match fc.key.as_str() {
            "seep" => seep_faces.push(SeepFace {
                face: fc.face,
                shift: ctx.funcs.get(&fc.func)?,
                ramp: Ramp::from_extra(&fc.extra),
                kappa: keycode_f64(&fc.extra, "kappa").unwrap_or(1.0),
                plmax_ini: vec![0.0; fips.len()],
            }),
            "ql" => flux_faces.push((fc.face, ctx.funcs.get(&fc.func)?)),
            other => {
                return Err(SolverError::Input(format!(
                    "cell {}: liquid does not support face condition '{other}'",
                    ctx.cell.id
                )));
            }
        }
    }

    let sc = ShapeScratch::new(ctx.cell.shape, ctx.cell.id);
    let xips: Vec<Vec<f64>> = ips.iter().map(|ip| sc.ip_real_coords(&ctx.x, ip)).collect();
    let sips: Vec<Vec<f64>> =
        ips.iter().map(|ip| shape_values(ctx.cell.shape, ip.r, ip.s, ip.t)).collect();
    let emat = sc.extrapolator(&ips)?;
    let nip = ips.len();

    Ok(ElemKind::Liquid(ElemLiquid {
        cid: ctx.cell.id,
        ndim: ctx.ndim,
        shape: ctx.cell.shape,
        x: ctx.x.clone(),
        verts: ctx.cell.verts.clone(),
        ips,
        fips,
        xips,
        sips,
        emat,
        plmap: Vec::new(),
        flmap: Vec::new(),
        fl_of_lv: Vec::new(),
        seep_verts,
        seep_faces,
        flux_faces,
        mdl,
        grav: None,
        psl_star: vec![0.0; nip],
        states: Vec::new(),
        states_bkp: Vec::new(),
        states_aux: Vec::new(),
    }))
}

/// Single-liquid seepage element
#[derive(Debug)]
pub struct ElemLiquid {
    pub cid: usize,
    ndim: usize,
    shape: ShapeKind,
    x: DMatrix<f64>,
    /// Global vertex ids (for node extrapolation)
    verts: Vec<usize>,
    ips: Vec<Ip>,
    fips: Vec<Ip>,
    xips: Vec<Vec<f64>>,
    sips: Vec<Vec<f64>>,
    /// Extrapolation matrix nverts × nip
    emat: DMatrix<f64>,
    pub plmap: Vec<usize>,
    /// fl equations aligned with `seep_verts`
    pub flmap: Vec<usize>,
    /// local vertex → fl equation
    fl_of_lv: Vec<Option<usize>>,
    seep_verts: Vec<usize>,
    pub(crate) seep_faces: Vec<SeepFace>,
    flux_faces: Vec<(usize, Func)>,
    mdl: Porous,
    grav: Option<Func>,
    /// Frozen ψl* at each ip
    psl_star: Vec<f64>,
    pub states: Vec<StateLiquid>,
    pub states_bkp: Vec<StateLiquid>,
    pub states_aux: Vec<StateLiquid>,
}

impl ElemLiquid {
    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], dual: &[usize]) -> Result<()> {
        let nv = self.shape.nverts();
        if eqs.len() != nv || dual.len() != self.seep_verts.len() {
            return Err(SolverError::Input(format!(
                "cell {}: equation groups do not match the element layout",
                self.cid
            )));
        }
        self.plmap = eqs.iter().map(|g| g[0]).collect();
        self.flmap = dual.to_vec();
        self.fl_of_lv = vec![None; nv];
        for (k, &lv) in self.seep_verts.iter().enumerate() {
            self.fl_of_lv[lv] = Some(dual[k]);
        }
        Ok(())
    }

    pub fn set_ele_conds(&mut self, key: &str, f: Func, _extra: &str) -> Result<()> {
        match key {
            "g" => {
                self.grav = Some(f);
                Ok(())
            }
            other => Err(SolverError::Input(format!(
                "cell {}: liquid does not support element condition '{other}'",
                self.cid
            ))),
        }
    }

    /// Gravity vector at time t (z is the last coordinate, pointing up)
    fn gvec(&self, t: f64) -> [f64; 3] {
        let mut g = [0.0; 3];
        if let Some(f) = &self.grav {
            g[self.ndim - 1] = -f.f(t, &[]);
        }
        g
    }

    fn pl_at(&self, sol: &Solution, sv: &[f64]) -> f64 {
        sv.iter().zip(&self.plmap).map(|(s, &r)| s * sol.y[r]).sum()
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        for (idx, sv) in self.sips.iter().enumerate() {
            self.psl_star[idx] = sv.iter().zip(&self.plmap).map(|(s, &r)| s * sol.psi[r]).sum();
        }
        Ok(())
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let gv = self.gvec(sol.t);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;

            let mut pl = 0.0;
            let mut gpl = [0.0; 3];
            for m in 0..nv {
                let ym = sol.y[self.plmap[m]];
                pl += sc.s[m] * ym;
                for i in 0..self.ndim {
                    gpl[i] += sc.g[m][i] * ym;
                }
            }
            let co = self.mdl.liq_coefs(pl);

            // ρl·wl = krl · K_l_sat · (ρl·g − ∇pl)
            let mut rlw = [0.0; 3];
            for i in 0..self.ndim {
                for j in 0..self.ndim {
                    rlw[i] += co.krl * self.mdl.kl_sat[i][j] * (co.rho_l * gv[j] - gpl[j]);
                }
            }
            let dpldt = if sol.steady { 0.0 } else { sol.dcs.beta1 * pl - self.psl_star[idx] };

            for m in 0..nv {
                let r = self.plmap[m];
                fb[r] -= coef * sc.s[m] * co.cpl * dpldt;
                for i in 0..self.ndim {
                    fb[r] += coef * sc.g[m][i] * rlw[i];
                }
            }
        }

        self.add_seep_to_rhs(fb, sol)?;
        self.add_flux_to_rhs(fb, sol)?;
        Ok(())
    }

    fn add_seep_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        for sf in &self.seep_faces {
            let fverts = self.shape.face_verts(sf.face);
            for (k, fip) in self.fips.iter().enumerate() {
                sc.calc_at_face_ip(&self.x, fip, sf.face)?;
                let coef = fip.w * norm3(&sc.fnvec);

                let mut pl = 0.0;
                let mut fl = 0.0;
                for (a, &lv) in fverts.iter().enumerate() {
                    pl += sc.sf[a] * sol.y[self.plmap[lv]];
                    if let Some(feq) = self.fl_of_lv[lv] {
                        fl += sc.sf[a] * sol.y[feq];
                    }
                }
                let plmax = (sf.plmax_ini[k] - sf.shift.f(sol.t, &[])).max(0.0);
                let g = pl - plmax;
                let rmp = sf.ramp.eval(fl + sf.kappa * g);
                let rho_l = self.mdl.liq.rho(pl);
                let rx = rho_l * rmp;
                let rf = fl - rmp;

                for (a, &lv) in fverts.iter().enumerate() {
                    fb[self.plmap[lv]] -= coef * sc.sf[a] * rx;
                    if let Some(feq) = self.fl_of_lv[lv] {
                        fb[feq] -= coef * sc.sf[a] * rf;
                    }
                }
            }
        }
        Ok(())
    }

    fn add_flux_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        for (face, f) in &self.flux_faces {
            let fverts = self.shape.face_verts(*face);
            let ql = f.f(sol.t, &[]);
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, *face)?;
                let coef = fip.w * norm3(&sc.fnvec);
                // node-extrapolated density converts volume to mass flux;
                // the model value stands in before the first extrapolation
                let mut rho_l = 0.0;
                let mut pl = 0.0;
                for (a, &lv) in fverts.iter().enumerate() {
                    let vid = self.verts[lv];
                    pl += sc.sf[a] * sol.y[self.plmap[lv]];
                    if sol.cnt[vid] > 0 {
                        rho_l += sc.sf[a] * sol.ext_avg(vid, 0);
                    }
                }
                if rho_l == 0.0 {
                    rho_l = self.mdl.liq.rho(pl);
                }
                for (a, &lv) in fverts.iter().enumerate() {
                    fb[self.plmap[lv]] += coef * sc.sf[a] * rho_l * ql;
                }
            }
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, _first_it: bool) -> Result<()> {
        let nv = self.shape.nverts();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let gv = self.gvec(sol.t);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;

            let mut pl = 0.0;
            let mut gpl = [0.0; 3];
            for m in 0..nv {
                let ym = sol.y[self.plmap[m]];
                pl += sc.s[m] * ym;
                for i in 0..self.ndim {
                    gpl[i] += sc.g[m][i] * ym;
                }
            }
            let co = self.mdl.liq_coefs(pl);
            let dpldt = if sol.steady { 0.0 } else { sol.dcs.beta1 * pl - self.psl_star[idx] };

            for m in 0..nv {
                for n in 0..nv {
                    let mut v = 0.0;
                    if !sol.steady {
                        v += coef
                            * sc.s[m]
                            * sc.s[n]
                            * (co.dcpl_dpl * dpldt + co.cpl * sol.dcs.beta1);
                    }
                    // conductivity block: ∂(ρl·wl)/∂pl
                    for i in 0..self.ndim {
                        for j in 0..self.ndim {
                            let darcy = co.rho_l * gv[j] - gpl[j];
                            v -= coef
                                * sc.g[m][i]
                                * self.mdl.kl_sat[i][j]
                                * (co.dkrl_dpl * sc.s[n] * darcy
                                    + co.krl * (co.drhol_dpl * sc.s[n] * gv[j] - sc.g[n][j]));
                        }
                    }
                    kb.put(self.plmap[m], self.plmap[n], v);
                }
            }
        }

        self.add_seep_to_kb(kb, sol)?;
        Ok(())
    }

    fn add_seep_to_kb(&self, kb: &mut Triplet, sol: &Solution) -> Result<()> {
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        for sf in &self.seep_faces {
            let fverts = self.shape.face_verts(sf.face);
            for (k, fip) in self.fips.iter().enumerate() {
                sc.calc_at_face_ip(&self.x, fip, sf.face)?;
                let coef = fip.w * norm3(&sc.fnvec);

                let mut pl = 0.0;
                let mut fl = 0.0;
                for (a, &lv) in fverts.iter().enumerate() {
                    pl += sc.sf[a] * sol.y[self.plmap[lv]];
                    if let Some(feq) = self.fl_of_lv[lv] {
                        fl += sc.sf[a] * sol.y[feq];
                    }
                }
                let plmax = (sf.plmax_ini[k] - sf.shift.f(sol.t, &[])).max(0.0);
                let g = pl - plmax;
                let rmp = sf.ramp.eval(fl + sf.kappa * g);
                let drmp = sf.ramp.deriv(fl + sf.kappa * g);
                let rho_l = self.mdl.liq.rho(pl);
                let cl = self.mdl.liq.cc;

                // drx/dpl carries the density coupling dρl/dpl·ramp
                let drxdpl = rho_l * sf.kappa * drmp + cl * rmp;
                let drxdfl = rho_l * drmp;
                let drfdpl = -sf.kappa * drmp;
                let drfdfl = 1.0 - drmp;

                for (a, &lva) in fverts.iter().enumerate() {
                    for (b, &lvb) in fverts.iter().enumerate() {
                        let w = coef * sc.sf[a] * sc.sf[b];
                        kb.put(self.plmap[lva], self.plmap[lvb], w * drxdpl);
                        if let Some(feqb) = self.fl_of_lv[lvb] {
                            kb.put(self.plmap[lva], feqb, w * drxdfl);
                        }
                        if let Some(feqa) = self.fl_of_lv[lva] {
                            kb.put(feqa, self.plmap[lvb], w * drfdpl);
                            if let Some(feqb) = self.fl_of_lv[lvb] {
                                kb.put(feqa, feqb, w * drfdfl);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn update(&mut self, sol: &Solution) -> Result<()> {
        for (idx, sv) in self.sips.iter().enumerate() {
            let pl = self.pl_at(sol, sv);
            let co = self.mdl.liq_coefs(pl);
            if !(co.sl.is_finite() && co.rho_l.is_finite()) {
                return Err(SolverError::Constitutive {
                    cid: self.cid,
                    ip: idx,
                    reason: format!("retention update produced invalid state at pl = {pl}"),
                });
            }
            let st = &mut self.states[idx];
            st.pl = pl;
            st.sl = co.sl;
            st.rho_l = co.rho_l;
        }
        Ok(())
    }

    pub fn set_ini_ivs(
        &mut self,
        sol: &Solution,
        ivs: Option<&HashMap<String, Vec<f64>>>,
    ) -> Result<()> {
        let nip = self.ips.len();
        self.states = (0..nip)
            .map(|idx| {
                let pl = match ivs.and_then(|m| m.get("pl")) {
                    Some(v) => v[idx],
                    None => self.pl_at(sol, &self.sips[idx]),
                };
                let co = self.mdl.liq_coefs(pl);
                StateLiquid { pl, sl: co.sl, rho_l: co.rho_l, ns0: self.mdl.nf0 }
            })
            .collect();
        self.states_bkp = self.states.clone();
        self.states_aux = self.states.clone();

        // capture the initial free-surface limit pressure at the face ips
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let fips = self.fips.clone();
        for sfi in 0..self.seep_faces.len() {
            let face = self.seep_faces[sfi].face;
            let fverts = self.shape.face_verts(face);
            for (k, fip) in fips.iter().enumerate() {
                sc.calc_at_face_ip(&self.x, fip, face)?;
                let mut pl = 0.0;
                for (a, &lv) in fverts.iter().enumerate() {
                    pl += sc.sf[a] * sol.y[self.plmap[lv]];
                }
                self.seep_faces[sfi].plmax_ini[k] = pl.max(0.0);
            }
        }
        Ok(())
    }

    pub fn backup_ivs(&mut self, aux: bool) -> Result<()> {
        if aux {
            self.states_aux = self.states.clone();
        } else {
            self.states_bkp = self.states.clone();
        }
        Ok(())
    }

    pub fn restore_ivs(&mut self, aux: bool) -> Result<()> {
        let src = if aux { &self.states_aux } else { &self.states_bkp };
        if src.len() != self.states.len() {
            return Err(SolverError::Restart(format!(
                "cell {}: backup holds {} states but the element has {}",
                self.cid,
                src.len(),
                self.states.len()
            )));
        }
        self.states = src.clone();
        Ok(())
    }

    pub fn add_to_ext(&self, sol: &mut Solution) -> Result<()> {
        let nv = self.shape.nverts();
        for m in 0..nv {
            let mut rho_v = 0.0;
            for (k, sv) in self.sips.iter().enumerate() {
                let pl = self.pl_at(sol, sv);
                rho_v += self.emat[(m, k)] * self.mdl.liq.rho(pl);
            }
            sol.add_ext(self.verts[m], &[rho_v]);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        let plmax: Vec<Vec<f64>> = self.seep_faces.iter().map(|sf| sf.plmax_ini.clone()).collect();
        Ok(serde_json::json!({ "states": self.states, "plmax": plmax }))
    }

    pub fn decode(&mut self, v: &serde_json::Value) -> Result<()> {
        let states: Vec<StateLiquid> = serde_json::from_value(v["states"].clone())?;
        if states.len() != self.ips.len() {
            return Err(SolverError::Restart(format!(
                "cell {}: encoded {} states but the element has {} ips",
                self.cid,
                states.len(),
                self.ips.len()
            )));
        }
        let plmax: Vec<Vec<f64>> = serde_json::from_value(v["plmax"].clone())?;
        if plmax.len() != self.seep_faces.len() {
            return Err(SolverError::Restart(format!(
                "cell {}: encoded {} seep faces but the element has {}",
                self.cid,
                plmax.len(),
                self.seep_faces.len()
            )));
        }
        for (sf, pm) in self.seep_faces.iter_mut().zip(plmax) {
            sf.plmax_ini = pm;
        }
        self.states = states.clone();
        self.states_bkp = states.clone();
        self.states_aux = states;
        Ok(())
    }

    pub fn nnz_estimate(&self) -> usize {
        let n = self.shape.nverts() + self.seep_verts.len();
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        self.xips.clone()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        if self.ndim == 3 {
            vec!["pl", "sl", "nwlx", "nwly", "nwlz"]
        } else {
            vec!["pl", "sl", "nwlx", "nwly"]
        }
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let nip = self.ips.len();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let gv = self.gvec(sol.t);
        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let mut pl = 0.0;
            let mut gpl = [0.0; 3];
            for m in 0..nv {
                let ym = sol.y[self.plmap[m]];
                pl += sc.s[m] * ym;
                for i in 0..self.ndim {
                    gpl[i] += sc.g[m][i] * ym;
                }
            }
            let co = self.mdl.liq_coefs(pl);
            map.set("pl", idx, nip, pl);
            map.set("sl", idx, nip, co.sl);
            let keys = ["nwlx", "nwly", "nwlz"];
            for i in 0..self.ndim {
                let mut rlw = 0.0;
                for j in 0..self.ndim {
                    rlw += co.krl * self.mdl.kl_sat[i][j] * (co.rho_l * gv[j] - gpl[j]);
                }
                map.set(keys[i], idx, nip, rlw / co.rho_l);
            }
        }
        Ok(())
    }
}

fn norm3(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testutil;
    use pfem_model::materials::{Fluid, Material, MaterialModel, Retention};
    use pfem_model::{FuncRegistry, MatRegistry, Mesh};

    fn porous_mat() -> Material {
        Material {
            name: "soil".to_string(),
            model: MaterialModel::Porous(Porous::isotropic(
                0.3,
                2700.0,
                1e-3,
                1e-2,
                Retention::BrooksCorey { lambda: 1.5, pc_ae: 2.0, sl_min: 0.05, sl_max: 0.95 },
                Fluid { rho0: 1.0, p0: 0.0, cc: 1e-4 },
                Fluid { rho0: 0.0012, p0: 0.0, cc: 1.2e-5 },
            )),
        }
    }

    fn build(seep: bool) -> (ElemKind, usize) {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.add_vert(0, vec![x, y]);
        }
        let cid = mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();
        if seep {
            // smooth ramp keeps the constraint differentiable for the
            // finite-difference check
            mesh.set_face_cond(cid, "seep", 1, "", "!sramp !beta:10 !kappa:2");
        }
        let mut mats = MatRegistry::new();
        mats.insert(porous_mat());
        let mut funcs = FuncRegistry::new();
        funcs.insert("grav", Func::Cte { c: 10.0 });
        let edata = testutil::edata("liquid", "soil");
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();

        // pl on eqs 0..4; fl on eqs 4..6 (local verts 1 and 2)
        let eqs: Vec<Vec<usize>> = (0..4).map(|i| vec![i]).collect();
        let dual: Vec<usize> = if seep { vec![4, 5] } else { vec![] };
        elem.set_eqs(&eqs, &dual).unwrap();
        elem.set_ele_conds("g", Func::Cte { c: 10.0 }, "").unwrap();
        let ny = if seep { 6 } else { 4 };
        (elem, ny)
    }

    fn unsaturated_state(sol: &mut Solution) {
        // pc = -pl well beyond the air-entry value keeps the retention
        // curve on its smooth desaturating branch
        for (i, v) in [-8.0, -7.0, -6.5, -7.5].iter().enumerate() {
            sol.y[i] = *v;
            sol.psi[i] = 0.9 * v;
        }
    }

    #[test]
    fn tangent_matches_finite_difference_steady() {
        let (elem, ny) = build(false);
        let mut sol = Solution::new(ny, 0, 4);
        sol.steady = true;
        unsaturated_state(&mut sol);
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn tangent_matches_finite_difference_transient() {
        let (mut elem, ny) = build(false);
        let mut sol = Solution::new(ny, 0, 4);
        sol.dcs.beta1 = 25.0;
        unsaturated_state(&mut sol);
        elem.interp_star_vars(&sol).unwrap();
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn tangent_matches_finite_difference_with_seep_face() {
        let (mut elem, ny) = build(true);
        let mut sol = Solution::new(ny, 0, 4);
        sol.dcs.beta1 = 25.0;
        unsaturated_state(&mut sol);
        sol.y[4] = 0.4;
        sol.y[5] = 0.1;
        if let ElemKind::Liquid(e) = &mut elem {
            e.set_ini_ivs(&sol, None).unwrap();
        }
        elem.interp_star_vars(&sol).unwrap();
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn seep_face_active_regime_consistency() {
        // at a face ip with pl just below plmax and fl > 0, the ramp
        // output equals fl, rx reduces to rho_l*fl and rf vanishes
        let ramp = Ramp::Macaulay;
        let kappa = 1.0;
        let (plmax, fl) = (5.0, 0.3);
        let pl = plmax - 1e-13;
        let g = pl - plmax;
        let rmp = ramp.eval(fl + kappa * g);
        let rho_l = 1.0 + 1e-4 * pl;
        assert!((rmp - fl).abs() < 1e-12);
        assert!((rho_l * rmp - rho_l * fl).abs() < 1e-12);
        assert!((fl - rmp).abs() < 1e-12);
    }

    #[test]
    fn hydrostatic_profile_gives_zero_flow_residual() {
        // with pl matching the hydrostatic profile of the (incompressible)
        // liquid, rho_l*g - grad(pl) = 0 and the steady residual vanishes
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.add_vert(0, vec![x, y]);
        }
        let cid = mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();
        let mut mats = MatRegistry::new();
        mats.insert(Material {
            name: "soil".to_string(),
            model: MaterialModel::Porous(Porous::isotropic(
                0.3,
                2700.0,
                1e-3,
                1e-2,
                Retention::BrooksCorey { lambda: 1.5, pc_ae: 2.0, sl_min: 0.05, sl_max: 0.95 },
                Fluid { rho0: 2.0, p0: 0.0, cc: 0.0 },
                Fluid { rho0: 0.0012, p0: 0.0, cc: 1.2e-5 },
            )),
        });
        let funcs = FuncRegistry::new();
        let edata = testutil::edata("liquid", "soil");
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();
        let eqs: Vec<Vec<usize>> = (0..4).map(|i| vec![i]).collect();
        elem.set_eqs(&eqs, &[]).unwrap();
        elem.set_ele_conds("g", Func::Cte { c: 10.0 }, "").unwrap();

        let mut sol = Solution::new(4, 0, 4);
        sol.steady = true;
        // pl = rho*g*(zwater - z) with zwater = 1: dpl/dz = -rho*g
        for (i, z) in [0.0, 0.0, 1.0, 1.0].iter().enumerate() {
            sol.y[i] = 2.0 * 10.0 * (1.0 - z);
        }
        let fb = testutil::rhs_of(&elem, &sol, 4);
        for v in fb.iter() {
            assert!(v.abs() < 1e-12, "residual {v}");
        }
    }

    #[test]
    fn state_update_and_backup_invariant() {
        let (mut elem, ny) = build(false);
        let mut sol = Solution::new(ny, 0, 4);
        unsaturated_state(&mut sol);
        elem.set_ini_ivs(&sol, None).unwrap();
        sol.y[0] = -9.0;
        elem.update(&sol).unwrap();
        elem.backup_ivs(false).unwrap();
        if let ElemKind::Liquid(e) = &elem {
            assert_eq!(e.states, e.states_bkp);
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let (mut elem, ny) = build(false);
        let sol = Solution::new(ny, 0, 4);
        elem.set_ini_ivs(&sol, None).unwrap();
        let blob = elem.encode().unwrap();
        let states_before = match &elem {
            ElemKind::Liquid(e) => e.states.clone(),
            _ => unreachable!(),
        };
        let (mut other, _) = build(false);
        other.decode(&blob).unwrap();
        if let ElemKind::Liquid(e) = &other {
            assert_eq!(e.states, states_before);
        }
    }
}
