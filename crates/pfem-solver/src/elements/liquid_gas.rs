//! Two-phase liquid–gas seepage element.
//!
//! DOFs (pl, pg) per node; pc = pg − pl drives the retention curve. The
//! two mass balances share the generalized storage coefficients
//! (Cpl, Cpg, Dpl, Dpg) and produce a 2×2 block-coupled tangent:
//!
//! ```text
//! Cpl·dpl/dt + Cpg·dpg/dt + div(ρl·wl) = 0
//! Dpl·dpl/dt + Dpg·dpg/dt + div(ρg·wg) = 0
//! ```
//!
//! "seep" faces act on the liquid equations exactly as in the
//! single-liquid element.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::elements::liquid::SeepFace;
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
pub struct StateLiquidGas {
    pub pl: f64,
    pub pg: f64,
    pub sl: f64,
    pub rho_l: f64,
    pub rho_g: f64,
    pub ns0: f64,
}

pub fn info(cell: &Cell, fcs: &[FaceCond], _edata: &ElemData, _ndim: usize) -> Result<Info> {
    let mut inf = Info::new();
    inf.dofs = vec![vec!["pl".to_string(), "pg".to_string()]; cell.shape.nverts()];
    for &lv in &dual_face_verts(cell, fcs, "seep") {
        inf.dofs[lv].push("fl".to_string());
    }
    inf.y2f = vec![("pl".to_string(), "ql".to_string()), ("pg".to_string(), "qg".to_string())];
    inf.t1 = vec!["pl".to_string(), "pg".to_string()];
    inf.nextrap = 2; // rho_l, rho_g
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
            "ql" => flux_faces.push((fc.face, ctx.funcs.get(&fc.func)?, Phase::Liquid)),
            "qg" => flux_faces.push((fc.face, ctx.funcs.get(&fc.func)?, Phase::Gas)),
            other => {
                return Err(SolverError::Input(format!(
                    "cell {}: liquid-gas does not support face condition '{other}'",
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

    Ok(ElemKind::LiquidGas(ElemLiquidGas {
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
        pgmap: Vec::new(),
        fl_of_lv: Vec::new(),
        seep_verts,
        seep_faces,
        flux_faces,
        mdl,
        grav: None,
        psl_star: vec![0.0; nip],
        psg_star: vec![0.0; nip],
        states: Vec::new(),
        states_bkp: Vec::new(),
        states_aux: Vec::new(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Liquid,
    Gas,
}

/// Two-phase seepage element
#[derive(Debug)]
pub struct ElemLiquidGas {
    pub cid: usize,
    ndim: usize,
    shape: ShapeKind,
    x: DMatrix<f64>,
    verts: Vec<usize>,
    ips: Vec<Ip>,
    fips: Vec<Ip>,
    xips: Vec<Vec<f64>>,
    sips: Vec<Vec<f64>>,
    emat: DMatrix<f64>,
    pub plmap: Vec<usize>,
    pub pgmap: Vec<usize>,
    fl_of_lv: Vec<Option<usize>>,
    seep_verts: Vec<usize>,
    seep_faces: Vec<SeepFace>,
    flux_faces: Vec<(usize, Func, Phase)>,
    mdl: Porous,
    grav: Option<Func>,
    psl_star: Vec<f64>,
    psg_star: Vec<f64>,
    pub states: Vec<StateLiquidGas>,
    pub states_bkp: Vec<StateLiquidGas>,
    pub states_aux: Vec<StateLiquidGas>,
}

impl ElemLiquidGas {
    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], dual: &[usize]) -> Result<()> {
        let nv = self.shape.nverts();
        if eqs.len() != nv || dual.len() != self.seep_verts.len() {
            return Err(SolverError::Input(format!(
                "cell {}: equation groups do not match the element layout",
                self.cid
            )));
        }
        self.plmap = eqs.iter().map(|g| g[0]).collect();
        self.pgmap = eqs.iter().map(|g| g[1]).collect();
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
                "cell {}: liquid-gas does not support element condition '{other}'",
                self.cid
            ))),
        }
    }

    fn gvec(&self, t: f64) -> [f64; 3] {
        let mut g = [0.0; 3];
        if let Some(f) = &self.grav {
            g[self.ndim - 1] = -f.f(t, &[]);
        }
        g
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        for (idx, sv) in self.sips.iter().enumerate() {
            self.psl_star[idx] = sv.iter().zip(&self.plmap).map(|(s, &r)| s * sol.psi[r]).sum();
            self.psg_star[idx] = sv.iter().zip(&self.pgmap).map(|(s, &r)| s * sol.psi[r]).sum();
        }
        Ok(())
    }

    /// (pl, pg, ∇pl, ∇pg) at the current scratch point
    fn fields_at(&self, sol: &Solution, sc: &ShapeScratch) -> (f64, f64, [f64; 3], [f64; 3]) {
        let nv = self.shape.nverts();
        let (mut pl, mut pg) = (0.0, 0.0);
        let mut gpl = [0.0; 3];
        let mut gpg = [0.0; 3];
        for m in 0..nv {
            let yl = sol.y[self.plmap[m]];
            let yg = sol.y[self.pgmap[m]];
            pl += sc.s[m] * yl;
            pg += sc.s[m] * yg;
            for i in 0..self.ndim {
                gpl[i] += sc.g[m][i] * yl;
                gpg[i] += sc.g[m][i] * yg;
            }
        }
        (pl, pg, gpl, gpg)
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let gv = self.gvec(sol.t);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;
            let (pl, pg, gpl, gpg) = self.fields_at(sol, &sc);
            let co = self.mdl.lgs_coefs(pl, pg);

            let mut rlw = [0.0; 3];
            let mut rgw = [0.0; 3];
            for i in 0..self.ndim {
                for j in 0..self.ndim {
                    rlw[i] += co.krl * self.mdl.kl_sat[i][j] * (co.rho_l * gv[j] - gpl[j]);
                    rgw[i] += co.krg * self.mdl.kg_sat[i][j] * (co.rho_g * gv[j] - gpg[j]);
                }
            }
            let (dl, dg) = if sol.steady {
                (0.0, 0.0)
            } else {
                (
                    sol.dcs.beta1 * pl - self.psl_star[idx],
                    sol.dcs.beta1 * pg - self.psg_star[idx],
                )
            };

            for m in 0..nv {
                let rl = self.plmap[m];
                let rg = self.pgmap[m];
                fb[rl] -= coef * sc.s[m] * (co.cpl * dl + co.cpg * dg);
                fb[rg] -= coef * sc.s[m] * (co.dpl * dl + co.dpg * dg);
                for i in 0..self.ndim {
                    fb[rl] += coef * sc.g[m][i] * rlw[i];
                    fb[rg] += coef * sc.g[m][i] * rgw[i];
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

                for (a, &lv) in fverts.iter().enumerate() {
                    fb[self.plmap[lv]] -= coef * sc.sf[a] * rho_l * rmp;
                    if let Some(feq) = self.fl_of_lv[lv] {
                        fb[feq] -= coef * sc.sf[a] * (fl - rmp);
                    }
                }
            }
        }
        Ok(())
    }

    fn add_flux_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        for (face, f, phase) in &self.flux_faces {
            let fverts = self.shape.face_verts(*face);
            let q = f.f(sol.t, &[]);
            let (pmap, comp) = match phase {
                Phase::Liquid => (&self.plmap, 0),
                Phase::Gas => (&self.pgmap, 1),
            };
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, *face)?;
                let coef = fip.w * norm3(&sc.fnvec);
                let mut rho = 0.0;
                let mut p = 0.0;
                for (a, &lv) in fverts.iter().enumerate() {
                    let vid = self.verts[lv];
                    p += sc.sf[a] * sol.y[pmap[lv]];
                    if sol.cnt[vid] > 0 {
                        rho += sc.sf[a] * sol.ext_avg(vid, comp);
                    }
                }
                if rho == 0.0 {
                    rho = match phase {
                        Phase::Liquid => self.mdl.liq.rho(p),
                        Phase::Gas => self.mdl.gas.rho(p),
                    };
                }
                for (a, &lv) in fverts.iter().enumerate() {
                    fb[pmap[lv]] += coef * sc.sf[a] * rho * q;
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
            let (pl, pg, gpl, gpg) = self.fields_at(sol, &sc);
            let co = self.mdl.lgs_coefs(pl, pg);
            let (dl, dg) = if sol.steady {
                (0.0, 0.0)
            } else {
                (
                    sol.dcs.beta1 * pl - self.psl_star[idx],
                    sol.dcs.beta1 * pg - self.psg_star[idx],
                )
            };
            let b1 = if sol.steady { 0.0 } else { sol.dcs.beta1 };

            for m in 0..nv {
                for n in 0..nv {
                    let ss = coef * sc.s[m] * sc.s[n];
                    let mut kll = ss * (co.dcpl_dpl * dl + co.dcpg_dpl * dg + co.cpl * b1);
                    let mut klg = ss * (co.dcpl_dpg * dl + co.dcpg_dpg * dg + co.cpg * b1);
                    let mut kgl = ss * (co.ddpl_dpl * dl + co.ddpg_dpl * dg + co.dpl * b1);
                    let mut kgg = ss * (co.ddpl_dpg * dl + co.ddpg_dpg * dg + co.dpg * b1);

                    for i in 0..self.ndim {
                        for j in 0..self.ndim {
                            let darcy_l = co.rho_l * gv[j] - gpl[j];
                            let darcy_g = co.rho_g * gv[j] - gpg[j];
                            let gl = coef * sc.g[m][i] * self.mdl.kl_sat[i][j];
                            let gg = coef * sc.g[m][i] * self.mdl.kg_sat[i][j];
                            kll -= gl
                                * (co.dkrl_dpl * sc.s[n] * darcy_l
                                    + co.krl * (co.drhol_dpl * sc.s[n] * gv[j] - sc.g[n][j]));
                            klg -= gl * co.dkrl_dpg * sc.s[n] * darcy_l;
                            kgl -= gg * co.dkrg_dpl * sc.s[n] * darcy_g;
                            kgg -= gg
                                * (co.dkrg_dpg * sc.s[n] * darcy_g
                                    + co.krg * (co.drhog_dpg * sc.s[n] * gv[j] - sc.g[n][j]));
                        }
                    }
                    kb.put(self.plmap[m], self.plmap[n], kll);
                    kb.put(self.plmap[m], self.pgmap[n], klg);
                    kb.put(self.pgmap[m], self.plmap[n], kgl);
                    kb.put(self.pgmap[m], self.pgmap[n], kgg);
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
            let pl: f64 = sv.iter().zip(&self.plmap).map(|(s, &r)| s * sol.y[r]).sum();
            let pg: f64 = sv.iter().zip(&self.pgmap).map(|(s, &r)| s * sol.y[r]).sum();
            let co = self.mdl.lgs_coefs(pl, pg);
            if !(co.sl.is_finite() && co.rho_l.is_finite() && co.rho_g.is_finite()) {
                return Err(SolverError::Constitutive {
                    cid: self.cid,
                    ip: idx,
                    reason: format!("retention update produced invalid state at pc = {}", co.pc),
                });
            }
            let st = &mut self.states[idx];
            st.pl = pl;
            st.pg = pg;
            st.sl = co.sl;
            st.rho_l = co.rho_l;
            st.rho_g = co.rho_g;
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
                let sv = &self.sips[idx];
                let pl = match ivs.and_then(|m| m.get("pl")) {
                    Some(v) => v[idx],
                    None => sv.iter().zip(&self.plmap).map(|(s, &r)| s * sol.y[r]).sum(),
                };
                let pg = match ivs.and_then(|m| m.get("pg")) {
                    Some(v) => v[idx],
                    None => sv.iter().zip(&self.pgmap).map(|(s, &r)| s * sol.y[r]).sum(),
                };
                let co = self.mdl.lgs_coefs(pl, pg);
                StateLiquidGas {
                    pl,
                    pg,
                    sl: co.sl,
                    rho_l: co.rho_l,
                    rho_g: co.rho_g,
                    ns0: self.mdl.nf0,
                }
            })
            .collect();
        self.states_bkp = self.states.clone();
        self.states_aux = self.states.clone();

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
            let mut rho_l = 0.0;
            let mut rho_g = 0.0;
            for (k, sv) in self.sips.iter().enumerate() {
                let pl: f64 = sv.iter().zip(&self.plmap).map(|(s, &r)| s * sol.y[r]).sum();
                let pg: f64 = sv.iter().zip(&self.pgmap).map(|(s, &r)| s * sol.y[r]).sum();
                rho_l += self.emat[(m, k)] * self.mdl.liq.rho(pl);
                rho_g += self.emat[(m, k)] * self.mdl.gas.rho(pg);
            }
            sol.add_ext(self.verts[m], &[rho_l, rho_g]);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        let plmax: Vec<Vec<f64>> = self.seep_faces.iter().map(|sf| sf.plmax_ini.clone()).collect();
        Ok(serde_json::json!({ "states": self.states, "plmax": plmax }))
    }

    pub fn decode(&mut self, v: &serde_json::Value) -> Result<()> {
        let states: Vec<StateLiquidGas> = serde_json::from_value(v["states"].clone())?;
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
        let n = 2 * self.shape.nverts() + self.seep_verts.len();
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        self.xips.clone()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        if self.ndim == 3 {
            vec!["pl", "pg", "sl", "nwlx", "nwly", "nwlz", "nwgx", "nwgy", "nwgz"]
        } else {
            vec!["pl", "pg", "sl", "nwlx", "nwly", "nwgx", "nwgy"]
        }
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, sol: &Solution) -> Result<()> {
        let nip = self.ips.len();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let gv = self.gvec(sol.t);
        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let (pl, pg, gpl, gpg) = self.fields_at(sol, &sc);
            let co = self.mdl.lgs_coefs(pl, pg);
            map.set("pl", idx, nip, pl);
            map.set("pg", idx, nip, pg);
            map.set("sl", idx, nip, co.sl);
            let lkeys = ["nwlx", "nwly", "nwlz"];
            let gkeys = ["nwgx", "nwgy", "nwgz"];
            for i in 0..self.ndim {
                let mut rlw = 0.0;
                let mut rgw = 0.0;
                for j in 0..self.ndim {
                    rlw += co.krl * self.mdl.kl_sat[i][j] * (co.rho_l * gv[j] - gpl[j]);
                    rgw += co.krg * self.mdl.kg_sat[i][j] * (co.rho_g * gv[j] - gpg[j]);
                }
                map.set(lkeys[i], idx, nip, rlw / co.rho_l);
                if co.rho_g.abs() > 1e-14 {
                    map.set(gkeys[i], idx, nip, rgw / co.rho_g);
                }
            }
        }
        Ok(())
    }
}

fn norm3(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
