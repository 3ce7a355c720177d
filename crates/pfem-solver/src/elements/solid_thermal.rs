//! Coupled solid–thermal element.
//!
//! DOFs: displacements plus temperature. Two sub-models are carried, a
//! small-strain solid and a thermal record, coupled through the thermal
//! expansion vector b = D·m̂·α_T in the momentum balance and an
//! α4-weighted velocity divergence in the heat balance:
//!
//! ```text
//! σ = σ_mech − b·ΔT
//! ρc·dT/dt + tc·div(du/dt) + div(−k·∇T) = 0
//! ```
//!
//! Convective faces: "qc" contributes h·(T − t∞(t)) to the residual and
//! h·Sf·Sf to Ktt; "qcm" adds an fl dual surface flux with the same
//! ramp/lagrange structure as the seepage face, producing the Ktc, Kct
//! and Kcc blocks.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::elements::{at_ip, dual_face_verts, ukeys, ElemCtx, ElemKind, Info, Ramp, SQ2};
use crate::error::{Result, SolverError};
use crate::ips::{Ip, IpsMap};
use crate::lin_solver::Triplet;
use crate::shapes::{get_ips, shape_values, ShapeScratch};
use crate::solution::Solution;
use pfem_model::materials::{LinElast, Thermal};
use pfem_model::sim::keycode_f64;
use pfem_model::{Cell, ElemData, FaceCond, Func, ShapeKind};

/// Per-ip internal variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSolidThermal {
    /// Stress in Mandel packing
    pub sig: Vec<f64>,
    /// Converged temperature
    pub temp: f64,
}

#[derive(Debug)]
struct ConvFace {
    face: usize,
    /// Ambient (or limit) temperature over time
    tfun: Func,
    /// Film coefficient
    h: f64,
    /// Dual-variable coupling ("qcm"), with ramp and penalty
    dual: Option<(Ramp, f64)>,
}

pub fn info(cell: &Cell, fcs: &[FaceCond], _edata: &ElemData, ndim: usize) -> Result<Info> {
    let keys: Vec<String> = ukeys(ndim).iter().map(|s| s.to_string()).collect();
    let mut inf = Info::new();
    inf.dofs = vec![keys.clone(); cell.shape.nverts()];
    for dofs in inf.dofs.iter_mut() {
        dofs.push("temp".to_string());
    }
    for &lv in &dual_face_verts(cell, fcs, "qcm") {
        inf.dofs[lv].push("fl".to_string());
    }
    inf.y2f = vec![
        ("ux".to_string(), "fx".to_string()),
        ("uy".to_string(), "fy".to_string()),
        ("uz".to_string(), "fz".to_string()),
        ("temp".to_string(), "q".to_string()),
    ];
    inf.t1 = vec!["temp".to_string()];
    inf.t2 = keys;
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    let sld = ctx.mats.get_solid(&ctx.edata.mat)?;
    let thm = ctx.mats.get_thermal(&ctx.edata.mat_extra)?;
    let (ips, fips) = get_ips(ctx.cell.shape, ctx.edata.nip, ctx.edata.nip_face)?;

    let dual_verts = dual_face_verts(ctx.cell, &ctx.face_conds, "qcm");
    let mut conv_faces = Vec::new();
    for fc in &ctx.face_conds {
        match fc.key.as_str() {
            "qc" => conv_faces.push(ConvFace {
                face: fc.face,
                tfun: ctx.funcs.get(&fc.func)?,
                h: keycode_f64(&fc.extra, "h").unwrap_or(1.0),
                dual: None,
            }),
            "qcm" => conv_faces.push(ConvFace {
                face: fc.face,
                tfun: ctx.funcs.get(&fc.func)?,
                h: keycode_f64(&fc.extra, "h").unwrap_or(1.0),
                dual: Some((Ramp::from_extra(&fc.extra), keycode_f64(&fc.extra, "kappa").unwrap_or(1.0))),
            }),
            other => {
                return Err(SolverError::Input(format!(
                    "cell {}: solid-thermal does not support face condition '{other}'",
                    ctx.cell.id
                )));
            }
        }
    }

    let sc = ShapeScratch::new(ctx.cell.shape, ctx.cell.id);
    let xips: Vec<Vec<f64>> = ips.iter().map(|ip| sc.ip_real_coords(&ctx.x, ip)).collect();
    let sips: Vec<Vec<f64>> =
        ips.iter().map(|ip| shape_values(ctx.cell.shape, ip.r, ip.s, ip.t)).collect();
    let nip = ips.len();

    Ok(ElemKind::SolidThermal(ElemSolidThermal {
        cid: ctx.cell.id,
        ndim: ctx.ndim,
        shape: ctx.cell.shape,
        x: ctx.x.clone(),
        ips,
        fips,
        xips,
        sips,
        umap: Vec::new(),
        tmap: Vec::new(),
        fl_of_lv: Vec::new(),
        dual_verts,
        sld,
        thm,
        cdam: keycode_f64(&ctx.edata.extra, "cdam").unwrap_or(0.0),
        grav: None,
        conv_faces,
        pst_star: vec![0.0; nip],
        zs_star: vec![[0.0; 3]; nip],
        xs_star: vec![[0.0; 3]; nip],
        divxs_star: vec![0.0; nip],
        states: Vec::new(),
        states_bkp: Vec::new(),
        states_aux: Vec::new(),
    }))
}

/// Coupled u–T element
#[derive(Debug)]
pub struct ElemSolidThermal {
    pub cid: usize,
    ndim: usize,
    shape: ShapeKind,
    x: DMatrix<f64>,
    ips: Vec<Ip>,
    fips: Vec<Ip>,
    xips: Vec<Vec<f64>>,
    sips: Vec<Vec<f64>>,
    pub umap: Vec<usize>,
    pub tmap: Vec<usize>,
    fl_of_lv: Vec<Option<usize>>,
    dual_verts: Vec<usize>,
    sld: LinElast,
    thm: Thermal,
    cdam: f64,
    grav: Option<Func>,
    conv_faces: Vec<ConvFace>,
    /// Frozen ψT* at ips
    pst_star: Vec<f64>,
    zs_star: Vec<[f64; 3]>,
    xs_star: Vec<[f64; 3]>,
    divxs_star: Vec<f64>,
    pub states: Vec<StateSolidThermal>,
    pub states_bkp: Vec<StateSolidThermal>,
    pub states_aux: Vec<StateSolidThermal>,
}

impl ElemSolidThermal {
    fn ncp(&self) -> usize {
        2 * self.ndim
    }

    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], dual: &[usize]) -> Result<()> {
        let nv = self.shape.nverts();
        if eqs.len() != nv || dual.len() != self.dual_verts.len() {
            return Err(SolverError::Input(format!(
                "cell {}: equation groups do not match the element layout",
                self.cid
            )));
        }
        self.umap.clear();
        self.tmap.clear();
        for g in eqs {
            self.umap.extend_from_slice(&g[..self.ndim]);
            self.tmap.push(g[self.ndim]);
        }
        self.fl_of_lv = vec![None; nv];
        for (k, &lv) in self.dual_verts.iter().enumerate() {
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
                "cell {}: solid-thermal does not support element condition '{other}'",
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

    fn calc_d(&self) -> DMatrix<f64> {
        let ncp = self.ncp();
        let mut d = DMatrix::zeros(ncp, ncp);
        let gsh = self.sld.shear_modulus();
        let la = self.sld.e * self.sld.nu / ((1.0 + self.sld.nu) * (1.0 - 2.0 * self.sld.nu));
        for i in 0..3 {
            for j in 0..3 {
                d[(i, j)] = la;
            }
            d[(i, i)] += 2.0 * gsh;
        }
        for k in 3..ncp {
            d[(k, k)] = 2.0 * gsh;
        }
        d
    }

    /// Thermal stress vector b = D·m̂·α_T (reduces to (3λ+2G)·α_T·m̂)
    fn bvec(&self) -> Vec<f64> {
        let ncp = self.ncp();
        let gsh = self.sld.shear_modulus();
        let la = self.sld.e * self.sld.nu / ((1.0 + self.sld.nu) * (1.0 - 2.0 * self.sld.nu));
        let bcoef = (3.0 * la + 2.0 * gsh) * self.thm.alpha_t;
        let mut b = vec![0.0; ncp];
        for bi in b.iter_mut().take(3) {
            *bi = bcoef;
        }
        b
    }

    fn bmat(&self, sc: &ShapeScratch) -> DMatrix<f64> {
        let nv = self.shape.nverts();
        let ncp = self.ncp();
        let mut b = DMatrix::zeros(ncp, nv * self.ndim);
        for m in 0..nv {
            let c = m * self.ndim;
            let g = &sc.g[m];
            if self.ndim == 2 {
                b[(0, c)] = g[0];
                b[(1, c + 1)] = g[1];
                b[(3, c)] = g[1] / SQ2;
                b[(3, c + 1)] = g[0] / SQ2;
            } else {
                b[(0, c)] = g[0];
                b[(1, c + 1)] = g[1];
                b[(2, c + 2)] = g[2];
                b[(3, c)] = g[1] / SQ2;
                b[(3, c + 1)] = g[0] / SQ2;
                b[(4, c + 1)] = g[2] / SQ2;
                b[(4, c + 2)] = g[1] / SQ2;
                b[(5, c)] = g[2] / SQ2;
                b[(5, c + 2)] = g[0] / SQ2;
            }
        }
        b
    }

    /// Trial stress: committed state + D·Δε − b·ΔT
    fn trial_sig(
        &self,
        idx: usize,
        d: &DMatrix<f64>,
        b: &DMatrix<f64>,
        sol: &Solution,
    ) -> Vec<f64> {
        let nu = self.umap.len();
        let ncp = self.ncp();
        let mut deps = vec![0.0; ncp];
        for i in 0..ncp {
            for k in 0..nu {
                deps[i] += b[(i, k)] * sol.dy[self.umap[k]];
            }
        }
        let dtemp: f64 =
            self.sips[idx].iter().zip(&self.tmap).map(|(s, &r)| s * sol.dy[r]).sum();
        let bv = self.bvec();
        let mut sig = self.states[idx].sig.clone();
        for i in 0..ncp {
            for j in 0..ncp {
                sig[i] += d[(i, j)] * deps[j];
            }
            sig[i] -= bv[i] * dtemp;
        }
        sig
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let ips = self.ips.clone();
        for (idx, ip) in ips.iter().enumerate() {
            self.pst_star[idx] =
                self.sips[idx].iter().zip(&self.tmap).map(|(s, &r)| s * sol.psi[r]).sum();
            let mut zs = [0.0; 3];
            let mut xs = [0.0; 3];
            for m in 0..nv {
                for i in 0..self.ndim {
                    zs[i] += self.sips[idx][m] * sol.zet[self.umap[m * self.ndim + i]];
                    xs[i] += self.sips[idx][m] * sol.chi[self.umap[m * self.ndim + i]];
                }
            }
            self.zs_star[idx] = zs;
            self.xs_star[idx] = xs;
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let mut div = 0.0;
            for m in 0..nv {
                for i in 0..self.ndim {
                    div += sc.g[m][i] * sol.chi[self.umap[m * self.ndim + i]];
                }
            }
            self.divxs_star[idx] = div;
        }
        Ok(())
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let nu = self.umap.len();
        let ncp = self.ncp();
        let d = self.calc_d();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let gv = self.gvec(sol.t);

        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };
        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;
            let b = self.bmat(&sc);
            let sig = self.trial_sig(idx, &d, &b, sol);

            for k in 0..nu {
                let mut f = 0.0;
                for i in 0..ncp {
                    f += b[(i, k)] * sig[i];
                }
                fb[self.umap[k]] -= coef * wf * f;
            }

            if sol.steady {
                if self.grav.is_some() {
                    for m in 0..nv {
                        for i in 0..self.ndim {
                            fb[self.umap[m * self.ndim + i]] +=
                                coef * sc.s[m] * self.sld.rho * gv[i];
                        }
                    }
                }
            } else {
                let mut u = [0.0; 3];
                for m in 0..nv {
                    for i in 0..self.ndim {
                        u[i] += sc.s[m] * sol.y[self.umap[m * self.ndim + i]];
                    }
                }
                let zs = &self.zs_star[idx];
                let xs = &self.xs_star[idx];
                for m in 0..nv {
                    for i in 0..self.ndim {
                        let dyn_i = self.sld.rho * (sol.dcs.a1 * u[i] - zs[i] - gv[i])
                            + self.cdam * (sol.dcs.a7 * u[i] - xs[i]);
                        fb[self.umap[m * self.ndim + i]] -= coef * sc.s[m] * dyn_i;
                    }
                }
            }

            // heat balance
            let mut temp = 0.0;
            let mut gtemp = [0.0; 3];
            for m in 0..nv {
                let tm = sol.y[self.tmap[m]];
                temp += sc.s[m] * tm;
                for i in 0..self.ndim {
                    gtemp[i] += sc.g[m][i] * tm;
                }
            }
            let storage = if sol.steady {
                0.0
            } else {
                let mut divu = 0.0;
                for m in 0..nv {
                    for i in 0..self.ndim {
                        divu += sc.g[m][i] * sol.y[self.umap[m * self.ndim + i]];
                    }
                }
                self.thm.rho_c * (sol.dcs.beta1 * temp - self.pst_star[idx])
                    + self.thm.tc * (sol.dcs.a4 * divu - self.divxs_star[idx])
            };
            for m in 0..nv {
                let r = self.tmap[m];
                fb[r] -= coef * sc.s[m] * storage;
                for i in 0..self.ndim {
                    fb[r] -= coef * sc.g[m][i] * self.thm.kcond * gtemp[i];
                }
            }
        }

        // convective faces
        for cf in &self.conv_faces {
            let fverts = self.shape.face_verts(cf.face);
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, cf.face)?;
                let coef = fip.w * norm3(&sc.fnvec);
                let mut temp = 0.0;
                let mut fl = 0.0;
                for (a, &lv) in fverts.iter().enumerate() {
                    temp += sc.sf[a] * sol.y[self.tmap[lv]];
                    if let Some(feq) = self.fl_of_lv[lv] {
                        fl += sc.sf[a] * sol.y[feq];
                    }
                }
                match &cf.dual {
                    None => {
                        let t_inf = cf.tfun.f(sol.t, &[]);
                        for (a, &lv) in fverts.iter().enumerate() {
                            fb[self.tmap[lv]] -= coef * sc.sf[a] * cf.h * (temp - t_inf);
                        }
                    }
                    Some((ramp, kappa)) => {
                        let tmax = cf.tfun.f(sol.t, &[]);
                        let g = temp - tmax;
                        let rmp = ramp.eval(fl + kappa * g);
                        for (a, &lv) in fverts.iter().enumerate() {
                            fb[self.tmap[lv]] -= coef * sc.sf[a] * cf.h * rmp;
                            if let Some(feq) = self.fl_of_lv[lv] {
                                fb[feq] -= coef * sc.sf[a] * (fl - rmp);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, _first_it: bool) -> Result<()> {
        let nv = self.shape.nverts();
        let nu = self.umap.len();
        let ncp = self.ncp();
        let d = self.calc_d();
        let bv = self.bvec();
        let mut sc = ShapeScratch::new(self.shape, self.cid);

        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };
        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;
            let b = self.bmat(&sc);

            // Kuu
            let k_e = coef * wf * b.transpose() * &d * &b;
            for p in 0..nu {
                for q in 0..nu {
                    kb.put(self.umap[p], self.umap[q], k_e[(p, q)]);
                }
            }
            if !sol.steady {
                let w = coef * (self.sld.rho * sol.dcs.a1 + self.cdam * sol.dcs.a7);
                for m in 0..nv {
                    for n in 0..nv {
                        let v = w * sc.s[m] * sc.s[n];
                        for i in 0..self.ndim {
                            kb.put(self.umap[m * self.ndim + i], self.umap[n * self.ndim + i], v);
                        }
                    }
                }
            }

            // Kut: thermal expansion in the momentum balance
            for k in 0..nu {
                let mut btb = 0.0;
                for i in 0..ncp {
                    btb += b[(i, k)] * bv[i];
                }
                for n in 0..nv {
                    kb.put(self.umap[k], self.tmap[n], -coef * wf * btb * sc.s[n]);
                }
            }

            // Ktu: velocity coupling in the heat balance
            if !sol.steady {
                for m in 0..nv {
                    for n in 0..nv {
                        for j in 0..self.ndim {
                            kb.put(
                                self.tmap[m],
                                self.umap[n * self.ndim + j],
                                coef * sc.s[m] * self.thm.tc * sol.dcs.a4 * sc.g[n][j],
                            );
                        }
                    }
                }
            }

            // Ktt
            let b1 = if sol.steady { 0.0 } else { sol.dcs.beta1 };
            for m in 0..nv {
                for n in 0..nv {
                    let mut v = coef * sc.s[m] * sc.s[n] * self.thm.rho_c * b1;
                    for i in 0..self.ndim {
                        v += coef * sc.g[m][i] * self.thm.kcond * sc.g[n][i];
                    }
                    kb.put(self.tmap[m], self.tmap[n], v);
                }
            }
        }

        // convective face blocks
        for cf in &self.conv_faces {
            let fverts = self.shape.face_verts(cf.face);
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, cf.face)?;
                let coef = fip.w * norm3(&sc.fnvec);
                match &cf.dual {
                    None => {
                        for (a, &lva) in fverts.iter().enumerate() {
                            for (bq, &lvb) in fverts.iter().enumerate() {
                                kb.put(
                                    self.tmap[lva],
                                    self.tmap[lvb],
                                    coef * cf.h * sc.sf[a] * sc.sf[bq],
                                );
                            }
                        }
                    }
                    Some((ramp, kappa)) => {
                        let mut temp = 0.0;
                        let mut fl = 0.0;
                        for (a, &lv) in fverts.iter().enumerate() {
                            temp += sc.sf[a] * sol.y[self.tmap[lv]];
                            if let Some(feq) = self.fl_of_lv[lv] {
                                fl += sc.sf[a] * sol.y[feq];
                            }
                        }
                        let tmax = cf.tfun.f(sol.t, &[]);
                        let drmp = ramp.deriv(fl + kappa * (temp - tmax));
                        let dtt = cf.h * kappa * drmp;
                        let dtc = cf.h * drmp;
                        let dct = -kappa * drmp;
                        let dcc = 1.0 - drmp;
                        for (a, &lva) in fverts.iter().enumerate() {
                            for (bq, &lvb) in fverts.iter().enumerate() {
                                let w = coef * sc.sf[a] * sc.sf[bq];
                                kb.put(self.tmap[lva], self.tmap[lvb], w * dtt);
                                if let Some(feqb) = self.fl_of_lv[lvb] {
                                    kb.put(self.tmap[lva], feqb, w * dtc);
                                }
                                if let Some(feqa) = self.fl_of_lv[lva] {
                                    kb.put(feqa, self.tmap[lvb], w * dct);
                                    if let Some(feqb) = self.fl_of_lv[lvb] {
                                        kb.put(feqa, feqb, w * dcc);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn update(&mut self, sol: &Solution) -> Result<()> {
        let d = self.calc_d();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let ips = self.ips.clone();
        for (idx, ip) in ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let b = self.bmat(&sc);
            let sig = self.trial_sig(idx, &d, &b, sol);
            if sig.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::Constitutive {
                    cid: self.cid,
                    ip: idx,
                    reason: "thermo-mechanical update produced a non-finite stress".to_string(),
                });
            }
            let temp: f64 =
                self.sips[idx].iter().zip(&self.tmap).map(|(s, &r)| s * sol.y[r]).sum();
            let st = &mut self.states[idx];
            st.sig = sig;
            st.temp = temp;
        }
        Ok(())
    }

    pub fn set_ini_ivs(
        &mut self,
        sol: &Solution,
        ivs: Option<&HashMap<String, Vec<f64>>>,
    ) -> Result<()> {
        let nip = self.ips.len();
        let ncp = self.ncp();
        let keys = ["sx", "sy", "sz", "sxy", "syz", "szx"];
        self.states = (0..nip)
            .map(|idx| {
                let mut sig = vec![0.0; ncp];
                if let Some(m) = ivs {
                    for (c, key) in keys.iter().take(ncp).enumerate() {
                        if let Some(v) = m.get(*key) {
                            sig[c] = if c >= 3 { v[idx] * SQ2 } else { v[idx] };
                        }
                    }
                }
                let temp: f64 =
                    self.sips[idx].iter().zip(&self.tmap).map(|(s, &r)| s * sol.y[r]).sum();
                StateSolidThermal { sig, temp }
            })
            .collect();
        self.states_bkp = self.states.clone();
        self.states_aux = self.states.clone();
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

    pub fn ureset(&mut self, _sol: &Solution) -> Result<()> {
        Ok(())
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.states)?)
    }

    pub fn decode(&mut self, v: &serde_json::Value) -> Result<()> {
        let states: Vec<StateSolidThermal> = serde_json::from_value(v.clone())?;
        if states.len() != self.ips.len() {
            return Err(SolverError::Restart(format!(
                "cell {}: encoded {} states but the element has {} ips",
                self.cid,
                states.len(),
                self.ips.len()
            )));
        }
        self.states = states.clone();
        self.states_bkp = states.clone();
        self.states_aux = states;
        Ok(())
    }

    pub fn nnz_estimate(&self) -> usize {
        let n = self.shape.nverts() * (self.ndim + 1) + self.dual_verts.len();
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        self.xips.clone()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        if self.ndim == 3 {
            vec!["sx", "sy", "sz", "sxy", "syz", "szx", "temp"]
        } else {
            vec!["sx", "sy", "sz", "sxy", "temp"]
        }
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, _sol: &Solution) -> Result<()> {
        let nip = self.ips.len();
        let ncp = self.ncp();
        let keys = self.out_ip_keys();
        for (idx, st) in self.states.iter().enumerate() {
            for c in 0..ncp {
                let v = if c >= 3 { st.sig[c] / SQ2 } else { st.sig[c] };
                map.set(keys[c], idx, nip, v);
            }
            map.set("temp", idx, nip, st.temp);
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
    use pfem_model::materials::{Material, MaterialModel};
    use pfem_model::{FuncRegistry, MatRegistry, Mesh};

    fn build(qcm: bool) -> (ElemKind, usize) {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.add_vert(0, vec![x, y]);
        }
        let cid = mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();
        if qcm {
            mesh.set_face_cond(cid, "qcm", 1, "tmax", "!sramp !beta:10 !kappa:2 !h:3");
        } else {
            mesh.set_face_cond(cid, "qc", 1, "tinf", "!h:3");
        }
        let mut mats = MatRegistry::new();
        mats.insert(Material {
            name: "steel".to_string(),
            model: MaterialModel::LinElast(LinElast { e: 1000.0, nu: 0.25, rho: 2.0 }),
        });
        mats.insert(Material {
            name: "heat".to_string(),
            model: MaterialModel::Thermal(Thermal { kcond: 2.0, rho_c: 5.0, alpha_t: 1e-4, tc: 0.3 }),
        });
        let mut funcs = FuncRegistry::new();
        funcs.insert("tinf", Func::Cte { c: 20.0 });
        funcs.insert("tmax", Func::Cte { c: 40.0 });
        let mut edata = testutil::edata("solid-thermal", "steel");
        edata.mat_extra = "heat".to_string();
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();

        // eqs per node: [ux, uy, temp]; fl on verts 1, 2 -> 12, 13
        let eqs: Vec<Vec<usize>> = (0..4).map(|i| vec![3 * i, 3 * i + 1, 3 * i + 2]).collect();
        let dual: Vec<usize> = if qcm { vec![12, 13] } else { vec![] };
        elem.set_eqs(&eqs, &dual).unwrap();
        let ny = if qcm { 14 } else { 12 };
        (elem, ny)
    }

    fn seed(sol: &mut Solution, ny: usize) {
        for i in 0..ny.min(12) {
            sol.y[i] = 0.01 * (i as f64) - 0.03;
            sol.dy[i] = sol.y[i];
        }
        // temperatures well above zero
        for m in 0..4 {
            sol.y[3 * m + 2] = 25.0 + 3.0 * m as f64;
            sol.dy[3 * m + 2] = 1.0;
        }
    }

    #[test]
    fn tangent_matches_finite_difference_steady_qc() {
        let (mut elem, ny) = build(false);
        let mut sol = Solution::new(ny, 0, 4);
        sol.steady = true;
        seed(&mut sol, ny);
        if let ElemKind::SolidThermal(e) = &mut elem {
            e.set_ini_ivs(&sol, None).unwrap();
        }
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn tangent_matches_finite_difference_transient_qcm() {
        let (mut elem, ny) = build(true);
        let mut sol = Solution::new(ny, 0, 4);
        sol.dcs.beta1 = 25.0;
        sol.dcs.a1 = 1.0e4;
        sol.dcs.a4 = 1.0e2;
        seed(&mut sol, ny);
        sol.y[12] = 0.4;
        sol.y[13] = 0.1;
        for i in 0..12 {
            sol.zet[i] = 0.2 * i as f64;
            sol.chi[i] = -0.05 * i as f64;
        }
        if let ElemKind::SolidThermal(e) = &mut elem {
            e.set_ini_ivs(&sol, None).unwrap();
        }
        elem.interp_star_vars(&sol).unwrap();
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn heating_produces_compressive_stress_when_confined() {
        // uniform ΔT with zero displacement increment: σ = −b·ΔT on the
        // normal components
        let (mut elem, ny) = build(false);
        let mut sol = Solution::new(ny, 0, 4);
        sol.steady = true;
        for m in 0..4 {
            sol.y[3 * m + 2] = 10.0;
            sol.dy[3 * m + 2] = 10.0;
        }
        if let ElemKind::SolidThermal(e) = &mut elem {
            e.states = vec![StateSolidThermal { sig: vec![0.0; 4], temp: 0.0 }; e.ips.len()];
            e.states_bkp = e.states.clone();
            e.states_aux = e.states.clone();
        }
        elem.update(&sol).unwrap();
        if let ElemKind::SolidThermal(e) = &elem {
            let la = 1000.0 * 0.25 / (1.25 * 0.5);
            let g2 = 2.0 * 1000.0 / (2.0 * 1.25);
            let expect = -(3.0 * la + g2) * 1e-4 * 10.0;
            for st in &e.states {
                assert!((st.sig[0] - expect).abs() < 1e-10, "{} vs {expect}", st.sig[0]);
                assert!((st.sig[1] - expect).abs() < 1e-10);
                assert!(st.sig[3].abs() < 1e-12);
                assert_eq!(st.temp, 10.0);
            }
        }
    }
}
