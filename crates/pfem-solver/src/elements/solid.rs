//! Small-strain solid element.
//!
//! Stress uses a Mandel-like packing: [sx, sy, sz, sxy·√2] in 2D (szz is
//! carried for plane strain / axisymmetry) and
//! [sx, sy, sz, sxy·√2, syz·√2, szx·√2] in 3D.
//!
//! Two assembly paths exist: the direct gradient form (default) and the
//! B-matrix form, which the axisymmetric and plane-stress formulations
//! require. Internal force and tangent:
//!
//! ```text
//! f_int = ∫ Bᵀ·σ dΩ          K = ∫ Bᵀ·D·B dΩ
//! ```
//!
//! Dynamic terms use (α1, α4) with the cached star vectors ζs and χs:
//! the residual carries ρ·(α1·u − ζs − g) + c_dam·(α4·u − χs) and the
//! tangent the matching S·S·(ρ·α1 + c_dam·α4) block.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::elements::{at_ip, ukeys, ElemCtx, ElemKind, Info, SQ2};
use crate::error::{Result, SolverError};
use crate::ips::{Ip, IpsMap};
use crate::lin_solver::Triplet;
use crate::shapes::{get_ips, shape_values, ShapeScratch};
use crate::solution::Solution;
use pfem_model::materials::LinElast;
use pfem_model::sim::{keycode_f64, keycode_flag};
use pfem_model::{Cell, ElemData, FaceCond, Func, ShapeKind};

/// Per-ip internal variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSolid {
    /// Stress in Mandel packing (4 components in 2D, 6 in 3D)
    pub sig: Vec<f64>,
    /// Hardening variables
    pub alp: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LoadKind {
    /// Normal distributed load
    Qn,
    /// Normal load frozen at its t = 0 value
    Qn0,
    /// Normal load weighted by the radius (axisymmetric)
    Aqn,
}

pub fn info(cell: &Cell, _fcs: &[FaceCond], _edata: &ElemData, ndim: usize) -> Result<Info> {
    let keys: Vec<String> = ukeys(ndim).iter().map(|s| s.to_string()).collect();
    let mut inf = Info::new();
    inf.dofs = vec![keys.clone(); cell.shape.nverts()];
    inf.y2f = vec![
        ("ux".to_string(), "fx".to_string()),
        ("uy".to_string(), "fy".to_string()),
        ("uz".to_string(), "fz".to_string()),
    ];
    inf.t2 = keys;
    inf.nextrap = 2 * ndim;
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    let mdl = ctx.mats.get_solid(&ctx.edata.mat)?;
    let (ips, fips) = get_ips(ctx.cell.shape, ctx.edata.nip, ctx.edata.nip_face)?;

    let mut face_loads = Vec::new();
    for fc in &ctx.face_conds {
        let kind = match fc.key.as_str() {
            "qn" => LoadKind::Qn,
            "qn0" => LoadKind::Qn0,
            "aqn" => LoadKind::Aqn,
            other => {
                return Err(SolverError::Input(format!(
                    "cell {}: solid does not support face condition '{other}'",
                    ctx.cell.id
                )));
            }
        };
        if kind == LoadKind::Aqn && !ctx.axisym {
            return Err(SolverError::Input(format!(
                "cell {}: 'aqn' requires the axisymmetric formulation",
                ctx.cell.id
            )));
        }
        face_loads.push((fc.face, ctx.funcs.get(&fc.func)?, kind));
    }

    let sc = ShapeScratch::new(ctx.cell.shape, ctx.cell.id);
    let xips: Vec<Vec<f64>> = ips.iter().map(|ip| sc.ip_real_coords(&ctx.x, ip)).collect();
    let sips: Vec<Vec<f64>> =
        ips.iter().map(|ip| shape_values(ctx.cell.shape, ip.r, ip.s, ip.t)).collect();
    let emat = sc.extrapolator(&ips)?;
    let nip = ips.len();

    Ok(ElemKind::Solid(ElemSolid {
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
        umap: Vec::new(),
        mdl,
        cdam: keycode_f64(&ctx.edata.extra, "cdam").unwrap_or(0.0),
        use_b: ctx.axisym || ctx.pstress || keycode_flag(&ctx.edata.extra, "bmat"),
        axisym: ctx.axisym,
        pstress: ctx.pstress,
        grav: None,
        face_loads,
        zs_star: vec![[0.0; 3]; nip],
        xs_star: vec![[0.0; 3]; nip],
        states: Vec::new(),
        states_bkp: Vec::new(),
        states_aux: Vec::new(),
    }))
}

/// Small-strain solid element
#[derive(Debug)]
pub struct ElemSolid {
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
    /// Node-major displacement equations: [ux0, uy0, (uz0,) ux1, ...]
    pub umap: Vec<usize>,
    mdl: LinElast,
    /// Damping coefficient
    cdam: f64,
    /// B-matrix assembly path
    use_b: bool,
    axisym: bool,
    pstress: bool,
    grav: Option<Func>,
    face_loads: Vec<(usize, Func, LoadKind)>,
    /// ζs vectors cached at ips
    zs_star: Vec<[f64; 3]>,
    /// χs vectors cached at ips
    xs_star: Vec<[f64; 3]>,
    pub states: Vec<StateSolid>,
    pub states_bkp: Vec<StateSolid>,
    pub states_aux: Vec<StateSolid>,
}

impl ElemSolid {
    fn ncp(&self) -> usize {
        2 * self.ndim
    }

    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], _dual: &[usize]) -> Result<()> {
        let nv = self.shape.nverts();
        if eqs.len() != nv {
            return Err(SolverError::Input(format!(
                "cell {}: expected {} equation groups, got {}",
                self.cid,
                nv,
                eqs.len()
            )));
        }
        self.umap.clear();
        for g in eqs {
            if g.len() < self.ndim {
                return Err(SolverError::Input(format!(
                    "cell {}: node group has {} equations but needs {}",
                    self.cid,
                    g.len(),
                    self.ndim
                )));
            }
            self.umap.extend_from_slice(&g[..self.ndim]);
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
                "cell {}: solid does not support element condition '{other}'",
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

    /// Elastic moduli in Mandel packing
    fn calc_d(&self) -> DMatrix<f64> {
        let ncp = self.ncp();
        let mut d = DMatrix::zeros(ncp, ncp);
        let gsh = self.mdl.shear_modulus();
        if self.pstress {
            let c = self.mdl.e / (1.0 - self.mdl.nu * self.mdl.nu);
            d[(0, 0)] = c;
            d[(1, 1)] = c;
            d[(0, 1)] = c * self.mdl.nu;
            d[(1, 0)] = c * self.mdl.nu;
            d[(3, 3)] = 2.0 * gsh;
        } else {
            let la =
                self.mdl.e * self.mdl.nu / ((1.0 + self.mdl.nu) * (1.0 - 2.0 * self.mdl.nu));
            for i in 0..3 {
                for j in 0..3 {
                    d[(i, j)] = la;
                }
                d[(i, i)] += 2.0 * gsh;
            }
            for k in 3..ncp {
                d[(k, k)] = 2.0 * gsh;
            }
        }
        d
    }

    /// Strain-displacement matrix at the current scratch point
    fn bmat(&self, sc: &ShapeScratch, radius: f64) -> DMatrix<f64> {
        let nv = self.shape.nverts();
        let ncp = self.ncp();
        let mut b = DMatrix::zeros(ncp, nv * self.ndim);
        for m in 0..nv {
            let c = m * self.ndim;
            let g = &sc.g[m];
            if self.ndim == 2 {
                b[(0, c)] = g[0];
                b[(1, c + 1)] = g[1];
                if self.axisym {
                    b[(2, c)] = sc.s[m] / radius;
                }
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

    /// Trial stress at an ip from the committed state plus D·Δε
    fn trial_sig(&self, idx: usize, d: &DMatrix<f64>, b: &DMatrix<f64>, sol: &Solution) -> Vec<f64> {
        let nu = self.umap.len();
        let ncp = self.ncp();
        let mut deps = vec![0.0; ncp];
        for i in 0..ncp {
            for k in 0..nu {
                deps[i] += b[(i, k)] * sol.dy[self.umap[k]];
            }
        }
        let mut sig = self.states[idx].sig.clone();
        for i in 0..ncp {
            for j in 0..ncp {
                sig[i] += d[(i, j)] * deps[j];
            }
        }
        sig
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        for (idx, sv) in self.sips.iter().enumerate() {
            let mut zs = [0.0; 3];
            let mut xs = [0.0; 3];
            for m in 0..nv {
                for i in 0..self.ndim {
                    let r = self.umap[m * self.ndim + i];
                    zs[i] += sv[m] * sol.zet[r];
                    xs[i] += sv[m] * sol.chi[r];
                }
            }
            self.zs_star[idx] = zs;
            self.xs_star[idx] = xs;
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
        // HHT weights the internal force in transient runs
        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let radius = if self.axisym { sc.axisym_radius(&self.x) } else { 1.0 };
            let coef = sc.detj * ip.w * if self.axisym { radius } else { 1.0 };

            if self.use_b {
                let b = self.bmat(&sc, radius);
                let sig = self.trial_sig(idx, &d, &b, sol);
                for k in 0..nu {
                    let mut f = 0.0;
                    for i in 0..ncp {
                        f += b[(i, k)] * sig[i];
                    }
                    fb[self.umap[k]] -= coef * wf * f;
                }
            } else {
                // gradient double-sum over the stress tensor
                let b = self.bmat(&sc, radius);
                let sig = self.trial_sig(idx, &d, &b, sol);
                let st = tensor_of(&sig, self.ndim);
                for m in 0..nv {
                    for i in 0..self.ndim {
                        let mut f = 0.0;
                        for j in 0..self.ndim {
                            f += st[i][j] * sc.g[m][j];
                        }
                        fb[self.umap[m * self.ndim + i]] -= coef * wf * f;
                    }
                }
            }

            // inertial, damping and gravity terms
            if sol.steady {
                if self.grav.is_some() {
                    for m in 0..nv {
                        for i in 0..self.ndim {
                            fb[self.umap[m * self.ndim + i]] +=
                                coef * sc.s[m] * self.mdl.rho * gv[i];
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
                        let dyn_i = self.mdl.rho * (sol.dcs.a1 * u[i] - zs[i] - gv[i])
                            + self.cdam * (sol.dcs.a7 * u[i] - xs[i]);
                        fb[self.umap[m * self.ndim + i]] -= coef * sc.s[m] * dyn_i;
                    }
                }
            }
        }

        // distributed normal loads on faces
        for (face, f, kind) in &self.face_loads {
            let fverts = self.shape.face_verts(*face);
            let t_eval = if *kind == LoadKind::Qn0 { 0.0 } else { sol.t };
            let qn = f.f(t_eval, &[]);
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, *face)?;
                let mut scale = fip.w * qn;
                if *kind == LoadKind::Aqn {
                    // radius at the face ip
                    let mut r = 0.0;
                    for (a, &lv) in fverts.iter().enumerate() {
                        r += sc.sf[a] * self.x[(lv, 0)];
                    }
                    scale *= r;
                }
                for (a, &lv) in fverts.iter().enumerate() {
                    for i in 0..self.ndim {
                        fb[self.umap[lv * self.ndim + i]] += scale * sc.sf[a] * sc.fnvec[i];
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
        let mut sc = ShapeScratch::new(self.shape, self.cid);

        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };
        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let radius = if self.axisym { sc.axisym_radius(&self.x) } else { 1.0 };
            let coef = sc.detj * ip.w * if self.axisym { radius } else { 1.0 };

            let b = self.bmat(&sc, radius);
            // K += coef·α8·Bᵀ·D·B
            let k_e = coef * wf * b.transpose() * &d * &b;
            for p in 0..nu {
                for q in 0..nu {
                    kb.put(self.umap[p], self.umap[q], k_e[(p, q)]);
                }
            }

            if !sol.steady {
                let w = coef * (self.mdl.rho * sol.dcs.a1 + self.cdam * sol.dcs.a7);
                for m in 0..nv {
                    for n in 0..nv {
                        let v = w * sc.s[m] * sc.s[n];
                        for i in 0..self.ndim {
                            kb.put(
                                self.umap[m * self.ndim + i],
                                self.umap[n * self.ndim + i],
                                v,
                            );
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
        for idx in 0..self.ips.len() {
            let ip = self.ips[idx];
            sc.calc_at_ip(&self.x, &ip, true).map_err(|e| at_ip(e, idx))?;
            let radius = if self.axisym { sc.axisym_radius(&self.x) } else { 1.0 };
            let b = self.bmat(&sc, radius);
            let sig = self.trial_sig(idx, &d, &b, sol);
            if sig.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::Constitutive {
                    cid: self.cid,
                    ip: idx,
                    reason: "stress update produced a non-finite component".to_string(),
                });
            }
            self.states[idx].sig = sig;
        }
        Ok(())
    }

    pub fn set_ini_ivs(
        &mut self,
        _sol: &Solution,
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
                            // shear components arrive unscaled
                            sig[c] = if c >= 3 { v[idx] * SQ2 } else { v[idx] };
                        }
                    }
                }
                StateSolid { sig, alp: Vec::new() }
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
        // stresses persist when displacements are zeroed
        Ok(())
    }

    pub fn add_to_ext(&self, sol: &mut Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let ncp = self.ncp();
        for m in 0..nv {
            let mut vals = vec![0.0; ncp];
            for (k, st) in self.states.iter().enumerate() {
                for c in 0..ncp {
                    vals[c] += self.emat[(m, k)] * st.sig[c];
                }
            }
            sol.add_ext(self.verts[m], &vals);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.states)?)
    }

    pub fn decode(&mut self, v: &serde_json::Value) -> Result<()> {
        let states: Vec<StateSolid> = serde_json::from_value(v.clone())?;
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
        let n = self.shape.nverts() * self.ndim;
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        self.xips.clone()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        if self.ndim == 3 {
            vec!["sx", "sy", "sz", "sxy", "syz", "szx"]
        } else {
            vec!["sx", "sy", "sz", "sxy"]
        }
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, _sol: &Solution) -> Result<()> {
        let nip = self.ips.len();
        let keys = self.out_ip_keys();
        for (idx, st) in self.states.iter().enumerate() {
            for (c, key) in keys.iter().enumerate() {
                let v = if c >= 3 { st.sig[c] / SQ2 } else { st.sig[c] };
                map.set(key, idx, nip, v);
            }
        }
        Ok(())
    }
}

/// Expand a Mandel vector into the stress tensor
fn tensor_of(sig: &[f64], ndim: usize) -> [[f64; 3]; 3] {
    let mut t = [[0.0; 3]; 3];
    t[0][0] = sig[0];
    t[1][1] = sig[1];
    t[2][2] = sig[2];
    t[0][1] = sig[3] / SQ2;
    t[1][0] = t[0][1];
    if ndim == 3 {
        t[1][2] = sig[4] / SQ2;
        t[2][1] = t[1][2];
        t[0][2] = sig[5] / SQ2;
        t[2][0] = t[0][2];
    }
    t
}
