//! Coupled displacement–pressure (u–p) element for saturated/unsaturated
//! consolidation.
//!
//! Displacements live on every node; the liquid pressure lives on the
//! corner sub-shape so that quadratic displacement cells keep a stable
//! mixed formulation. Total stress is σ = σ' − pl·m̂ with the effective
//! stress σ' carried as internal state.
//!
//! The liquid mass balance couples to the skeleton through the
//! α4-weighted velocity divergence:
//!
//! ```text
//! Cpl·dpl/dt + ρl·sl·div(du/dt) + div(ρl·wl) = 0
//! ```
//!
//! where div(du/dt) is evaluated as α4·div(u) − divχs with the frozen
//! star divergence divχs.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::elements::{at_ip, ukeys, ElemCtx, ElemKind, Info, SQ2};
use crate::error::{Result, SolverError};
use crate::ips::{Ip, IpsMap};
use crate::lin_solver::Triplet;
use crate::shapes::{get_ips, shape_values, ShapeScratch};
use crate::solution::Solution;
use pfem_model::materials::{LinElast, Porous};
use pfem_model::sim::{keycode_f64, keycode_flag};
use pfem_model::{Cell, ElemData, FaceCond, Func, ShapeKind};

/// Per-ip internal variables: effective stress plus liquid state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSolidLiquid {
    /// Effective stress in Mandel packing
    pub sig: Vec<f64>,
    pub pl: f64,
    pub sl: f64,
    pub rho_l: f64,
    pub ns0: f64,
}

pub fn info(cell: &Cell, _fcs: &[FaceCond], edata: &ElemData, ndim: usize) -> Result<Info> {
    let nv = cell.shape.nverts();
    let nc = cell.shape.ncorners();
    // "!lbb" insists on a reduced-order pressure sub-shape
    if keycode_flag(&edata.extra, "lbb") && cell.shape.corner_shape() == cell.shape {
        return Err(SolverError::Input(format!(
            "cell {}: LBB sub-shape requested but {:?} has no reduced pressure shape",
            cell.id, cell.shape
        )));
    }
    let keys: Vec<String> = ukeys(ndim).iter().map(|s| s.to_string()).collect();
    let mut inf = Info::new();
    inf.dofs = vec![keys.clone(); nv];
    for dofs in inf.dofs.iter_mut().take(nc) {
        dofs.push("pl".to_string());
    }
    inf.y2f = vec![
        ("ux".to_string(), "fx".to_string()),
        ("uy".to_string(), "fy".to_string()),
        ("uz".to_string(), "fz".to_string()),
        ("pl".to_string(), "ql".to_string()),
    ];
    inf.t1 = vec!["pl".to_string()];
    inf.t2 = keys;
    inf.nextrap = 2 * ndim;
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    let sld = ctx.mats.get_solid(&ctx.edata.mat)?;
    let por = ctx.mats.get_porous(&ctx.edata.mat_extra)?;
    let (ips, fips) = get_ips(ctx.cell.shape, ctx.edata.nip, ctx.edata.nip_face)?;

    let mut face_loads = Vec::new();
    for fc in &ctx.face_conds {
        match fc.key.as_str() {
            "qn" => face_loads.push((fc.face, ctx.funcs.get(&fc.func)?)),
            other => {
                return Err(SolverError::Input(format!(
                    "cell {}: solid-liquid does not support face condition '{other}'",
                    ctx.cell.id
                )));
            }
        }
    }

    let shape = ctx.cell.shape;
    let pshape = shape.corner_shape();
    let nc = shape.ncorners();
    let mut xc = DMatrix::zeros(nc, ctx.ndim);
    for m in 0..nc {
        for i in 0..ctx.ndim {
            xc[(m, i)] = ctx.x[(m, i)];
        }
    }

    let mut sc = ShapeScratch::new(shape, ctx.cell.id);
    let xips: Vec<Vec<f64>> = ips.iter().map(|ip| sc.ip_real_coords(&ctx.x, ip)).collect();
    let sips: Vec<Vec<f64>> = ips.iter().map(|ip| shape_values(shape, ip.r, ip.s, ip.t)).collect();
    let spips: Vec<Vec<f64>> =
        ips.iter().map(|ip| shape_values(pshape, ip.r, ip.s, ip.t)).collect();
    let emat = sc.extrapolator(&ips)?;
    let nip = ips.len();

    Ok(ElemKind::SolidLiquid(ElemSolidLiquid {
        cid: ctx.cell.id,
        ndim: ctx.ndim,
        shape,
        pshape,
        x: ctx.x.clone(),
        xc,
        verts: ctx.cell.verts.clone(),
        ips,
        fips,
        xips,
        sips,
        spips,
        emat,
        umap: Vec::new(),
        plmap: Vec::new(),
        sld,
        por,
        cdam: keycode_f64(&ctx.edata.extra, "cdam").unwrap_or(0.0),
        grav: None,
        face_loads,
        psl_star: vec![0.0; nip],
        zs_star: vec![[0.0; 3]; nip],
        xs_star: vec![[0.0; 3]; nip],
        divxs_star: vec![0.0; nip],
        states: Vec::new(),
        states_bkp: Vec::new(),
        states_aux: Vec::new(),
    }))
}

/// Coupled u–p element
#[derive(Debug)]
pub struct ElemSolidLiquid {
    pub cid: usize,
    ndim: usize,
    shape: ShapeKind,
    /// Reduced-order sub-shape carrying the pressure
    pshape: ShapeKind,
    x: DMatrix<f64>,
    /// Corner coordinates for the pressure sub-shape
    xc: DMatrix<f64>,
    verts: Vec<usize>,
    ips: Vec<Ip>,
    fips: Vec<Ip>,
    xips: Vec<Vec<f64>>,
    sips: Vec<Vec<f64>>,
    /// Pressure shape values at each ip
    spips: Vec<Vec<f64>>,
    emat: DMatrix<f64>,
    pub umap: Vec<usize>,
    pub plmap: Vec<usize>,
    sld: LinElast,
    por: Porous,
    cdam: f64,
    grav: Option<Func>,
    face_loads: Vec<(usize, Func)>,
    psl_star: Vec<f64>,
    zs_star: Vec<[f64; 3]>,
    xs_star: Vec<[f64; 3]>,
    /// Frozen divergence of Chi at each ip
    divxs_star: Vec<f64>,
    pub states: Vec<StateSolidLiquid>,
    pub states_bkp: Vec<StateSolidLiquid>,
    pub states_aux: Vec<StateSolidLiquid>,
}

impl ElemSolidLiquid {
    fn ncp(&self) -> usize {
        2 * self.ndim
    }

    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], _dual: &[usize]) -> Result<()> {
        let nv = self.shape.nverts();
        let nc = self.shape.ncorners();
        if eqs.len() != nv {
            return Err(SolverError::Input(format!(
                "cell {}: expected {} equation groups, got {}",
                self.cid,
                nv,
                eqs.len()
            )));
        }
        self.umap.clear();
        self.plmap.clear();
        for (m, g) in eqs.iter().enumerate() {
            self.umap.extend_from_slice(&g[..self.ndim]);
            if m < nc {
                self.plmap.push(g[self.ndim]);
            }
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
                "cell {}: solid-liquid does not support element condition '{other}'",
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
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let ips = self.ips.clone();
        for (idx, ip) in ips.iter().enumerate() {
            self.psl_star[idx] = self.spips[idx]
                .iter()
                .zip(&self.plmap)
                .map(|(s, &r)| s * sol.psi[r])
                .sum();
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

    /// (pl, ∇pl) with the pressure sub-shape
    fn pl_fields(&self, sol: &Solution, scp: &ShapeScratch) -> (f64, [f64; 3]) {
        let nc = self.shape.ncorners();
        let mut pl = 0.0;
        let mut gpl = [0.0; 3];
        for m in 0..nc {
            let ym = sol.y[self.plmap[m]];
            pl += scp.s[m] * ym;
            for i in 0..self.ndim {
                gpl[i] += scp.g[m][i] * ym;
            }
        }
        (pl, gpl)
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let nc = self.shape.ncorners();
        let nu = self.umap.len();
        let ncp = self.ncp();
        let d = self.calc_d();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let mut scp = ShapeScratch::new(self.pshape, self.cid);
        let gv = self.gvec(sol.t);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            scp.calc_at_ip(&self.xc, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;

            let (pl, gpl) = self.pl_fields(sol, &scp);
            let co = self.por.liq_coefs(pl);
            let b = self.bmat(&sc);
            let sig_eff = self.trial_sig(idx, &d, &b, sol);
            let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };

            // momentum: total stress = effective minus pore pressure
            let mut sig = sig_eff;
            for i in 0..3.min(ncp) {
                sig[i] -= pl;
            }
            for k in 0..nu {
                let mut f = 0.0;
                for i in 0..ncp {
                    f += b[(i, k)] * sig[i];
                }
                fb[self.umap[k]] -= coef * wf * f;
            }

            let rho_mix = self.por.rho_mix(co.sl, co.rho_l);

            if sol.steady {
                if self.grav.is_some() {
                    for m in 0..nv {
                        for i in 0..self.ndim {
                            fb[self.umap[m * self.ndim + i]] += coef * sc.s[m] * rho_mix * gv[i];
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
                        let dyn_i = rho_mix * (sol.dcs.a1 * u[i] - zs[i] - gv[i])
                            + self.cdam * (sol.dcs.a7 * u[i] - xs[i]);
                        fb[self.umap[m * self.ndim + i]] -= coef * sc.s[m] * dyn_i;
                    }
                }
            }

            // liquid mass balance
            let mut rlw = [0.0; 3];
            for i in 0..self.ndim {
                for j in 0..self.ndim {
                    rlw[i] += co.krl * self.por.kl_sat[i][j] * (co.rho_l * gv[j] - gpl[j]);
                }
            }
            let mut divu = 0.0;
            for m in 0..nv {
                for i in 0..self.ndim {
                    divu += sc.g[m][i] * sol.y[self.umap[m * self.ndim + i]];
                }
            }
            let storage = if sol.steady {
                0.0
            } else {
                co.cpl * (sol.dcs.beta1 * pl - self.psl_star[idx])
                    + co.rho_l * co.sl * (sol.dcs.a4 * divu - self.divxs_star[idx])
            };
            for p in 0..nc {
                let r = self.plmap[p];
                fb[r] -= coef * scp.s[p] * storage;
                for i in 0..self.ndim {
                    fb[r] += coef * scp.g[p][i] * rlw[i];
                }
            }
        }

        for (face, f) in &self.face_loads {
            let fverts = self.shape.face_verts(*face);
            let qn = f.f(sol.t, &[]);
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, *face)?;
                for (a, &lv) in fverts.iter().enumerate() {
                    for i in 0..self.ndim {
                        fb[self.umap[lv * self.ndim + i]] += fip.w * qn * sc.sf[a] * sc.fnvec[i];
                    }
                }
            }
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, _first_it: bool) -> Result<()> {
        let nv = self.shape.nverts();
        let nc = self.shape.ncorners();
        let nu = self.umap.len();
        let d = self.calc_d();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        let mut scp = ShapeScratch::new(self.pshape, self.cid);
        let gv = self.gvec(sol.t);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            scp.calc_at_ip(&self.xc, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;

            let (pl, gpl) = self.pl_fields(sol, &scp);
            let co = self.por.liq_coefs(pl);
            let b = self.bmat(&sc);
            let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };

            // Kuu
            let k_e = coef * wf * b.transpose() * &d * &b;
            for p in 0..nu {
                for q in 0..nu {
                    kb.put(self.umap[p], self.umap[q], k_e[(p, q)]);
                }
            }
            if !sol.steady {
                let rho_mix = self.por.rho_mix(co.sl, co.rho_l);
                let w = coef * (rho_mix * sol.dcs.a1 + self.cdam * sol.dcs.a7);
                for m in 0..nv {
                    for n in 0..nv {
                        let v = w * sc.s[m] * sc.s[n];
                        for i in 0..self.ndim {
                            kb.put(self.umap[m * self.ndim + i], self.umap[n * self.ndim + i], v);
                        }
                    }
                }
            }

            // Kup: pore-pressure contribution to momentum plus the mixture
            // density derivative in the inertial/gravity terms
            // d(rho_mix)/dpl equals Cpl by construction
            let drho_mix = co.cpl;
            let mut u = [0.0; 3];
            if !sol.steady {
                for m in 0..nv {
                    for i in 0..self.ndim {
                        u[i] += sc.s[m] * sol.y[self.umap[m * self.ndim + i]];
                    }
                }
            }
            for m in 0..nv {
                for i in 0..self.ndim {
                    let row = self.umap[m * self.ndim + i];
                    for n in 0..nc {
                        // (B^T·m̂) at (m,i) reduces to G[m][i]
                        let mut v = -coef * wf * sc.g[m][i] * scp.s[n];
                        if sol.steady {
                            if self.grav.is_some() {
                                v -= coef * sc.s[m] * drho_mix * scp.s[n] * gv[i];
                            }
                        } else {
                            let zs = &self.zs_star[idx];
                            v += coef
                                * sc.s[m]
                                * drho_mix
                                * scp.s[n]
                                * (sol.dcs.a1 * u[i] - zs[i] - gv[i]);
                        }
                        kb.put(row, self.plmap[n], v);
                    }
                }
            }

            // Kpu: skeleton velocity divergence in the mass balance
            if !sol.steady {
                for p in 0..nc {
                    for n in 0..nv {
                        for j in 0..self.ndim {
                            kb.put(
                                self.plmap[p],
                                self.umap[n * self.ndim + j],
                                coef * scp.s[p] * co.rho_l * co.sl * sol.dcs.a4 * sc.g[n][j],
                            );
                        }
                    }
                }
            }

            // Kpp
            let (dl, div_term) = if sol.steady {
                (0.0, 0.0)
            } else {
                let mut divu = 0.0;
                for m in 0..nv {
                    for i in 0..self.ndim {
                        divu += sc.g[m][i] * sol.y[self.umap[m * self.ndim + i]];
                    }
                }
                (
                    sol.dcs.beta1 * pl - self.psl_star[idx],
                    sol.dcs.a4 * divu - self.divxs_star[idx],
                )
            };
            // d(rho_l·sl)/dpl = Cl·sl + rho_l·dsl/dpl = Cpl/nf
            let drhosl = co.cpl / self.por.nf0;
            for p in 0..nc {
                for n in 0..nc {
                    let mut v = 0.0;
                    if !sol.steady {
                        v += coef
                            * scp.s[p]
                            * scp.s[n]
                            * (co.dcpl_dpl * dl + co.cpl * sol.dcs.beta1 + drhosl * div_term);
                    }
                    for i in 0..self.ndim {
                        for j in 0..self.ndim {
                            let darcy = co.rho_l * gv[j] - gpl[j];
                            v -= coef
                                * scp.g[p][i]
                                * self.por.kl_sat[i][j]
                                * (co.dkrl_dpl * scp.s[n] * darcy
                                    + co.krl * (co.drhol_dpl * scp.s[n] * gv[j] - scp.g[n][j]));
                        }
                    }
                    kb.put(self.plmap[p], self.plmap[n], v);
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
            let pl: f64 =
                self.spips[idx].iter().zip(&self.plmap).map(|(s, &r)| s * sol.y[r]).sum();
            let co = self.por.liq_coefs(pl);
            if sig.iter().any(|v| !v.is_finite()) || !co.sl.is_finite() {
                return Err(SolverError::Constitutive {
                    cid: self.cid,
                    ip: idx,
                    reason: "coupled update produced a non-finite state".to_string(),
                });
            }
            let st = &mut self.states[idx];
            st.sig = sig;
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
                let pl: f64 =
                    self.spips[idx].iter().zip(&self.plmap).map(|(s, &r)| s * sol.y[r]).sum();
                let co = self.por.liq_coefs(pl);
                StateSolidLiquid { sig, pl, sl: co.sl, rho_l: co.rho_l, ns0: self.por.nf0 }
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
        let states: Vec<StateSolidLiquid> = serde_json::from_value(v.clone())?;
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
        let n = self.shape.nverts() * self.ndim + self.shape.ncorners();
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        self.xips.clone()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        if self.ndim == 3 {
            vec!["sx", "sy", "sz", "sxy", "syz", "szx", "pl", "sl"]
        } else {
            vec!["sx", "sy", "sz", "sxy", "pl", "sl"]
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
            map.set("pl", idx, nip, st.pl);
            map.set("sl", idx, nip, st.sl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testutil;
    use pfem_model::materials::{Fluid, Material, MaterialModel, Retention};
    use pfem_model::{FuncRegistry, MatRegistry, Mesh};

    fn registry() -> MatRegistry {
        let mut mats = MatRegistry::new();
        mats.insert(Material {
            name: "skel".to_string(),
            model: MaterialModel::LinElast(LinElast { e: 1000.0, nu: 0.25, rho: 2.0 }),
        });
        mats.insert(Material {
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
        });
        mats
    }

    fn build() -> (ElemKind, usize) {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.add_vert(0, vec![x, y]);
        }
        let cid = mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();
        let mats = registry();
        let funcs = FuncRegistry::new();
        let mut edata = testutil::edata("solid-liquid", "skel");
        edata.mat_extra = "soil".to_string();
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();
        // eqs per node: [ux, uy, pl] -> u on 0..8, pl on 8..12
        let eqs: Vec<Vec<usize>> = (0..4).map(|i| vec![2 * i, 2 * i + 1, 8 + i]).collect();
        elem.set_eqs(&eqs, &[]).unwrap();
        (elem, 12)
    }

    fn seed(sol: &mut Solution) {
        for (i, v) in [0.0, 0.0, 0.01, -0.002, 0.012, 0.008, -0.001, 0.009].iter().enumerate() {
            sol.y[i] = *v;
            sol.dy[i] = *v;
        }
        for (i, v) in [-8.0, -7.0, -6.5, -7.5].iter().enumerate() {
            sol.y[8 + i] = *v;
            sol.psi[8 + i] = 0.9 * v;
        }
    }

    #[test]
    fn lbb_subshape_reduces_pressure_nodes() {
        let mut mesh = Mesh::new(2);
        let pts = [
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.5, 0.0),
            (1.0, 0.5),
            (0.5, 1.0),
            (0.0, 0.5),
            (0.5, 0.5),
        ];
        for (x, y) in pts {
            mesh.add_vert(0, vec![x, y]);
        }
        let cid = mesh.add_cell(-1, ShapeKind::Qua9, (0..9).collect()).unwrap();
        let edata = testutil::edata("solid-liquid", "skel");
        let inf = info(&mesh.cells[cid], &[], &edata, 2).unwrap();
        for m in 0..4 {
            assert!(inf.dofs[m].contains(&"pl".to_string()));
        }
        for m in 4..9 {
            assert!(!inf.dofs[m].contains(&"pl".to_string()));
        }
    }

    #[test]
    fn tangent_matches_finite_difference_steady() {
        let (mut elem, ny) = build();
        let mut sol = Solution::new(ny, 0, 4);
        sol.steady = true;
        seed(&mut sol);
        if let ElemKind::SolidLiquid(e) = &mut elem {
            e.set_ini_ivs(&sol, None).unwrap();
        }
        elem.set_ele_conds("g", Func::Cte { c: 10.0 }, "").unwrap();
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn tangent_matches_finite_difference_transient() {
        let (mut elem, ny) = build();
        let mut sol = Solution::new(ny, 0, 4);
        sol.dcs.beta1 = 25.0;
        sol.dcs.a1 = 1.0e4;
        sol.dcs.a4 = 1.0e2;
        seed(&mut sol);
        for i in 0..8 {
            sol.zet[i] = 0.2 * i as f64;
            sol.chi[i] = -0.05 * i as f64;
        }
        if let ElemKind::SolidLiquid(e) = &mut elem {
            e.set_ini_ivs(&sol, None).unwrap();
        }
        elem.set_ele_conds("g", Func::Cte { c: 10.0 }, "").unwrap();
        elem.interp_star_vars(&sol).unwrap();
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn update_commits_effective_stress_and_liquid_state() {
        let (mut elem, ny) = build();
        let mut sol = Solution::new(ny, 0, 4);
        sol.steady = true;
        seed(&mut sol);
        if let ElemKind::SolidLiquid(e) = &mut elem {
            e.set_ini_ivs(&sol, None).unwrap();
        }
        elem.update(&sol).unwrap();
        elem.backup_ivs(false).unwrap();
        if let ElemKind::SolidLiquid(e) = &elem {
            assert_eq!(e.states, e.states_bkp);
            assert!(e.states[0].sl < 0.95);
        }
    }
}
