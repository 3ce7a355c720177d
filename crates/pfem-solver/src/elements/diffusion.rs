//! Scalar diffusion element with nonlinear conductivity.
//!
//! Governing form:
//!
//! ```text
//! ρ·du/dt + div w = s(x),   w = −k(u)·K_cte·∇u
//! ```
//!
//! with k(u) = a0 + a1·u + a2·u² + a3·u³ and K_cte a constant anisotropic
//! tensor. The "qb" face condition adds a prescribed boundary flux.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::elements::{at_ip, ElemCtx, ElemKind, Info};
use crate::error::{Result, SolverError};
use crate::ips::{Ip, IpsMap};
use crate::lin_solver::Triplet;
use crate::shapes::{get_ips, shape_values, ShapeScratch};
use crate::solution::Solution;
use pfem_model::materials::Diffusion;
use pfem_model::{Cell, ElemData, FaceCond, Func, ShapeKind};

/// Info-builder for the registry
pub fn info(cell: &Cell, _fcs: &[FaceCond], _edata: &ElemData, _ndim: usize) -> Result<Info> {
    let mut inf = Info::new();
    inf.dofs = vec![vec!["u".to_string()]; cell.shape.nverts()];
    inf.y2f = vec![("u".to_string(), "q".to_string())];
    inf.t1 = vec!["u".to_string()];
    Ok(inf)
}

/// Allocator for the registry
pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    let mdl = ctx.mats.get_diffusion(&ctx.edata.mat)?;
    let (ips, fips) = get_ips(ctx.cell.shape, ctx.edata.nip, ctx.edata.nip_face)?;

    let mut face_flux = Vec::new();
    for fc in &ctx.face_conds {
        match fc.key.as_str() {
            "qb" => face_flux.push((fc.face, ctx.funcs.get(&fc.func)?)),
            other => {
                return Err(SolverError::Input(format!(
                    "cell {}: diffusion does not support face condition '{other}'",
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

    Ok(ElemKind::Diffusion(ElemDiffusion {
        cid: ctx.cell.id,
        ndim: ctx.ndim,
        shape: ctx.cell.shape,
        x: ctx.x.clone(),
        ips,
        fips,
        xips,
        sips,
        umap: Vec::new(),
        mdl,
        source: None,
        face_flux,
        ustar: vec![0.0; nip],
    }))
}

/// Scalar diffusion element
#[derive(Debug)]
pub struct ElemDiffusion {
    pub cid: usize,
    ndim: usize,
    shape: ShapeKind,
    /// Vertex coordinates, nverts × ndim
    x: DMatrix<f64>,
    ips: Vec<Ip>,
    fips: Vec<Ip>,
    /// Real ip coordinates
    xips: Vec<Vec<f64>>,
    /// Shape values at each volume ip
    sips: Vec<Vec<f64>>,
    /// Global equations of the "u" DOF per local node
    pub umap: Vec<usize>,
    mdl: Diffusion,
    source: Option<Func>,
    /// (face index, flux function) pairs for "qb"
    face_flux: Vec<(usize, Func)>,
    /// Frozen star predictor Ψ* interpolated at each ip
    ustar: Vec<f64>,
}

impl ElemDiffusion {
    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], _dual: &[usize]) -> Result<()> {
        if eqs.len() != self.shape.nverts() {
            return Err(SolverError::Input(format!(
                "cell {}: expected {} equation groups, got {}",
                self.cid,
                self.shape.nverts(),
                eqs.len()
            )));
        }
        self.umap = eqs.iter().map(|g| g[0]).collect();
        Ok(())
    }

    pub fn set_ele_conds(&mut self, key: &str, f: Func, _extra: &str) -> Result<()> {
        match key {
            "s" => {
                self.source = Some(f);
                Ok(())
            }
            other => Err(SolverError::Input(format!(
                "cell {}: diffusion does not support element condition '{other}'",
                self.cid
            ))),
        }
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        for (idx, sv) in self.sips.iter().enumerate() {
            self.ustar[idx] = sv
                .iter()
                .zip(&self.umap)
                .map(|(s, &r)| s * sol.psi[r])
                .sum();
        }
        Ok(())
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let mut sc = ShapeScratch::new(self.shape, self.cid);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;

            let mut u = 0.0;
            let mut gradu = [0.0; 3];
            for m in 0..nv {
                let ym = sol.y[self.umap[m]];
                u += sc.s[m] * ym;
                for i in 0..self.ndim {
                    gradu[i] += sc.g[m][i] * ym;
                }
            }
            let k = self.mdl.kval(u);
            let mut wv = [0.0; 3];
            for i in 0..self.ndim {
                for j in 0..self.ndim {
                    wv[i] -= k * self.mdl.kcte[i][j] * gradu[j];
                }
            }
            let dudt = if sol.steady { 0.0 } else { sol.dcs.beta1 * u - self.ustar[idx] };
            let sval = self.source.as_ref().map(|f| f.f(sol.t, &self.xips[idx])).unwrap_or(0.0);

            for m in 0..nv {
                let r = self.umap[m];
                fb[r] -= coef * sc.s[m] * (self.mdl.rho * dudt - sval);
                for i in 0..self.ndim {
                    fb[r] += coef * sc.g[m][i] * wv[i];
                }
            }
        }

        // prescribed boundary flux
        for (face, f) in &self.face_flux {
            let fverts = self.shape.face_verts(*face);
            for fip in &self.fips {
                sc.calc_at_face_ip(&self.x, fip, *face)?;
                let fnmag = norm3(&sc.fnvec);
                let coef = fip.w * fnmag;
                let qb = f.f(sol.t, &[]);
                for (a, &lv) in fverts.iter().enumerate() {
                    fb[self.umap[lv]] -= coef * qb * sc.sf[a];
                }
            }
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, _first_it: bool) -> Result<()> {
        let nv = self.shape.nverts();
        let mut sc = ShapeScratch::new(self.shape, self.cid);

        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let coef = sc.detj * ip.w;

            let mut u = 0.0;
            let mut gradu = [0.0; 3];
            for m in 0..nv {
                let ym = sol.y[self.umap[m]];
                u += sc.s[m] * ym;
                for i in 0..self.ndim {
                    gradu[i] += sc.g[m][i] * ym;
                }
            }
            let k = self.mdl.kval(u);
            let dkdu = self.mdl.dkdu(u);
            let trans = if sol.steady { 0.0 } else { sol.dcs.beta1 * self.mdl.rho };

            for m in 0..nv {
                for n in 0..nv {
                    let mut v = coef * sc.s[m] * sc.s[n] * trans;
                    for i in 0..self.ndim {
                        for j in 0..self.ndim {
                            v += coef
                                * sc.g[m][i]
                                * self.mdl.kcte[i][j]
                                * (sc.s[n] * dkdu * gradu[j] + k * sc.g[n][j]);
                        }
                    }
                    kb.put(self.umap[m], self.umap[n], v);
                }
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    pub fn decode(&mut self, _v: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    pub fn nnz_estimate(&self) -> usize {
        let n = self.shape.nverts();
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        self.xips.clone()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        if self.ndim == 3 { vec!["u", "wx", "wy", "wz"] } else { vec!["u", "wx", "wy"] }
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, sol: &Solution) -> Result<()> {
        let nv = self.shape.nverts();
        let nip = self.ips.len();
        let mut sc = ShapeScratch::new(self.shape, self.cid);
        for (idx, ip) in self.ips.iter().enumerate() {
            sc.calc_at_ip(&self.x, ip, true).map_err(|e| at_ip(e, idx))?;
            let mut u = 0.0;
            let mut gradu = [0.0; 3];
            for m in 0..nv {
                let ym = sol.y[self.umap[m]];
                u += sc.s[m] * ym;
                for i in 0..self.ndim {
                    gradu[i] += sc.g[m][i] * ym;
                }
            }
            let k = self.mdl.kval(u);
            map.set("u", idx, nip, u);
            let wkeys = ["wx", "wy", "wz"];
            for i in 0..self.ndim {
                let mut w = 0.0;
                for j in 0..self.ndim {
                    w -= k * self.mdl.kcte[i][j] * gradu[j];
                }
                map.set(wkeys[i], idx, nip, w);
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
    use pfem_model::materials::{Material, MaterialModel};
    use pfem_model::{FuncRegistry, MatRegistry, Mesh};

    fn build_one(nonlinear: bool) -> (ElemKind, usize) {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.1, -0.1), (1.2, 1.0), (-0.1, 0.9)] {
            mesh.add_vert(0, vec![x, y]);
        }
        let cid = mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();

        let mut mats = MatRegistry::new();
        let a = if nonlinear { [1.0, 0.5, 0.2, 0.1] } else { [1.0, 0.0, 0.0, 0.0] };
        mats.insert(Material {
            name: "mdl".to_string(),
            model: MaterialModel::Diffusion(Diffusion {
                rho: 2.0,
                // anisotropic with an off-diagonal coupling
                kcte: [[1.0, 0.2, 0.0], [0.2, 0.5, 0.0], [0.0, 0.0, 0.0]],
                a,
            }),
        });
        let funcs = FuncRegistry::new();
        let edata = testutil::edata("diffusion", "mdl");
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();
        let eqs: Vec<Vec<usize>> = (0..4).map(|i| vec![i]).collect();
        elem.set_eqs(&eqs, &[]).unwrap();
        (elem, 4)
    }

    #[test]
    fn tangent_matches_finite_difference_steady() {
        let (elem, ny) = build_one(true);
        let mut sol = Solution::new(ny, 0, 0);
        sol.steady = true;
        for (i, v) in [0.3, -0.2, 0.5, 0.1].iter().enumerate() {
            sol.y[i] = *v;
        }
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn tangent_matches_finite_difference_transient() {
        let (mut elem, ny) = build_one(true);
        let mut sol = Solution::new(ny, 0, 0);
        sol.dcs.beta1 = 20.0;
        for (i, v) in [0.3, -0.2, 0.5, 0.1].iter().enumerate() {
            sol.y[i] = *v;
            sol.psi[i] = 0.7 * v;
        }
        elem.interp_star_vars(&sol).unwrap();
        testutil::check_jacobian(&elem, &mut sol, ny, 1e-6, 1e-6);
    }

    #[test]
    fn star_vectors_frozen_between_iterations() {
        let (mut elem, ny) = build_one(false);
        let mut sol = Solution::new(ny, 0, 0);
        sol.dcs.beta1 = 10.0;
        for i in 0..ny {
            sol.psi[i] = i as f64;
        }
        elem.interp_star_vars(&sol).unwrap();
        let fb1 = testutil::rhs_of(&elem, &sol, ny);
        // a second identical iteration reproduces the residual bit for bit
        let fb2 = testutil::rhs_of(&elem, &sol, ny);
        assert_eq!(fb1, fb2);
    }

    #[test]
    fn linear_steady_residual_is_ku_minus_f() {
        // with k(u) = cte the residual must be linear in y
        let (elem, ny) = build_one(false);
        let mut sol = Solution::new(ny, 0, 0);
        sol.steady = true;
        let fb0 = testutil::rhs_of(&elem, &sol, ny);
        for v in fb0.iter() {
            assert_eq!(*v, 0.0);
        }
        sol.y[2] = 1.0;
        let fb1 = testutil::rhs_of(&elem, &sol, ny);
        sol.y[2] = 2.0;
        let fb2 = testutil::rhs_of(&elem, &sol, ny);
        for i in 0..ny {
            assert!((fb2[i] - 2.0 * fb1[i]).abs() < 1e-13);
        }
    }
}
