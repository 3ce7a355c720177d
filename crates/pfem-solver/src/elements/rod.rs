//! 2-node axial rod element for tension/compression.
//!
//! The rod resists only axial forces. Its local stiffness is
//!
//! ```text
//! k_local = (A·E/L) · [ 1  -1]
//!                     [-1   1]
//! ```
//!
//! transformed to global coordinates with the direction cosines,
//! k = Tᵀ·k_local·T. Stiffness and consistent mass are fixed matrices
//! rebuilt only by `recompute`.

use nalgebra::{DMatrix, DVector};

use crate::elements::{ElemCtx, ElemKind, Info, ukeys};
use crate::error::{Result, SolverError};
use crate::ips::IpsMap;
use crate::lin_solver::Triplet;
use crate::solution::Solution;
use pfem_model::materials::LinElast;
use pfem_model::sim::keycode_f64;
use pfem_model::{Cell, ElemData, FaceCond, Func};

pub fn info(cell: &Cell, _fcs: &[FaceCond], _edata: &ElemData, ndim: usize) -> Result<Info> {
    let keys: Vec<String> = ukeys(ndim).iter().map(|s| s.to_string()).collect();
    let mut inf = Info::new();
    inf.dofs = vec![keys.clone(); cell.verts.len()];
    inf.y2f = vec![
        ("ux".to_string(), "fx".to_string()),
        ("uy".to_string(), "fy".to_string()),
        ("uz".to_string(), "fz".to_string()),
    ];
    inf.t2 = keys;
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    if ctx.cell.verts.len() != 2 {
        return Err(SolverError::Input(format!(
            "cell {}: rod requires 2 vertices, got {}",
            ctx.cell.id,
            ctx.cell.verts.len()
        )));
    }
    let mdl = ctx.mats.get_solid(&ctx.edata.mat)?;
    let area = keycode_f64(&ctx.edata.extra, "area").ok_or_else(|| {
        SolverError::Input(format!("cell {}: rod needs an '!area' parameter", ctx.cell.id))
    })?;
    let mut elem = ElemRod {
        cid: ctx.cell.id,
        ndim: ctx.ndim,
        x: ctx.x.clone(),
        umap: Vec::new(),
        mdl,
        area,
        kmat: DMatrix::zeros(2 * ctx.ndim, 2 * ctx.ndim),
        mmat: None,
        grav: None,
        zs_star: vec![0.0; 2 * ctx.ndim],
        xs_star: vec![0.0; 2 * ctx.ndim],
    };
    elem.recompute(true)?;
    Ok(ElemKind::Rod(elem))
}

/// Axial rod element with fixed stiffness and mass
#[derive(Debug)]
pub struct ElemRod {
    pub cid: usize,
    ndim: usize,
    /// Vertex coordinates, 2 × ndim
    x: DMatrix<f64>,
    pub umap: Vec<usize>,
    mdl: LinElast,
    area: f64,
    kmat: DMatrix<f64>,
    mmat: Option<DMatrix<f64>>,
    grav: Option<Func>,
    zs_star: Vec<f64>,
    xs_star: Vec<f64>,
}

impl ElemRod {
    fn length(&self) -> Result<f64> {
        let mut l2 = 0.0;
        for i in 0..self.ndim {
            let d = self.x[(1, i)] - self.x[(0, i)];
            l2 += d * d;
        }
        let l = l2.sqrt();
        if l < 1e-10 {
            return Err(SolverError::Geometric {
                cid: self.cid,
                ip: 0,
                reason: format!("rod has zero or near-zero length {l}"),
            });
        }
        Ok(l)
    }

    fn direction(&self) -> Result<Vec<f64>> {
        let l = self.length()?;
        Ok((0..self.ndim).map(|i| (self.x[(1, i)] - self.x[(0, i)]) / l).collect())
    }

    /// Rebuild the fixed global stiffness (and mass) matrices
    pub fn recompute(&mut self, with_m: bool) -> Result<()> {
        let l = self.length()?;
        let dir = self.direction()?;
        let n = 2 * self.ndim;

        // T maps global DOFs onto the 2 axial DOFs
        let mut t = DMatrix::zeros(2, n);
        for i in 0..self.ndim {
            t[(0, i)] = dir[i];
            t[(1, self.ndim + i)] = dir[i];
        }

        let k = self.area * self.mdl.e / l;
        let k_local = DMatrix::from_row_slice(2, 2, &[k, -k, -k, k]);
        self.kmat = t.transpose() * k_local * &t;

        if with_m {
            let mc = self.mdl.rho * self.area * l / 6.0;
            let m_local = DMatrix::from_row_slice(2, 2, &[2.0 * mc, mc, mc, 2.0 * mc]);
            self.mmat = Some(t.transpose() * m_local * t);
        }
        Ok(())
    }

    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], _dual: &[usize]) -> Result<()> {
        if eqs.len() != 2 {
            return Err(SolverError::Input(format!(
                "cell {}: expected 2 equation groups, got {}",
                self.cid,
                eqs.len()
            )));
        }
        self.umap.clear();
        for g in eqs {
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
                "cell {}: rod does not support element condition '{other}'",
                self.cid
            ))),
        }
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        for (k, &r) in self.umap.iter().enumerate() {
            self.zs_star[k] = sol.zet[r];
            self.xs_star[k] = sol.chi[r];
        }
        Ok(())
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let n = 2 * self.ndim;
        let u: Vec<f64> = self.umap.iter().map(|&r| sol.y[r]).collect();
        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };

        // internal force K·u
        for p in 0..n {
            let mut f = 0.0;
            for q in 0..n {
                f += self.kmat[(p, q)] * u[q];
            }
            fb[self.umap[p]] -= wf * f;
        }

        // inertia and gravity through the consistent mass matrix
        if let Some(m) = &self.mmat {
            let mut gext = vec![0.0; n];
            if let Some(f) = &self.grav {
                let g = -f.f(sol.t, &[]);
                for node in 0..2 {
                    gext[node * self.ndim + self.ndim - 1] = g;
                }
            }
            if sol.steady {
                if self.grav.is_some() {
                    for p in 0..n {
                        let mut f = 0.0;
                        for q in 0..n {
                            f += m[(p, q)] * gext[q];
                        }
                        fb[self.umap[p]] += f;
                    }
                }
            } else {
                for p in 0..n {
                    let mut f = 0.0;
                    for q in 0..n {
                        f += m[(p, q)] * (sol.dcs.a1 * u[q] - self.zs_star[q] - gext[q]);
                    }
                    fb[self.umap[p]] -= f;
                }
            }
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, _first_it: bool) -> Result<()> {
        let n = 2 * self.ndim;
        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };
        for p in 0..n {
            for q in 0..n {
                let mut v = wf * self.kmat[(p, q)];
                if !sol.steady
                    && let Some(m) = &self.mmat
                {
                    v += sol.dcs.a1 * m[(p, q)];
                }
                kb.put(self.umap[p], self.umap[q], v);
            }
        }
        Ok(())
    }

    /// Fixed consistent mass matrix, if built
    pub fn mass(&self) -> Option<&DMatrix<f64>> {
        self.mmat.as_ref()
    }

    /// Fixed stiffness matrix
    pub fn stiffness(&self) -> &DMatrix<f64> {
        &self.kmat
    }

    /// Axial stress from the current displacements (tension positive)
    pub fn axial_stress(&self, sol: &Solution) -> Result<f64> {
        let l = self.length()?;
        let dir = self.direction()?;
        let mut du = 0.0;
        for i in 0..self.ndim {
            du += dir[i] * (sol.y[self.umap[self.ndim + i]] - sol.y[self.umap[i]]);
        }
        Ok(self.mdl.e * du / l)
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    pub fn decode(&mut self, _v: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    pub fn nnz_estimate(&self) -> usize {
        let n = 2 * self.ndim;
        n * n
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        // midpoint
        vec![(0..self.ndim).map(|i| (self.x[(0, i)] + self.x[(1, i)]) / 2.0).collect()]
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        vec!["sa"]
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, sol: &Solution) -> Result<()> {
        map.set("sa", 0, 1, self.axial_stress(sol)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testutil;
    use pfem_model::materials::{Material, MaterialModel};
    use pfem_model::{FuncRegistry, MatRegistry, Mesh, ShapeKind};

    fn build(x1: [f64; 2]) -> ElemKind {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(0, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![x1[0], x1[1]]);
        let cid = mesh.add_cell(-1, ShapeKind::Lin2, vec![0, 1]).unwrap();
        let mut mats = MatRegistry::new();
        mats.insert(Material {
            name: "steel".to_string(),
            model: MaterialModel::LinElast(LinElast { e: 210000.0, nu: 0.3, rho: 7850.0 }),
        });
        let funcs = FuncRegistry::new();
        let mut edata = testutil::edata("rod", "steel");
        edata.extra = "!area:0.01".to_string();
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();
        elem.set_eqs(&[vec![0, 1], vec![2, 3]], &[]).unwrap();
        elem
    }

    #[test]
    fn stiffness_pattern_along_x() {
        let elem = build([2.0, 0.0]);
        if let ElemKind::Rod(e) = &elem {
            // k = A·E/L = 0.01·210000/2 = 1050
            let k = 1050.0;
            assert!((e.kmat[(0, 0)] - k).abs() < 1e-9);
            assert!((e.kmat[(0, 2)] + k).abs() < 1e-9);
            assert!(e.kmat[(1, 1)].abs() < 1e-12);
            // row sums vanish (self-equilibrium)
            for p in 0..4 {
                let s: f64 = (0..4).map(|q| e.kmat[(p, q)]).sum();
                assert!(s.abs() < 1e-9);
            }
        }
    }

    #[test]
    fn mass_conserves_total() {
        let elem = build([3.0, 4.0]);
        if let ElemKind::Rod(e) = &elem {
            let m = e.mmat.as_ref().unwrap();
            let total: f64 = m.iter().sum();
            // rigid translation in (x, y) carries the full mass twice
            let expect = 2.0 * 7850.0 * 0.01 * 5.0;
            assert!((total - expect).abs() < 1e-8);
        }
    }

    #[test]
    fn axial_stress_closed_form() {
        let elem = build([1.0, 0.0]);
        let mut sol = Solution::new(4, 0, 2);
        sol.steady = true;
        sol.y[2] = 1e-3; // stretch along x
        if let ElemKind::Rod(e) = &elem {
            let sig = e.axial_stress(&sol).unwrap();
            assert!((sig - 210000.0 * 1e-3).abs() < 1e-10);
        }
    }

    #[test]
    fn residual_is_minus_ku() {
        let elem = build([1.0, 1.0]);
        let mut sol = Solution::new(4, 0, 2);
        sol.steady = true;
        sol.y[2] = 0.01;
        sol.y[3] = -0.02;
        let fb = testutil::rhs_of(&elem, &sol, 4);
        if let ElemKind::Rod(e) = &elem {
            for p in 0..4 {
                let ku: f64 = (0..4).map(|q| e.kmat[(p, q)] * sol.y[q]).sum();
                assert!((fb[p] + ku).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn dynamic_tangent_adds_scaled_mass() {
        let elem = build([1.0, 0.0]);
        let mut sol = Solution::new(4, 0, 2);
        sol.dcs.a1 = 100.0;
        let mut kb = Triplet::new(4, 4, 16);
        elem.add_to_kb(&mut kb, &sol, true).unwrap();
        let ka = kb.to_dense();
        if let ElemKind::Rod(e) = &elem {
            let m = e.mmat.as_ref().unwrap();
            for p in 0..4 {
                for q in 0..4 {
                    let expect = e.kmat[(p, q)] + 100.0 * m[(p, q)];
                    assert!((ka[(p, q)] - expect).abs() < 1e-9);
                }
            }
        }
    }
}
