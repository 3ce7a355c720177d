//! 2-node Euler–Bernoulli beam element (2D).
//!
//! Three DOFs per node (ux, uy, rz). Stiffness couples the axial response
//! EA/L with the bending terms in EI/L³; both are fixed matrices rebuilt
//! only by `recompute`. End moments and the axial force are published as
//! the ip-output keys M11, M22 and T00.

use nalgebra::{DMatrix, DVector};

use crate::elements::{ElemCtx, ElemKind, Info};
use crate::error::{Result, SolverError};
use crate::ips::IpsMap;
use crate::lin_solver::Triplet;
use crate::solution::Solution;
use pfem_model::materials::LinElast;
use pfem_model::sim::keycode_f64;
use pfem_model::{Cell, ElemData, FaceCond, Func};

pub fn info(cell: &Cell, _fcs: &[FaceCond], _edata: &ElemData, ndim: usize) -> Result<Info> {
    if ndim != 2 {
        return Err(SolverError::Input(format!(
            "cell {}: the beam element is 2D only",
            cell.id
        )));
    }
    let keys = vec!["ux".to_string(), "uy".to_string(), "rz".to_string()];
    let mut inf = Info::new();
    inf.dofs = vec![keys.clone(); cell.verts.len()];
    inf.y2f = vec![
        ("ux".to_string(), "fx".to_string()),
        ("uy".to_string(), "fy".to_string()),
        ("rz".to_string(), "mz".to_string()),
    ];
    inf.t2 = keys;
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    if ctx.cell.verts.len() != 2 {
        return Err(SolverError::Input(format!(
            "cell {}: beam requires 2 vertices, got {}",
            ctx.cell.id,
            ctx.cell.verts.len()
        )));
    }
    let mdl = ctx.mats.get_solid(&ctx.edata.mat)?;
    let area = keycode_f64(&ctx.edata.extra, "area").ok_or_else(|| {
        SolverError::Input(format!("cell {}: beam needs an '!area' parameter", ctx.cell.id))
    })?;
    let izz = keycode_f64(&ctx.edata.extra, "izz").ok_or_else(|| {
        SolverError::Input(format!("cell {}: beam needs an '!izz' parameter", ctx.cell.id))
    })?;
    let mut elem = ElemBeam {
        cid: ctx.cell.id,
        x: ctx.x.clone(),
        umap: Vec::new(),
        mdl,
        area,
        izz,
        kmat: DMatrix::zeros(6, 6),
        mmat: None,
        tmat: DMatrix::zeros(6, 6),
        zs_star: vec![0.0; 6],
    };
    elem.recompute(true)?;
    Ok(ElemKind::Beam(elem))
}

/// 2D Euler–Bernoulli beam with fixed stiffness and mass
#[derive(Debug)]
pub struct ElemBeam {
    pub cid: usize,
    x: DMatrix<f64>,
    pub umap: Vec<usize>,
    mdl: LinElast,
    area: f64,
    izz: f64,
    kmat: DMatrix<f64>,
    mmat: Option<DMatrix<f64>>,
    /// Global-to-local rotation
    tmat: DMatrix<f64>,
    zs_star: Vec<f64>,
}

impl ElemBeam {
    fn geometry(&self) -> Result<(f64, f64, f64)> {
        let dx = self.x[(1, 0)] - self.x[(0, 0)];
        let dy = self.x[(1, 1)] - self.x[(0, 1)];
        let l = (dx * dx + dy * dy).sqrt();
        if l < 1e-10 {
            return Err(SolverError::Geometric {
                cid: self.cid,
                ip: 0,
                reason: format!("beam has zero or near-zero length {l}"),
            });
        }
        Ok((l, dx / l, dy / l))
    }

    pub fn recompute(&mut self, with_m: bool) -> Result<()> {
        let (l, c, s) = self.geometry()?;
        let ea = self.mdl.e * self.area / l;
        let ei = self.mdl.e * self.izz;
        let (l2, l3) = (l * l, l * l * l);

        let k_local = DMatrix::from_row_slice(
            6,
            6,
            &[
                ea, 0.0, 0.0, -ea, 0.0, 0.0, //
                0.0, 12.0 * ei / l3, 6.0 * ei / l2, 0.0, -12.0 * ei / l3, 6.0 * ei / l2, //
                0.0, 6.0 * ei / l2, 4.0 * ei / l, 0.0, -6.0 * ei / l2, 2.0 * ei / l, //
                -ea, 0.0, 0.0, ea, 0.0, 0.0, //
                0.0, -12.0 * ei / l3, -6.0 * ei / l2, 0.0, 12.0 * ei / l3, -6.0 * ei / l2, //
                0.0, 6.0 * ei / l2, 2.0 * ei / l, 0.0, -6.0 * ei / l2, 4.0 * ei / l,
            ],
        );

        let mut t = DMatrix::zeros(6, 6);
        for node in 0..2 {
            let o = 3 * node;
            t[(o, o)] = c;
            t[(o, o + 1)] = s;
            t[(o + 1, o)] = -s;
            t[(o + 1, o + 1)] = c;
            t[(o + 2, o + 2)] = 1.0;
        }
        self.kmat = t.transpose() * k_local * &t;

        if with_m {
            let mc = self.mdl.rho * self.area * l / 420.0;
            let m_local = DMatrix::from_row_slice(
                6,
                6,
                &[
                    140.0, 0.0, 0.0, 70.0, 0.0, 0.0, //
                    0.0, 156.0, 22.0 * l, 0.0, 54.0, -13.0 * l, //
                    0.0, 22.0 * l, 4.0 * l2, 0.0, 13.0 * l, -3.0 * l2, //
                    70.0, 0.0, 0.0, 140.0, 0.0, 0.0, //
                    0.0, 54.0, 13.0 * l, 0.0, 156.0, -22.0 * l, //
                    0.0, -13.0 * l, -3.0 * l2, 0.0, -22.0 * l, 4.0 * l2,
                ],
            );
            self.mmat = Some(t.transpose() * (mc * m_local) * &t);
        }
        self.tmat = t;
        Ok(())
    }

    pub fn set_eqs(&mut self, eqs: &[Vec<usize>], _dual: &[usize]) -> Result<()> {
        if eqs.len() != 2 || eqs.iter().any(|g| g.len() < 3) {
            return Err(SolverError::Input(format!(
                "cell {}: beam expects 2 groups of 3 equations",
                self.cid
            )));
        }
        self.umap.clear();
        for g in eqs {
            self.umap.extend_from_slice(&g[..3]);
        }
        Ok(())
    }

    pub fn set_ele_conds(&mut self, key: &str, _f: Func, _extra: &str) -> Result<()> {
        Err(SolverError::Input(format!(
            "cell {}: beam does not support element condition '{key}'",
            self.cid
        )))
    }

    pub fn interp_star_vars(&mut self, sol: &Solution) -> Result<()> {
        for (k, &r) in self.umap.iter().enumerate() {
            self.zs_star[k] = sol.zet[r];
        }
        Ok(())
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        let u: Vec<f64> = self.umap.iter().map(|&r| sol.y[r]).collect();
        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };
        for p in 0..6 {
            let mut f = 0.0;
            for q in 0..6 {
                f += self.kmat[(p, q)] * u[q];
            }
            fb[self.umap[p]] -= wf * f;
        }
        if !sol.steady
            && let Some(m) = &self.mmat
        {
            for p in 0..6 {
                let mut f = 0.0;
                for q in 0..6 {
                    f += m[(p, q)] * (sol.dcs.a1 * u[q] - self.zs_star[q]);
                }
                fb[self.umap[p]] -= f;
            }
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, sol: &Solution, _first_it: bool) -> Result<()> {
        let wf = if sol.steady { 1.0 } else { sol.dcs.a8 };
        for p in 0..6 {
            for q in 0..6 {
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

    /// Local end forces from the current displacements
    fn end_forces(&self, sol: &Solution) -> Result<Vec<f64>> {
        self.geometry()?;
        let u: Vec<f64> = self.umap.iter().map(|&r| sol.y[r]).collect();
        let u_local = &self.tmat * DVector::from_vec(u);
        let k_local = &self.tmat * &self.kmat * self.tmat.transpose();
        let f = k_local * u_local;
        Ok(f.iter().copied().collect())
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    pub fn decode(&mut self, _v: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    pub fn nnz_estimate(&self) -> usize {
        36
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        vec![vec![
            (self.x[(0, 0)] + self.x[(1, 0)]) / 2.0,
            (self.x[(0, 1)] + self.x[(1, 1)]) / 2.0,
        ]]
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        vec!["T00", "M11", "M22"]
    }

    pub fn out_ip_vals(&self, map: &mut IpsMap, sol: &Solution) -> Result<()> {
        let f = self.end_forces(sol)?;
        // axial force (tension positive), end moments
        map.set("T00", 0, 1, f[3]);
        map.set("M11", 0, 1, f[2]);
        map.set("M22", 0, 1, f[5]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testutil;
    use pfem_model::materials::{Material, MaterialModel};
    use pfem_model::{FuncRegistry, MatRegistry, Mesh, ShapeKind};

    fn build() -> ElemKind {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(0, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![2.0, 0.0]);
        let cid = mesh.add_cell(-1, ShapeKind::Lin2, vec![0, 1]).unwrap();
        let mut mats = MatRegistry::new();
        mats.insert(Material {
            name: "steel".to_string(),
            model: MaterialModel::LinElast(LinElast { e: 200e9, nu: 0.3, rho: 7850.0 }),
        });
        let funcs = FuncRegistry::new();
        let mut edata = testutil::edata("beam", "steel");
        edata.extra = "!area:0.01 !izz:1e-5".to_string();
        let ctx = testutil::ctx(&mesh, cid, &edata, &mats, &funcs);
        let mut elem = alloc(&ctx).unwrap();
        elem.set_eqs(&[vec![0, 1, 2], vec![3, 4, 5]], &[]).unwrap();
        elem
    }

    #[test]
    fn stiffness_has_expected_bending_terms() {
        let elem = build();
        if let ElemKind::Beam(e) = &elem {
            let l = 2.0;
            let ei = 200e9 * 1e-5;
            assert!((e.kmat[(1, 1)] - 12.0 * ei / (l * l * l)).abs() < 1e-3);
            assert!((e.kmat[(2, 2)] - 4.0 * ei / l).abs() < 1e-3);
            assert!((e.kmat[(0, 0)] - 200e9 * 0.01 / l).abs() < 1e-3);
            // symmetry
            for p in 0..6 {
                for q in 0..6 {
                    assert!((e.kmat[(p, q)] - e.kmat[(q, p)]).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn cantilever_tip_load_deflection() {
        // fix node 0, apply F at node 1: v = F·L³/(3EI), θ = F·L²/(2EI)
        let elem = build();
        let (l, ei, f) = (2.0, 200e9 * 1e-5, -1000.0);
        let v = f * l * l * l / (3.0 * ei);
        let th = f * l * l / (2.0 * ei);
        let mut sol = Solution::new(6, 0, 2);
        sol.steady = true;
        sol.y[4] = v;
        sol.y[5] = th;
        let fb = testutil::rhs_of(&elem, &sol, 6);
        // the residual at the loaded DOF must equal -F (internal force F)
        assert!((fb[4] - (-f)).abs() < 1e-6 * f.abs());
        // no residual moment at the free end
        assert!(fb[5].abs() < 1e-4);
    }

    #[test]
    fn end_moment_output() {
        let elem = build();
        let (l, ei, f) = (2.0, 200e9 * 1e-5, -1000.0);
        let mut sol = Solution::new(6, 0, 2);
        sol.steady = true;
        sol.y[4] = f * l * l * l / (3.0 * ei);
        sol.y[5] = f * l * l / (2.0 * ei);
        let mut map = IpsMap::new();
        elem.out_ip_vals(&mut map, &sol).unwrap();
        // clamped-end moment of a tip-loaded cantilever: M = -F·L
        assert!((map.get("M11", 0) - (-f * l)).abs() < 1e-6 * (f * l).abs());
    }
}
