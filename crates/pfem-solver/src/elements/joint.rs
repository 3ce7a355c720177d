//! Two-node elastic joint bridging a pair of cells.
//!
//! The joint connects one vertex of each bridged cell with an isotropic
//! spring: K = k·[[I, −I], [−I, I]]. Its `connect` hook resolves the
//! bridged cells through the cid→element table and reports the extra
//! tangent nonzeros the coupling introduces.

use nalgebra::DVector;

use crate::elements::{ElemCtx, ElemKind, Info, ukeys};
use crate::error::{Result, SolverError};
use crate::ips::IpsMap;
use crate::lin_solver::Triplet;
use crate::solution::Solution;
use pfem_model::sim::keycode_f64;
use pfem_model::{Cell, ElemData, FaceCond, Func};

pub fn info(cell: &Cell, _fcs: &[FaceCond], _edata: &ElemData, ndim: usize) -> Result<Info> {
    let keys: Vec<String> = ukeys(ndim).iter().map(|s| s.to_string()).collect();
    let mut inf = Info::new();
    inf.dofs = vec![keys.clone(); cell.verts.len()];
    inf.t2 = keys;
    Ok(inf)
}

pub fn alloc(ctx: &ElemCtx) -> Result<ElemKind> {
    if ctx.cell.verts.len() != 2 {
        return Err(SolverError::Input(format!(
            "cell {}: joint requires 2 vertices, got {}",
            ctx.cell.id,
            ctx.cell.verts.len()
        )));
    }
    let k = keycode_f64(&ctx.edata.extra, "k").ok_or_else(|| {
        SolverError::Input(format!("cell {}: joint needs a '!k' stiffness parameter", ctx.cell.id))
    })?;
    Ok(ElemKind::Joint(ElemJoint {
        cid: ctx.cell.id,
        ndim: ctx.ndim,
        umap: Vec::new(),
        k,
        linked: None,
    }))
}

/// Elastic joint element
#[derive(Debug)]
pub struct ElemJoint {
    pub cid: usize,
    ndim: usize,
    pub umap: Vec<usize>,
    /// Spring stiffness per direction
    k: f64,
    /// Element indices of the bridged cells, set by `connect`
    linked: Option<(usize, usize)>,
}

impl ElemJoint {
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

    pub fn set_ele_conds(&mut self, key: &str, _f: Func, _extra: &str) -> Result<()> {
        Err(SolverError::Input(format!(
            "cell {}: joint does not support element condition '{key}'",
            self.cid
        )))
    }

    /// Resolve the bridged cells; returns the extra nonzeros added to Kb
    pub fn connect(&mut self, cid2elem: &[Option<usize>], cell: &Cell) -> Result<usize> {
        let (ca, cb) = cell.joint_pair.ok_or_else(|| {
            SolverError::Input(format!("cell {}: joint cell has no linked pair", self.cid))
        })?;
        let ea = cid2elem.get(ca).copied().flatten().ok_or_else(|| {
            SolverError::Input(format!("cell {}: linked cell {ca} has no element", self.cid))
        })?;
        let eb = cid2elem.get(cb).copied().flatten().ok_or_else(|| {
            SolverError::Input(format!("cell {}: linked cell {cb} has no element", self.cid))
        })?;
        self.linked = Some((ea, eb));
        let n = 2 * self.ndim;
        Ok(n * n)
    }

    pub fn interp_star_vars(&mut self, _sol: &Solution) -> Result<()> {
        Ok(())
    }

    pub fn add_to_rhs(&self, fb: &mut DVector<f64>, sol: &Solution) -> Result<()> {
        for i in 0..self.ndim {
            let du = sol.y[self.umap[i]] - sol.y[self.umap[self.ndim + i]];
            fb[self.umap[i]] -= self.k * du;
            fb[self.umap[self.ndim + i]] += self.k * du;
        }
        Ok(())
    }

    pub fn add_to_kb(&self, kb: &mut Triplet, _sol: &Solution, _first_it: bool) -> Result<()> {
        for i in 0..self.ndim {
            let (a, b) = (self.umap[i], self.umap[self.ndim + i]);
            kb.put(a, a, self.k);
            kb.put(a, b, -self.k);
            kb.put(b, a, -self.k);
            kb.put(b, b, self.k);
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
        4 * self.ndim
    }

    pub fn out_ip_coords(&self) -> Vec<Vec<f64>> {
        Vec::new()
    }

    pub fn out_ip_keys(&self) -> Vec<&'static str> {
        Vec::new()
    }

    pub fn out_ip_vals(&self, _map: &mut IpsMap, _sol: &Solution) -> Result<()> {
        Ok(())
    }
}
