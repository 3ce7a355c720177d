//! Domain: the stage builder and per-stage assembly state.
//!
//! When a stage begins the domain walks the mesh, asks the element
//! registry for each active cell's `Info`, allocates nodes and global
//! equation numbers, instantiates the elements this process owns, wires
//! connectors, installs element/face/node conditions, builds the
//! essential-BC constraint matrix and sizes the solution vectors and the
//! sparse triplet.
//!
//! Nodes and elements are domain-owned arenas indexed by integer ids;
//! elements reach nodes through the dense `vid2node` table and nothing
//! holds back-references to the domain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nalgebra::DVector;

use crate::elements::{ElemCtx, ElemKind, ElemRegistry};
use crate::error::{Result, SolverError};
use crate::essential_bcs::EssentialBcs;
use crate::geost::ColumnProfile;
use crate::lin_solver::{new_lin_solver, LinSolver, Triplet};
use crate::solution::Solution;
use pfem_io::{ElemStateBlob, Snapshot};
use pfem_model::sim::{keycode_f64, keycode_flag};
use pfem_model::{Cell, FaceCond, Func, IniSource, Sim};

/// One degree of freedom at a node
#[derive(Debug, Clone, PartialEq)]
pub struct Dof {
    pub key: String,
    pub eq: usize,
}

/// A node created for a vertex referenced by an active non-joint cell
#[derive(Debug, Clone)]
pub struct Node {
    pub vid: usize,
    pub tag: i32,
    pub dofs: Vec<Dof>,
}

impl Node {
    pub fn eq_of(&self, key: &str) -> Option<usize> {
        self.dofs.iter().find(|d| d.key == key).map(|d| d.eq)
    }
}

/// A point-natural (prescribed nodal flux/force) entry
#[derive(Debug, Clone)]
pub struct PtNat {
    pub eq: usize,
    pub f: Func,
}

/// Per-region domain
pub struct Domain {
    pub sim: Arc<Sim>,
    pub reg_idx: usize,
    pub ndim: usize,
    /// This process and the partition count (data-parallel runs)
    pub proc_id: usize,
    pub nprocs: usize,

    pub nodes: Vec<Node>,
    pub vid2node: Vec<Option<usize>>,
    pub elems: Vec<ElemKind>,
    pub cid2elem: Vec<Option<usize>>,
    /// Cells owned by this process
    pub my_cids: Vec<usize>,

    /// Capability subsets (indices into `elems`)
    pub stateful: Vec<usize>,
    pub connectors: Vec<usize>,
    pub extrapolators: Vec<usize>,
    pub fixed_km: Vec<usize>,
    pub out_ipers: Vec<usize>,

    /// First- and second-order-in-time equations
    pub t1eqs: Vec<usize>,
    pub t2eqs: Vec<usize>,
    /// Solution-key to flux-key map
    pub y2f: HashMap<String, String>,

    pub ny: usize,
    pub nlam: usize,
    pub nyb: usize,

    pub sol: Solution,
    pub fb: DVector<f64>,
    pub kb: Triplet,
    pub ebcs: EssentialBcs,
    pub pt_nat: Vec<PtNat>,
    pub lin_solver: Box<dyn LinSolver>,

    /// Cell tags currently switched off
    off_tags: HashSet<i32>,
}

impl Domain {
    pub fn new(sim: Arc<Sim>, reg_idx: usize, proc_id: usize, nprocs: usize) -> Result<Self> {
        let ndim = sim.ndim;
        let region = &sim.regions[reg_idx];
        if nprocs > 1 {
            let nparts = region.mesh.cells.iter().map(|c| c.part).max().unwrap_or(0) + 1;
            if nparts != nprocs {
                return Err(SolverError::Input(format!(
                    "region {reg_idx} has {nparts} partitions but {nprocs} processes"
                )));
            }
        }
        let off_tags: HashSet<i32> =
            region.edata.iter().filter(|e| e.inactive).map(|e| e.tag).collect();
        let lin_solver = new_lin_solver(&sim.solver.linsol)?;
        Ok(Self {
            sim,
            reg_idx,
            ndim,
            proc_id,
            nprocs,
            nodes: Vec::new(),
            vid2node: Vec::new(),
            elems: Vec::new(),
            cid2elem: Vec::new(),
            my_cids: Vec::new(),
            stateful: Vec::new(),
            connectors: Vec::new(),
            extrapolators: Vec::new(),
            fixed_km: Vec::new(),
            out_ipers: Vec::new(),
            t1eqs: Vec::new(),
            t2eqs: Vec::new(),
            y2f: HashMap::new(),
            ny: 0,
            nlam: 0,
            nyb: 0,
            sol: Solution::new(0, 0, 0),
            fb: DVector::zeros(0),
            kb: Triplet::new(0, 0, 0),
            ebcs: EssentialBcs::new(),
            pt_nat: Vec::new(),
            lin_solver,
            off_tags,
        })
    }

    fn cell_active(&self, cell: &Cell) -> bool {
        !self.off_tags.contains(&cell.tag)
            && self.sim.regions[self.reg_idx].edata_for(cell.tag).is_some()
    }

    fn cell_owned(&self, cell: &Cell) -> bool {
        self.nprocs <= 1 || cell.part == self.proc_id
    }

    /// Mesh face conditions plus the stage's additions for a cell
    fn effective_face_conds(&self, cell: &Cell, istg: usize) -> Vec<FaceCond> {
        let mut fcs = cell.face_conds.clone();
        for fbc in &self.sim.stages[istg].face_bcs {
            if fbc.cell_tags.contains(&cell.tag) {
                fcs.push(FaceCond {
                    key: fbc.key.clone(),
                    face: fbc.face,
                    func: fbc.func.clone(),
                    extra: fbc.extra.clone(),
                });
            }
        }
        fcs
    }

    /// Build the stage: nodes, equations, elements, conditions,
    /// constraints and workspaces
    pub fn set_stage(&mut self, istg: usize, registry: &ElemRegistry) -> Result<()> {
        let sim = Arc::clone(&self.sim);
        let stage = &sim.stages[istg];
        for tag in &stage.activate {
            self.off_tags.remove(tag);
        }
        for tag in &stage.deactivate {
            self.off_tags.insert(*tag);
        }

        // reset active lists
        self.nodes.clear();
        self.elems.clear();
        self.my_cids.clear();
        self.stateful.clear();
        self.connectors.clear();
        self.extrapolators.clear();
        self.fixed_km.clear();
        self.out_ipers.clear();
        self.t1eqs.clear();
        self.t2eqs.clear();
        self.y2f.clear();
        self.pt_nat.clear();
        self.ebcs = EssentialBcs::new();

        let region = &sim.regions[self.reg_idx];
        let mesh = &region.mesh;
        self.vid2node = vec![None; mesh.verts.len()];
        self.cid2elem = vec![None; mesh.cells.len()];

        let mut t1keys: HashSet<String> = HashSet::new();
        let mut t2keys: HashSet<String> = HashSet::new();
        let mut next_eq = 0usize;
        let mut infos: HashMap<usize, crate::elements::Info> = HashMap::new();

        // allocate nodes and equations; non-joint cells first so that
        // joint cells find their vertices already equipped
        for joints_pass in [false, true] {
            for cell in &mesh.cells {
                if !self.cell_active(cell) {
                    continue;
                }
                let Some(edata) = region.edata_for(cell.tag) else { continue };
                let is_joint = edata.kind == "joint";
                if is_joint != joints_pass {
                    continue;
                }
                let fcs = self.effective_face_conds(cell, istg);
                let info = registry.info(&edata.kind, cell, &fcs, edata, self.ndim)?;

                for (m, &vid) in cell.verts.iter().enumerate() {
                    if is_joint {
                        let nid = self.vid2node[vid].ok_or_else(|| {
                            SolverError::Input(format!(
                                "joint cell {} references vertex {} that no element equips",
                                cell.id, vid
                            ))
                        })?;
                        for key in &info.dofs[m] {
                            if self.nodes[nid].eq_of(key).is_none() {
                                return Err(SolverError::Input(format!(
                                    "joint cell {} needs DOF '{key}' at vertex {vid}",
                                    cell.id
                                )));
                            }
                        }
                        continue;
                    }
                    let nid = match self.vid2node[vid] {
                        Some(nid) => nid,
                        None => {
                            let nid = self.nodes.len();
                            self.nodes.push(Node {
                                vid,
                                tag: mesh.verts[vid].tag,
                                dofs: Vec::new(),
                            });
                            self.vid2node[vid] = Some(nid);
                            nid
                        }
                    };
                    for key in &info.dofs[m] {
                        if self.nodes[nid].eq_of(key).is_none() {
                            self.nodes[nid].dofs.push(Dof { key: key.clone(), eq: next_eq });
                            next_eq += 1;
                        }
                    }
                }
                for (yk, fk) in &info.y2f {
                    self.y2f.insert(yk.clone(), fk.clone());
                }
                t1keys.extend(info.t1.iter().cloned());
                t2keys.extend(info.t2.iter().cloned());
                infos.insert(cell.id, info);
            }
        }
        self.ny = next_eq;

        // equation partition by time order
        for node in &self.nodes {
            for dof in &node.dofs {
                if t1keys.contains(&dof.key) {
                    self.t1eqs.push(dof.eq);
                } else if t2keys.contains(&dof.key) {
                    self.t2eqs.push(dof.eq);
                }
            }
        }

        // instantiate the elements this process owns
        let mut nnz_kb = 0usize;
        for cell in &mesh.cells {
            if !self.cell_active(cell) || !self.cell_owned(cell) {
                continue;
            }
            let Some(edata) = region.edata_for(cell.tag) else { continue };
            let info = &infos[&cell.id];
            let fcs = self.effective_face_conds(cell, istg);

            let nv = cell.verts.len();
            let mut x = nalgebra::DMatrix::zeros(nv, self.ndim);
            for (m, &vid) in cell.verts.iter().enumerate() {
                for i in 0..self.ndim {
                    x[(m, i)] = mesh.verts[vid].x[i];
                }
            }
            let ctx = ElemCtx {
                ndim: self.ndim,
                cell,
                x,
                face_conds: fcs,
                edata,
                mats: &sim.mats,
                funcs: &sim.funcs,
                axisym: sim.axisym,
                pstress: sim.pstress,
            };
            let mut elem = registry.alloc(&edata.kind, &ctx)?;

            // equation groups per local node, ordered like the info keys
            let mut eqs: Vec<Vec<usize>> = Vec::with_capacity(nv);
            let mut dual: Vec<usize> = Vec::new();
            for (m, &vid) in cell.verts.iter().enumerate() {
                let nid = self.node_of(vid)?;
                let node = &self.nodes[nid];
                let mut group = Vec::with_capacity(info.dofs[m].len());
                for key in &info.dofs[m] {
                    group.push(node.eq_of(key).ok_or_else(|| {
                        SolverError::Input(format!(
                            "cell {}: vertex {vid} is missing DOF '{key}'",
                            cell.id
                        ))
                    })?);
                }
                if let Some(feq) = node.eq_of("fl")
                    && info.dofs[m].iter().any(|k| k == "fl")
                {
                    dual.push(feq);
                }
                eqs.push(group);
            }
            elem.set_eqs(&eqs, &dual)?;

            nnz_kb += elem.nnz_estimate();
            let idx = self.elems.len();
            if elem.is_stateful() {
                self.stateful.push(idx);
            }
            if elem.is_connector() {
                self.connectors.push(idx);
            }
            if elem.is_extrapolator() {
                self.extrapolators.push(idx);
            }
            if elem.has_fixed_km() {
                self.fixed_km.push(idx);
            }
            if elem.is_out_iper() {
                self.out_ipers.push(idx);
            }
            self.cid2elem[cell.id] = Some(idx);
            self.my_cids.push(cell.id);
            self.elems.push(elem);
        }

        // wire connectors
        for k in 0..self.connectors.len() {
            let idx = self.connectors[k];
            let cid = self.elems[idx].id();
            let cell = &mesh.cells[cid];
            nnz_kb += self.elems[idx].connect(&self.cid2elem, cell)?;
        }

        // element-wide conditions
        for ec in &stage.ele_conds {
            for (key, fname) in ec.keys.iter().zip(&ec.funcs) {
                let f = sim.funcs.get(fname)?;
                for tag in &ec.tags {
                    for &cid in mesh.cells_with_tag(*tag) {
                        if let Some(idx) = self.cid2elem[cid] {
                            self.elems[idx].set_ele_conds(key, f.clone(), &ec.extra)?;
                        }
                    }
                }
            }
        }

        // vertex conditions: essential keys to the constraint manager,
        // natural keys to the point table
        let f2y: HashMap<&String, &String> = self.y2f.iter().map(|(y, f)| (f, y)).collect();
        for nbc in &stage.node_bcs {
            let f = sim.funcs.get(&nbc.func)?;
            let mut vids: Vec<usize> = nbc
                .vert_tags
                .iter()
                .flat_map(|t| mesh.verts_with_tag(*t).iter().copied())
                .collect();
            vids.sort_unstable();
            vids.dedup();

            match nbc.key.as_str() {
                "rigid" => {
                    for pair in vids.chunks(2) {
                        if pair.len() != 2 {
                            return Err(SolverError::Input(
                                "'rigid' needs an even number of tagged vertices".to_string(),
                            ));
                        }
                        let na = self.node_of(pair[0])?;
                        let nb = self.node_of(pair[1])?;
                        let keys: Vec<String> =
                            self.nodes[na].dofs.iter().map(|d| d.key.clone()).collect();
                        for key in keys {
                            if let (Some(ea), Some(eb)) =
                                (self.nodes[na].eq_of(&key), self.nodes[nb].eq_of(&key))
                            {
                                self.ebcs.set_rigid(ea, eb)?;
                            }
                        }
                    }
                }
                "incline2d" => {
                    let alpha = keycode_f64(&nbc.extra, "alpha").unwrap_or(0.0);
                    for &vid in &vids {
                        let nid = self.node_of(vid)?;
                        let ex = self.nodes[nid].eq_of("ux").ok_or_else(|| {
                            SolverError::Input(format!("vertex {vid} has no 'ux' for incline2d"))
                        })?;
                        let ey = self.nodes[nid].eq_of("uy").ok_or_else(|| {
                            SolverError::Input(format!("vertex {vid} has no 'uy' for incline2d"))
                        })?;
                        self.ebcs.set_incline2d(ex, ey, alpha)?;
                    }
                }
                "hst" => {
                    let gamw = keycode_f64(&nbc.extra, "gamw").unwrap_or(10.0);
                    let zwater = keycode_f64(&nbc.extra, "zwater").unwrap_or(0.0);
                    for &vid in &vids {
                        let nid = self.node_of(vid)?;
                        let eq = self.nodes[nid].eq_of("pl").ok_or_else(|| {
                            SolverError::Input(format!("vertex {vid} has no 'pl' for hst"))
                        })?;
                        let z = mesh.verts[vid].x[self.ndim - 1];
                        let pl_hst = (gamw * (zwater - z)).max(0.0);
                        self.ebcs.set_hydrostatic(eq, pl_hst, f.clone())?;
                    }
                }
                key => {
                    for &vid in &vids {
                        let nid = self.node_of(vid)?;
                        if let Some(eq) = self.nodes[nid].eq_of(key) {
                            if keycode_flag(&nbc.extra, "ini_mult") {
                                self.ebcs.set_initial_valued(key, eq, f.clone())?;
                            } else {
                                self.ebcs.set_single(key, eq, f.clone())?;
                            }
                        } else if let Some(ykey) = f2y.get(&key.to_string()) {
                            if let Some(eq) = self.nodes[nid].eq_of(ykey) {
                                self.pt_nat.push(PtNat { eq, f: f.clone() });
                            }
                        } else {
                            return Err(SolverError::Input(format!(
                                "vertex {vid} has no DOF or flux named '{key}'"
                            )));
                        }
                    }
                }
            }
        }

        // constraint matrix, workspaces
        let (nlam, nnz_a) = self.ebcs.build(self.ny)?;
        self.nlam = nlam;
        self.nyb = self.ny + nlam;
        self.sol = Solution::new(self.ny, nlam, mesh.verts.len());
        self.sol.steady = sim.steady;
        self.sol.axisym = sim.axisym;
        self.sol.pstress = sim.pstress;
        self.fb = DVector::zeros(self.nyb);
        self.kb = Triplet::new(self.nyb, self.nyb, nnz_kb + 2 * nnz_a);

        self.lin_solver.free();
        self.lin_solver.init(&self.kb, false, false)?;
        Ok(())
    }

    fn node_of(&self, vid: usize) -> Result<usize> {
        self.vid2node
            .get(vid)
            .copied()
            .flatten()
            .ok_or_else(|| SolverError::Input(format!("vertex {vid} has no active node")))
    }

    /// Apply one of the four initial-value sources of a stage
    pub fn set_ini_values(&mut self, istg: usize) -> Result<()> {
        let sim = Arc::clone(&self.sim);
        let stage = &sim.stages[istg];
        let region = &sim.regions[self.reg_idx];
        let mesh = &region.mesh;

        match &stage.ini {
            None => {
                for k in 0..self.stateful.len() {
                    let i = self.stateful[k];
                    self.elems[i].set_ini_ivs(&self.sol, None)?;
                }
            }
            Some(IniSource::Fcn { items }) => {
                for (key, fname) in items {
                    let f = sim.funcs.get(fname)?;
                    for node in &self.nodes {
                        if let Some(eq) = node.eq_of(key) {
                            self.sol.y[eq] = f.f(0.0, &mesh.verts[node.vid].x);
                        }
                    }
                }
                for k in 0..self.stateful.len() {
                    let i = self.stateful[k];
                    self.elems[i].set_ini_ivs(&self.sol, None)?;
                }
            }
            Some(IniSource::Stress { sx, sy, sz }) => {
                for k in 0..self.stateful.len() {
                    let i = self.stateful[k];
                    let nip = self.elems[i].out_ip_coords().len();
                    let mut ivs = HashMap::new();
                    ivs.insert("sx".to_string(), vec![*sx; nip]);
                    ivs.insert("sy".to_string(), vec![*sy; nip]);
                    ivs.insert("sz".to_string(), vec![*sz; nip]);
                    self.elems[i].set_ini_ivs(&self.sol, Some(&ivs))?;
                }
            }
            Some(IniSource::Porous(inip)) => {
                let profile = ColumnProfile::new(mesh, inip, |tag| {
                    let ed = region.edata_for(tag).ok_or_else(|| {
                        SolverError::Input(format!("geostatic layer tag {tag} has no element data"))
                    })?;
                    sim.mats
                        .get_porous(&ed.mat)
                        .or_else(|_| sim.mats.get_porous(&ed.mat_extra))
                        .map_err(SolverError::from)
                })?;
                let layer_tags: HashSet<i32> = profile.tags().into_iter().collect();

                // nodal pressures
                for node in &self.nodes {
                    let z = mesh.verts[node.vid].x[self.ndim - 1];
                    if let Some(eq) = node.eq_of("pl") {
                        self.sol.y[eq] = profile.pl_at(z);
                    }
                    if let Some(eq) = node.eq_of("pg") {
                        self.sol.y[eq] = 0.0;
                    }
                }

                // integration-point states
                for k in 0..self.stateful.len() {
                    let i = self.stateful[k];
                    let cid = self.elems[i].id();
                    if !layer_tags.contains(&mesh.cells[cid].tag) {
                        self.elems[i].set_ini_ivs(&self.sol, None)?;
                        continue;
                    }
                    let coords = self.elems[i].out_ip_coords();
                    let nip = coords.len();
                    let mut svv = vec![0.0; nip];
                    let mut shv = vec![0.0; nip];
                    let mut plv = vec![0.0; nip];
                    let effective = matches!(self.elems[i], ElemKind::SolidLiquid(_));
                    for (idx, xip) in coords.iter().enumerate() {
                        let st = profile.state_at(xip[self.ndim - 1]);
                        plv[idx] = st.pl;
                        let sv_eff = st.sv + st.pl;
                        let sh_eff = st.k0 * sv_eff;
                        if effective {
                            svv[idx] = sv_eff;
                            shv[idx] = sh_eff;
                        } else {
                            svv[idx] = st.sv;
                            shv[idx] = sh_eff - st.pl;
                        }
                    }
                    let mut ivs = HashMap::new();
                    ivs.insert("pl".to_string(), plv);
                    if self.ndim == 2 {
                        // vertical is y; out-of-plane matches horizontal
                        ivs.insert("sx".to_string(), shv.clone());
                        ivs.insert("sy".to_string(), svv);
                        ivs.insert("sz".to_string(), shv);
                    } else {
                        ivs.insert("sx".to_string(), shv.clone());
                        ivs.insert("sy".to_string(), shv);
                        ivs.insert("sz".to_string(), svv);
                    }
                    self.elems[i].set_ini_ivs(&self.sol, Some(&ivs))?;
                }
            }
            Some(IniSource::Import { path, tidx, reset_u }) => {
                let snap = pfem_io::load_snapshot(path, *tidx, self.ny)?;
                self.apply_snapshot(&snap, *reset_u)?;
            }
        }

        self.ebcs.capture_initial(&self.sol.y);
        Ok(())
    }

    /// Assemble the global residual; returns its norm
    pub fn assemble_rhs(&mut self) -> Result<f64> {
        self.fb.fill(0.0);
        for e in &self.elems {
            e.add_to_rhs(&mut self.fb, &self.sol)?;
        }
        for pn in &self.pt_nat {
            self.fb[pn.eq] += pn.f.f(self.sol.t, &[]);
        }
        self.ebcs.add_to_rhs(&mut self.fb, self.ny, &self.sol);
        Ok(self.fb.norm())
    }

    /// Assemble the augmented tangent
    pub fn assemble_kb(&mut self, first_it: bool) -> Result<()> {
        self.kb.reset();
        for e in &self.elems {
            e.add_to_kb(&mut self.kb, &self.sol, first_it)?;
        }
        self.ebcs.add_to_kb(&mut self.kb, self.ny);
        Ok(())
    }

    /// Factorize and solve for the Newton increment, then update the
    /// solution in place
    pub fn solve_and_update(&mut self) -> Result<()> {
        self.lin_solver.factorize(&self.kb)?;
        let mut delta = DVector::zeros(self.nyb);
        self.lin_solver.solve(&mut delta, &self.fb, false)?;
        for i in 0..self.ny {
            self.sol.y[i] += delta[i];
            self.sol.dy[i] += delta[i];
        }
        for i in 0..self.nlam {
            self.sol.lam[i] += delta[self.ny + i];
        }
        Ok(())
    }

    /// Compute the star predictors from the previous-step state
    pub fn compute_stars(&mut self) {
        let dcs = self.sol.dcs;
        for &r in &self.t1eqs {
            self.sol.psi[r] = dcs.beta1 * self.sol.y[r] + dcs.beta2 * self.sol.dydt[r];
        }
        for &r in &self.t2eqs {
            self.sol.zet[r] = dcs.a1 * self.sol.y[r]
                + dcs.a2 * self.sol.dydt[r]
                + dcs.a3 * self.sol.d2ydt2[r];
            self.sol.chi[r] = dcs.a4 * self.sol.y[r]
                + dcs.a5 * self.sol.dydt[r]
                + dcs.a6 * self.sol.d2ydt2[r];
        }
    }

    /// Recover the time derivatives from the converged Y and the frozen
    /// stars (inverse integrator relations)
    pub fn recover_derivs(&mut self) {
        let dcs = self.sol.dcs;
        for &r in &self.t1eqs {
            self.sol.dydt[r] = dcs.beta1 * self.sol.y[r] - self.sol.psi[r];
        }
        for &r in &self.t2eqs {
            self.sol.d2ydt2[r] = dcs.a1 * self.sol.y[r] - self.sol.zet[r];
            self.sol.dydt[r] = dcs.a4 * self.sol.y[r] - self.sol.chi[r];
        }
    }

    /// Interpolate the frozen stars into every element
    pub fn interp_star_vars(&mut self) -> Result<()> {
        for e in &mut self.elems {
            e.interp_star_vars(&self.sol)?;
        }
        Ok(())
    }

    /// After convergence: update internal variables from ΔY. The backup
    /// sync is separate (`commit_step`) so a failure in a sibling domain
    /// can still roll this one back.
    pub fn update_ivs(&mut self) -> Result<()> {
        for k in 0..self.stateful.len() {
            let i = self.stateful[k];
            self.elems[i].update(&self.sol)?;
        }
        Ok(())
    }

    /// Seal the step: sync States into StatesBkp and refresh the
    /// node-extrapolated values
    pub fn commit_step(&mut self) -> Result<()> {
        for k in 0..self.stateful.len() {
            let i = self.stateful[k];
            self.elems[i].backup_ivs(false)?;
        }
        self.sol.reset_ext();
        for &i in &self.extrapolators {
            let e = &self.elems[i];
            e.add_to_ext(&mut self.sol)?;
        }
        Ok(())
    }

    /// Roll back the solution and every stateful element to the last
    /// converged step
    pub fn rollback(&mut self) -> Result<()> {
        self.sol.restore();
        for k in 0..self.stateful.len() {
            let i = self.stateful[k];
            self.elems[i].restore_ivs(false)?;
        }
        Ok(())
    }

    /// Collect the integration-point output of every capable element,
    /// keyed by cell id
    pub fn out_ip_maps(&self) -> Result<Vec<(usize, crate::ips::IpsMap)>> {
        let mut out = Vec::with_capacity(self.out_ipers.len());
        for &i in &self.out_ipers {
            let mut map = crate::ips::IpsMap::new();
            self.elems[i].out_ip_vals(&mut map, &self.sol)?;
            out.push((self.elems[i].id(), map));
        }
        Ok(out)
    }

    /// Snapshot the full domain state
    pub fn snapshot(&self, tidx: usize, stage: usize) -> Result<Snapshot> {
        let mut elem_states = Vec::with_capacity(self.stateful.len());
        for &i in &self.stateful {
            elem_states.push(ElemStateBlob { cid: self.elems[i].id(), data: self.elems[i].encode()? });
        }
        Ok(Snapshot {
            schema_version: 1,
            tidx,
            stage,
            time: self.sol.t,
            dt: self.sol.dt,
            y: self.sol.y.iter().copied().collect(),
            dydt: self.sol.dydt.iter().copied().collect(),
            d2ydt2: self.sol.d2ydt2.iter().copied().collect(),
            psi: self.sol.psi.iter().copied().collect(),
            zet: self.sol.zet.iter().copied().collect(),
            chi: self.sol.chi.iter().copied().collect(),
            lam: self.sol.lam.iter().copied().collect(),
            elem_states,
        })
    }

    /// Restore a snapshot into this freshly built domain
    pub fn apply_snapshot(&mut self, snap: &Snapshot, reset_u: bool) -> Result<()> {
        if snap.ny() != self.ny {
            return Err(SolverError::Restart(format!(
                "snapshot has ny = {} but the domain has ny = {}",
                snap.ny(),
                self.ny
            )));
        }
        if snap.lam.len() != self.nlam {
            return Err(SolverError::Restart(format!(
                "snapshot has {} multipliers but the domain has {}",
                snap.lam.len(),
                self.nlam
            )));
        }
        self.sol.t = snap.time;
        self.sol.dt = snap.dt;
        self.sol.y.copy_from_slice(&snap.y);
        self.sol.dydt.copy_from_slice(&snap.dydt);
        self.sol.d2ydt2.copy_from_slice(&snap.d2ydt2);
        self.sol.psi.copy_from_slice(&snap.psi);
        self.sol.zet.copy_from_slice(&snap.zet);
        self.sol.chi.copy_from_slice(&snap.chi);
        self.sol.lam.copy_from_slice(&snap.lam);

        for blob in &snap.elem_states {
            let idx = self.cid2elem.get(blob.cid).copied().flatten().ok_or_else(|| {
                SolverError::Restart(format!("snapshot references unknown cell {}", blob.cid))
            })?;
            self.elems[idx].decode(&blob.data)?;
        }

        if reset_u {
            for node in &self.nodes {
                for dof in &node.dofs {
                    if matches!(dof.key.as_str(), "ux" | "uy" | "uz") {
                        self.sol.y[dof.eq] = 0.0;
                        self.sol.dy[dof.eq] = 0.0;
                        self.sol.dydt[dof.eq] = 0.0;
                        self.sol.d2ydt2[dof.eq] = 0.0;
                    }
                }
            }
            for k in 0..self.stateful.len() {
                let i = self.stateful[k];
                self.elems[i].ureset(&self.sol)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfem_model::materials::{Diffusion, Material, MaterialModel};
    use pfem_model::{
        ElemData, FuncRegistry, MatRegistry, Mesh, NodeBc, Region, ShapeKind, Stage, StageControl,
        SolverData,
    };

    fn two_quad_sim() -> Arc<Sim> {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 1.0), (1.0, 1.0), (2.0, 1.0)] {
            mesh.add_vert(if x == 0.0 { -100 } else { 0 }, vec![x, y]);
        }
        mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 4, 3]).unwrap();
        mesh.add_cell(-1, ShapeKind::Qua4, vec![1, 2, 5, 4]).unwrap();

        let mut mats = MatRegistry::new();
        mats.insert(Material {
            name: "m1".to_string(),
            model: MaterialModel::Diffusion(Diffusion::isotropic(1.0, 1.0, [1.0, 0.0, 0.0, 0.0])),
        });
        let mut funcs = FuncRegistry::new();
        funcs.insert("zero", Func::Zero);
        funcs.insert("dt", Func::Cte { c: 0.1 });

        Arc::new(Sim {
            name: "two-quads".to_string(),
            ndim: 2,
            steady: true,
            axisym: false,
            pstress: false,
            regions: vec![Region {
                mesh,
                edata: vec![ElemData {
                    tag: -1,
                    kind: "diffusion".to_string(),
                    mat: "m1".to_string(),
                    mat_extra: String::new(),
                    extra: String::new(),
                    inactive: false,
                    nip: 0,
                    nip_face: 0,
                }],
            }],
            mats,
            funcs,
            stages: vec![Stage {
                name: "s1".to_string(),
                activate: vec![],
                deactivate: vec![],
                ini: None,
                ele_conds: vec![],
                face_bcs: vec![],
                node_bcs: vec![NodeBc {
                    vert_tags: vec![-100],
                    key: "u".to_string(),
                    func: "zero".to_string(),
                    extra: String::new(),
                }],
                control: StageControl { tf: 1.0, dt: "dt".to_string(), dtout: String::new(), skip: false },
            }],
            solver: SolverData::default(),
            out_dir: String::new(),
        })
    }

    #[test]
    fn shared_vertices_share_equations() {
        let sim = two_quad_sim();
        let reg = ElemRegistry::full();
        let mut dom = Domain::new(sim, 0, 0, 1).unwrap();
        dom.set_stage(0, &reg).unwrap();

        // 6 vertices, one scalar DOF each
        assert_eq!(dom.ny, 6);
        assert_eq!(dom.elems.len(), 2);
        // vertices 1 and 4 are shared: their equations appear in both maps
        let eq1 = dom.nodes[dom.vid2node[1].unwrap()].eq_of("u").unwrap();
        match (&dom.elems[0], &dom.elems[1]) {
            (ElemKind::Diffusion(a), ElemKind::Diffusion(b)) => {
                assert!(a.umap.contains(&eq1));
                assert!(b.umap.contains(&eq1));
            }
            _ => panic!("expected diffusion elements"),
        }
        // both tagged vertices constrained
        assert_eq!(dom.nlam, 2);
        assert_eq!(dom.nyb, 8);
        // scalar diffusion is first order in time
        assert_eq!(dom.t1eqs.len(), 6);
        assert!(dom.t2eqs.is_empty());
    }

    #[test]
    fn deactivated_tag_drops_cells_and_nodes() {
        let sim = two_quad_sim();
        let reg = ElemRegistry::full();
        let mut dom = Domain::new(Arc::clone(&sim), 0, 0, 1).unwrap();
        dom.off_tags.insert(-1);
        dom.set_stage(0, &reg).unwrap();
        assert_eq!(dom.elems.len(), 0);
        assert_eq!(dom.ny, 0);
    }

    #[test]
    fn partition_mismatch_is_input_error() {
        let sim = two_quad_sim();
        let err = Domain::new(sim, 0, 0, 3);
        assert!(matches!(err, Err(SolverError::Input(_))));
    }

    #[test]
    fn snapshot_roundtrip_restores_vectors() {
        let sim = two_quad_sim();
        let reg = ElemRegistry::full();
        let mut dom = Domain::new(sim, 0, 0, 1).unwrap();
        dom.set_stage(0, &reg).unwrap();
        for i in 0..dom.ny {
            dom.sol.y[i] = i as f64 + 0.5;
        }
        dom.sol.t = 3.25;
        let snap = dom.snapshot(7, 0).unwrap();

        let sim2 = two_quad_sim();
        let mut dom2 = Domain::new(sim2, 0, 0, 1).unwrap();
        dom2.set_stage(0, &reg).unwrap();
        dom2.apply_snapshot(&snap, false).unwrap();
        assert_eq!(dom2.sol.t, 3.25);
        for i in 0..dom2.ny {
            assert_eq!(dom2.sol.y[i], i as f64 + 0.5);
        }
    }
}
