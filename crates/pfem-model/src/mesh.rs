//! Mesh data structures for finite element analysis.
//!
//! A mesh is an immutable collection of vertices and cells. Cells carry a
//! geometric shape kind, an ordered vertex list, optional face
//! boundary-condition records and an optional partition id for
//! data-parallel runs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ModelError, Result};

/// Geometric shape of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// 2-node line
    Lin2,
    /// 3-node triangle
    Tri3,
    /// 4-node quadrilateral
    Qua4,
    /// 8-node (serendipity) quadrilateral
    Qua8,
    /// 9-node (Lagrangian) quadrilateral
    Qua9,
    /// 8-node hexahedron
    Hex8,
}

impl ShapeKind {
    /// Number of vertices for this shape
    pub fn nverts(&self) -> usize {
        match self {
            ShapeKind::Lin2 => 2,
            ShapeKind::Tri3 => 3,
            ShapeKind::Qua4 => 4,
            ShapeKind::Qua8 => 8,
            ShapeKind::Qua9 => 9,
            ShapeKind::Hex8 => 8,
        }
    }

    /// Intrinsic (natural coordinate) dimension
    pub fn gdim(&self) -> usize {
        match self {
            ShapeKind::Lin2 => 1,
            ShapeKind::Hex8 => 3,
            _ => 2,
        }
    }

    /// Number of boundary faces (edges in 2D)
    pub fn nfaces(&self) -> usize {
        match self {
            ShapeKind::Lin2 => 2,
            ShapeKind::Tri3 => 3,
            ShapeKind::Qua4 | ShapeKind::Qua8 | ShapeKind::Qua9 => 4,
            ShapeKind::Hex8 => 6,
        }
    }

    /// Local vertex indices of face `f`, ordered so that the computed
    /// normal points outward for counter-clockwise cell numbering.
    pub fn face_verts(&self, f: usize) -> &'static [usize] {
        const TRI3: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
        const QUA4: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
        const QUA8: [&[usize]; 4] = [&[0, 1, 4], &[1, 2, 5], &[2, 3, 6], &[3, 0, 7]];
        const HEX8: [&[usize]; 6] = [
            &[0, 3, 2, 1],
            &[4, 5, 6, 7],
            &[0, 1, 5, 4],
            &[1, 2, 6, 5],
            &[2, 3, 7, 6],
            &[0, 4, 7, 3],
        ];
        const LIN2: [&[usize]; 2] = [&[0], &[1]];
        match self {
            ShapeKind::Lin2 => LIN2[f],
            ShapeKind::Tri3 => TRI3[f],
            ShapeKind::Qua4 => QUA4[f],
            ShapeKind::Qua8 | ShapeKind::Qua9 => QUA8[f],
            ShapeKind::Hex8 => HEX8[f],
        }
    }

    /// Number of corner vertices. Mixed formulations attach a
    /// reduced-order sub-shape (e.g. pressure on the corners of a Qua9)
    /// to satisfy the LBB condition.
    pub fn ncorners(&self) -> usize {
        match self {
            ShapeKind::Qua8 | ShapeKind::Qua9 => 4,
            other => other.nverts(),
        }
    }

    /// Reduced-order sub-shape spanning the corner vertices, if any.
    pub fn corner_shape(&self) -> ShapeKind {
        match self {
            ShapeKind::Qua8 | ShapeKind::Qua9 => ShapeKind::Qua4,
            other => *other,
        }
    }
}

/// A vertex in the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vert {
    /// Vertex id (dense, 0-based)
    pub id: usize,
    /// Tag used to select vertices for boundary conditions
    pub tag: i32,
    /// Coordinates (length = mesh ndim)
    pub x: Vec<f64>,
}

impl Vert {
    pub fn new(id: usize, tag: i32, x: Vec<f64>) -> Self {
        Self { id, tag, x }
    }
}

/// A face boundary-condition record attached to a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCond {
    /// Condition key, e.g. "qn", "qb", "seep", "qc"
    pub key: String,
    /// Local face index
    pub face: usize,
    /// Name of the time function in the function registry
    pub func: String,
    /// Key-coded extra flags, e.g. "!kappa:1e3 !sramp:1"
    #[serde(default)]
    pub extra: String,
}

/// A cell in the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Cell id (dense, 0-based)
    pub id: usize,
    /// Tag used to attach element data and stage conditions
    pub tag: i32,
    /// Geometric shape
    pub shape: ShapeKind,
    /// Ordered vertex ids
    pub verts: Vec<usize>,
    /// Face boundary-condition records
    #[serde(default)]
    pub face_conds: Vec<FaceCond>,
    /// Partition owning this cell (data-parallel runs)
    #[serde(default)]
    pub part: usize,
    /// Cell ids bridged by a joint cell
    #[serde(default)]
    pub joint_pair: Option<(usize, usize)>,
}

impl Cell {
    /// Validate vertex count against the shape
    pub fn validate(&self) -> Result<()> {
        let expected = self.shape.nverts();
        if self.verts.len() != expected {
            return Err(ModelError::Mesh(format!(
                "cell {} of shape {:?} has {} vertices but expected {}",
                self.id,
                self.shape,
                self.verts.len(),
                expected
            )));
        }
        for fc in &self.face_conds {
            if fc.face >= self.shape.nfaces() {
                return Err(ModelError::Mesh(format!(
                    "cell {} has face condition on face {} but shape {:?} has {} faces",
                    self.id,
                    fc.face,
                    self.shape,
                    self.shape.nfaces()
                )));
            }
        }
        Ok(())
    }
}

/// Complete finite element mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    /// Space dimension (2 or 3)
    pub ndim: usize,
    /// All vertices, indexed by id
    pub verts: Vec<Vert>,
    /// All cells, indexed by id
    pub cells: Vec<Cell>,
    /// Vertex ids by tag
    #[serde(skip)]
    vtag2verts: HashMap<i32, Vec<usize>>,
    /// Cell ids by tag
    #[serde(skip)]
    ctag2cells: HashMap<i32, Vec<usize>>,
}

impl Mesh {
    /// Create an empty mesh
    pub fn new(ndim: usize) -> Self {
        Self {
            ndim,
            verts: Vec::new(),
            cells: Vec::new(),
            vtag2verts: HashMap::new(),
            ctag2cells: HashMap::new(),
        }
    }

    /// Add a vertex; ids must arrive dense and in order
    pub fn add_vert(&mut self, tag: i32, x: Vec<f64>) -> usize {
        let id = self.verts.len();
        self.verts.push(Vert::new(id, tag, x));
        self.vtag2verts.entry(tag).or_default().push(id);
        id
    }

    /// Add a cell; ids must arrive dense and in order
    pub fn add_cell(&mut self, tag: i32, shape: ShapeKind, verts: Vec<usize>) -> Result<usize> {
        let id = self.cells.len();
        let cell = Cell {
            id,
            tag,
            shape,
            verts,
            face_conds: Vec::new(),
            part: 0,
            joint_pair: None,
        };
        cell.validate()?;
        self.cells.push(cell);
        self.ctag2cells.entry(tag).or_default().push(id);
        Ok(id)
    }

    /// Attach a face boundary condition to a cell
    pub fn set_face_cond(&mut self, cid: usize, key: &str, face: usize, func: &str, extra: &str) {
        self.cells[cid].face_conds.push(FaceCond {
            key: key.to_string(),
            face,
            func: func.to_string(),
            extra: extra.to_string(),
        });
    }

    /// Rebuild the tag lookup indices (after deserialisation)
    pub fn build_lookups(&mut self) {
        self.vtag2verts.clear();
        self.ctag2cells.clear();
        for v in &self.verts {
            self.vtag2verts.entry(v.tag).or_default().push(v.id);
        }
        for c in &self.cells {
            self.ctag2cells.entry(c.tag).or_default().push(c.id);
        }
    }

    /// Vertex ids carrying a tag
    pub fn verts_with_tag(&self, tag: i32) -> &[usize] {
        self.vtag2verts.get(&tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cell ids carrying a tag
    pub fn cells_with_tag(&self, tag: i32) -> &[usize] {
        self.ctag2cells.get(&tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Validate vertex references and coordinate dimensions
    pub fn validate(&self) -> Result<()> {
        for v in &self.verts {
            if v.x.len() != self.ndim {
                return Err(ModelError::Mesh(format!(
                    "vertex {} has {} coordinates but mesh is {}D",
                    v.id,
                    v.x.len(),
                    self.ndim
                )));
            }
        }
        for cell in &self.cells {
            cell.validate()?;
            for &vid in &cell.verts {
                if vid >= self.verts.len() {
                    return Err(ModelError::Mesh(format!(
                        "cell {} references non-existent vertex {}",
                        cell.id, vid
                    )));
                }
            }
        }
        Ok(())
    }

    /// Bounding z-range of the cells carrying any of the given tags
    pub fn zrange_of_tags(&self, tags: &[i32]) -> Option<(f64, f64)> {
        let iz = self.ndim - 1;
        let mut zmin = f64::INFINITY;
        let mut zmax = f64::NEG_INFINITY;
        let mut found = false;
        for &tag in tags {
            for &cid in self.cells_with_tag(tag) {
                for &vid in &self.cells[cid].verts {
                    let z = self.verts[vid].x[iz];
                    zmin = zmin.min(z);
                    zmax = zmax.max(z);
                    found = true;
                }
            }
        }
        found.then_some((zmin, zmax))
    }

    /// Mesh statistics for reporting
    pub fn statistics(&self) -> MeshStatistics {
        let mut shape_counts = HashMap::new();
        for cell in &self.cells {
            *shape_counts.entry(cell.shape).or_insert(0) += 1;
        }
        MeshStatistics {
            num_verts: self.verts.len(),
            num_cells: self.cells.len(),
            shape_counts,
        }
    }
}

/// Mesh statistics for reporting
#[derive(Debug, Clone)]
pub struct MeshStatistics {
    pub num_verts: usize,
    pub num_cells: usize,
    pub shape_counts: HashMap<ShapeKind, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_vertex_counts() {
        assert_eq!(ShapeKind::Lin2.nverts(), 2);
        assert_eq!(ShapeKind::Qua9.nverts(), 9);
        assert_eq!(ShapeKind::Hex8.nverts(), 8);
        assert_eq!(ShapeKind::Hex8.nfaces(), 6);
    }

    #[test]
    fn corner_subshape_for_lbb() {
        assert_eq!(ShapeKind::Qua9.corner_shape(), ShapeKind::Qua4);
        assert_eq!(ShapeKind::Qua9.ncorners(), 4);
        assert_eq!(ShapeKind::Tri3.corner_shape(), ShapeKind::Tri3);
    }

    #[test]
    fn mesh_tag_lookups() {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(-1, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 0.0]);
        mesh.add_vert(-1, vec![1.0, 1.0]);
        mesh.add_vert(0, vec![0.0, 1.0]);
        mesh.add_cell(-10, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();

        assert_eq!(mesh.verts_with_tag(-1), &[0, 2]);
        assert_eq!(mesh.cells_with_tag(-10), &[0]);
        assert!(mesh.cells_with_tag(-99).is_empty());
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn cell_rejects_wrong_vertex_count() {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(0, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 1.0]);
        let res = mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2]);
        assert!(res.is_err());
    }

    #[test]
    fn validate_catches_dangling_vertex() {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(0, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 0.0]);
        mesh.add_vert(0, vec![0.5, 1.0]);
        mesh.add_cell(-1, ShapeKind::Tri3, vec![0, 1, 3]).unwrap();
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn zrange_over_tagged_cells() {
        let mut mesh = Mesh::new(2);
        mesh.add_vert(0, vec![0.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 0.0]);
        mesh.add_vert(0, vec![1.0, 2.5]);
        mesh.add_vert(0, vec![0.0, 2.5]);
        mesh.add_cell(-1, ShapeKind::Qua4, vec![0, 1, 2, 3]).unwrap();
        let (zmin, zmax) = mesh.zrange_of_tags(&[-1]).unwrap();
        assert_eq!(zmin, 0.0);
        assert_eq!(zmax, 2.5);
    }
}
