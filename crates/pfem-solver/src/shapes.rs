//! Shape functions, quadrature and face geometry per cell kind.
//!
//! For a cell with vertex coordinates X (nverts × ndim) and an integration
//! point ξ, `calc_at_ip` fills the shape values S, the cartesian gradients
//! G (nverts × ndim) and the Jacobian determinant. `calc_at_face_ip` fills
//! the face shape values Sf and the face normal vector scaled by the face
//! Jacobian, so that a face integral is Σ w·(Sf · q)·Fn.
//!
//! Face vertex orderings follow the cell's counter-clockwise numbering, so
//! normals point outward.

use nalgebra::DMatrix;

use crate::error::{Result, SolverError};
use crate::ips::Ip;
use pfem_model::ShapeKind;

const GP2: f64 = 0.577_350_269_189_625_8; // 1/sqrt(3)
const GP3: f64 = 0.774_596_669_241_483_4; // sqrt(3/5)
const GW3A: f64 = 5.0 / 9.0;
const GW3B: f64 = 8.0 / 9.0;

/// Default number of volume integration points for a shape
pub fn default_nip(kind: ShapeKind) -> usize {
    match kind {
        ShapeKind::Lin2 => 2,
        ShapeKind::Tri3 => 3,
        ShapeKind::Qua4 => 4,
        ShapeKind::Qua8 | ShapeKind::Qua9 => 9,
        ShapeKind::Hex8 => 8,
    }
}

/// Default number of integration points per face
pub fn default_nip_face(kind: ShapeKind) -> usize {
    match kind {
        ShapeKind::Lin2 => 1,
        ShapeKind::Tri3 | ShapeKind::Qua4 => 2,
        ShapeKind::Qua8 | ShapeKind::Qua9 => 3,
        ShapeKind::Hex8 => 4,
    }
}

fn gauss1d(n: usize) -> Result<Vec<(f64, f64)>> {
    match n {
        1 => Ok(vec![(0.0, 2.0)]),
        2 => Ok(vec![(-GP2, 1.0), (GP2, 1.0)]),
        3 => Ok(vec![(-GP3, GW3A), (0.0, GW3B), (GP3, GW3A)]),
        _ => Err(SolverError::Input(format!("unsupported 1D gauss rule with {n} points"))),
    }
}

/// Volume and face integration points for a shape. Zero counts select the
/// shape defaults.
pub fn get_ips(kind: ShapeKind, nip: usize, nip_face: usize) -> Result<(Vec<Ip>, Vec<Ip>)> {
    let nip = if nip == 0 { default_nip(kind) } else { nip };
    let nip_face = if nip_face == 0 { default_nip_face(kind) } else { nip_face };
    let vol = match kind {
        ShapeKind::Lin2 => gauss1d(nip)?.into_iter().map(|(r, w)| Ip::new(r, 0.0, 0.0, w)).collect(),
        ShapeKind::Tri3 => match nip {
            1 => vec![Ip::new(1.0 / 3.0, 1.0 / 3.0, 0.0, 0.5)],
            3 => vec![
                Ip::new(1.0 / 6.0, 1.0 / 6.0, 0.0, 1.0 / 6.0),
                Ip::new(2.0 / 3.0, 1.0 / 6.0, 0.0, 1.0 / 6.0),
                Ip::new(1.0 / 6.0, 2.0 / 3.0, 0.0, 1.0 / 6.0),
            ],
            _ => {
                return Err(SolverError::Input(format!(
                    "tri3 supports 1 or 3 integration points; got {nip}"
                )));
            }
        },
        ShapeKind::Qua4 | ShapeKind::Qua8 | ShapeKind::Qua9 => {
            let n1 = match nip {
                4 => 2,
                9 => 3,
                _ => {
                    return Err(SolverError::Input(format!(
                        "quad shapes support 4 or 9 integration points; got {nip}"
                    )));
                }
            };
            let g = gauss1d(n1)?;
            let mut ips = Vec::with_capacity(nip);
            for &(s, ws) in &g {
                for &(r, wr) in &g {
                    ips.push(Ip::new(r, s, 0.0, wr * ws));
                }
            }
            ips
        }
        ShapeKind::Hex8 => {
            if nip != 8 {
                return Err(SolverError::Input(format!(
                    "hex8 supports 8 integration points; got {nip}"
                )));
            }
            let g = gauss1d(2)?;
            let mut ips = Vec::with_capacity(8);
            for &(t, wt) in &g {
                for &(s, ws) in &g {
                    for &(r, wr) in &g {
                        ips.push(Ip::new(r, s, t, wr * ws * wt));
                    }
                }
            }
            ips
        }
    };
    let face = match kind {
        ShapeKind::Lin2 => vec![Ip::new(0.0, 0.0, 0.0, 1.0)],
        ShapeKind::Tri3 | ShapeKind::Qua4 | ShapeKind::Qua8 | ShapeKind::Qua9 => gauss1d(nip_face)?
            .into_iter()
            .map(|(r, w)| Ip::new(r, 0.0, 0.0, w))
            .collect(),
        ShapeKind::Hex8 => {
            let n1 = match nip_face {
                4 => 2,
                9 => 3,
                _ => {
                    return Err(SolverError::Input(format!(
                        "hex8 faces support 4 or 9 integration points; got {nip_face}"
                    )));
                }
            };
            let g = gauss1d(n1)?;
            let mut ips = Vec::with_capacity(nip_face);
            for &(s, ws) in &g {
                for &(r, wr) in &g {
                    ips.push(Ip::new(r, s, 0.0, wr * ws));
                }
            }
            ips
        }
    };
    Ok((vol, face))
}

/// One-dimensional Lagrange polynomial over nodes at −1, 0, +1
fn lag3(x: f64, a: f64) -> f64 {
    if a == 0.0 { 1.0 - x * x } else { x * (x + a) / 2.0 }
}

fn dlag3(x: f64, a: f64) -> f64 {
    if a == 0.0 { -2.0 * x } else { (2.0 * x + a) / 2.0 }
}

/// Natural node coordinates of the quad family (corners, midsides, center)
const QUA_NAT: [(f64, f64); 9] = [
    (-1.0, -1.0),
    (1.0, -1.0),
    (1.0, 1.0),
    (-1.0, 1.0),
    (0.0, -1.0),
    (1.0, 0.0),
    (0.0, 1.0),
    (-1.0, 0.0),
    (0.0, 0.0),
];

const HEX_NAT: [(f64, f64, f64); 8] = [
    (-1.0, -1.0, -1.0),
    (1.0, -1.0, -1.0),
    (1.0, 1.0, -1.0),
    (-1.0, 1.0, -1.0),
    (-1.0, -1.0, 1.0),
    (1.0, -1.0, 1.0),
    (1.0, 1.0, 1.0),
    (-1.0, 1.0, 1.0),
];

/// Shape function values at a natural point
pub fn shape_values(kind: ShapeKind, r: f64, s: f64, t: f64) -> Vec<f64> {
    match kind {
        ShapeKind::Lin2 => vec![(1.0 - r) / 2.0, (1.0 + r) / 2.0],
        ShapeKind::Tri3 => vec![1.0 - r - s, r, s],
        ShapeKind::Qua4 => QUA_NAT[..4]
            .iter()
            .map(|&(a, b)| (1.0 + r * a) * (1.0 + s * b) / 4.0)
            .collect(),
        ShapeKind::Qua8 => {
            let mut n = vec![0.0; 8];
            for (i, &(a, b)) in QUA_NAT[..4].iter().enumerate() {
                n[i] = (1.0 + r * a) * (1.0 + s * b) * (r * a + s * b - 1.0) / 4.0;
            }
            n[4] = (1.0 - r * r) * (1.0 - s) / 2.0;
            n[5] = (1.0 + r) * (1.0 - s * s) / 2.0;
            n[6] = (1.0 - r * r) * (1.0 + s) / 2.0;
            n[7] = (1.0 - r) * (1.0 - s * s) / 2.0;
            n
        }
        ShapeKind::Qua9 => QUA_NAT.iter().map(|&(a, b)| lag3(r, a) * lag3(s, b)).collect(),
        ShapeKind::Hex8 => {
            let _ = t;
            HEX_NAT
                .iter()
                .map(|&(a, b, c)| (1.0 + r * a) * (1.0 + s * b) * (1.0 + t * c) / 8.0)
                .collect()
        }
    }
}

/// Shape function derivatives with respect to natural coordinates;
/// one `[dN/dr, dN/ds, dN/dt]` row per vertex
pub fn shape_derivs(kind: ShapeKind, r: f64, s: f64, t: f64) -> Vec<[f64; 3]> {
    match kind {
        ShapeKind::Lin2 => vec![[-0.5, 0.0, 0.0], [0.5, 0.0, 0.0]],
        ShapeKind::Tri3 => vec![[-1.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        ShapeKind::Qua4 => QUA_NAT[..4]
            .iter()
            .map(|&(a, b)| [a * (1.0 + s * b) / 4.0, (1.0 + r * a) * b / 4.0, 0.0])
            .collect(),
        ShapeKind::Qua8 => {
            let mut d = vec![[0.0; 3]; 8];
            for (i, &(a, b)) in QUA_NAT[..4].iter().enumerate() {
                d[i][0] = a * (1.0 + s * b) * (2.0 * r * a + s * b) / 4.0;
                d[i][1] = b * (1.0 + r * a) * (r * a + 2.0 * s * b) / 4.0;
            }
            d[4] = [-r * (1.0 - s), -(1.0 - r * r) / 2.0, 0.0];
            d[5] = [(1.0 - s * s) / 2.0, -(1.0 + r) * s, 0.0];
            d[6] = [-r * (1.0 + s), (1.0 - r * r) / 2.0, 0.0];
            d[7] = [-(1.0 - s * s) / 2.0, -(1.0 - r) * s, 0.0];
            d
        }
        ShapeKind::Qua9 => QUA_NAT
            .iter()
            .map(|&(a, b)| [dlag3(r, a) * lag3(s, b), lag3(r, a) * dlag3(s, b), 0.0])
            .collect(),
        ShapeKind::Hex8 => HEX_NAT
            .iter()
            .map(|&(a, b, c)| {
                [
                    a * (1.0 + s * b) * (1.0 + t * c) / 8.0,
                    (1.0 + r * a) * b * (1.0 + t * c) / 8.0,
                    (1.0 + r * a) * (1.0 + s * b) * c / 8.0,
                ]
            })
            .collect(),
    }
}

/// 3-node line shape for the curved faces of Qua8/Qua9 (ends, then mid)
fn lin3_values(r: f64) -> [f64; 3] {
    [-r * (1.0 - r) / 2.0, r * (1.0 + r) / 2.0, 1.0 - r * r]
}

fn lin3_derivs(r: f64) -> [f64; 3] {
    [(2.0 * r - 1.0) / 2.0, (2.0 * r + 1.0) / 2.0, -2.0 * r]
}

/// Scratch space holding the outputs of the last shape evaluation
#[derive(Debug, Clone)]
pub struct ShapeScratch {
    pub kind: ShapeKind,
    /// Cell id (error context)
    pub cid: usize,
    /// Shape values at the last volume ip
    pub s: Vec<f64>,
    /// Cartesian gradients (nverts × ndim) at the last volume ip
    pub g: Vec<[f64; 3]>,
    /// Jacobian determinant at the last volume ip
    pub detj: f64,
    /// Face shape values at the last face ip (face-local ordering)
    pub sf: Vec<f64>,
    /// Outward face normal scaled by the face Jacobian
    pub fnvec: [f64; 3],
}

impl ShapeScratch {
    pub fn new(kind: ShapeKind, cid: usize) -> Self {
        Self {
            kind,
            cid,
            s: vec![0.0; kind.nverts()],
            g: vec![[0.0; 3]; kind.nverts()],
            detj: 0.0,
            sf: Vec::new(),
            fnvec: [0.0; 3],
        }
    }

    /// Evaluate S, G and det J at a volume integration point.
    /// `x` is nverts × ndim.
    pub fn calc_at_ip(&mut self, x: &DMatrix<f64>, ip: &Ip, want_g: bool) -> Result<()> {
        let nverts = self.kind.nverts();
        let gdim = self.kind.gdim();
        self.s = shape_values(self.kind, ip.r, ip.s, ip.t);
        let dn = shape_derivs(self.kind, ip.r, ip.s, ip.t);

        // J[a][b] = d x_b / d xi_a
        let mut jac = DMatrix::zeros(gdim, gdim);
        for m in 0..nverts {
            for a in 0..gdim {
                for b in 0..gdim {
                    jac[(a, b)] += dn[m][a] * x[(m, b)];
                }
            }
        }
        self.detj = jac.determinant();
        if self.detj <= 0.0 {
            return Err(SolverError::Geometric {
                cid: self.cid,
                ip: 0,
                reason: format!("non-positive Jacobian determinant {}", self.detj),
            });
        }
        if want_g {
            let jinv = jac.clone().try_inverse().ok_or_else(|| SolverError::Geometric {
                cid: self.cid,
                ip: 0,
                reason: "singular Jacobian".to_string(),
            })?;
            for m in 0..nverts {
                let mut gm = [0.0; 3];
                for i in 0..gdim {
                    for a in 0..gdim {
                        gm[i] += dn[m][a] * jinv[(i, a)];
                    }
                }
                self.g[m] = gm;
            }
        }
        Ok(())
    }

    /// Evaluate Sf and the scaled outward normal at a face ip.
    /// `x` is nverts × ndim for the whole cell.
    pub fn calc_at_face_ip(&mut self, x: &DMatrix<f64>, ipf: &Ip, face: usize) -> Result<()> {
        let fverts = self.kind.face_verts(face);
        let nfv = fverts.len();
        let ndim = x.ncols();

        let (sf, dnf): (Vec<f64>, Vec<[f64; 2]>) = match (self.kind, nfv) {
            (ShapeKind::Qua8 | ShapeKind::Qua9, 3) => {
                let v = lin3_values(ipf.r);
                let d = lin3_derivs(ipf.r);
                (v.to_vec(), d.iter().map(|&dr| [dr, 0.0]).collect())
            }
            (ShapeKind::Hex8, 4) => {
                let v = shape_values(ShapeKind::Qua4, ipf.r, ipf.s, 0.0);
                let d = shape_derivs(ShapeKind::Qua4, ipf.r, ipf.s, 0.0);
                (v, d.iter().map(|dm| [dm[0], dm[1]]).collect())
            }
            (_, 2) => {
                let v = shape_values(ShapeKind::Lin2, ipf.r, 0.0, 0.0);
                let d = shape_derivs(ShapeKind::Lin2, ipf.r, 0.0, 0.0);
                (v, d.iter().map(|dm| [dm[0], 0.0]).collect())
            }
            _ => {
                return Err(SolverError::Input(format!(
                    "cell {}: face {} with {} vertices is not supported",
                    self.cid, face, nfv
                )));
            }
        };

        // tangent vectors of the face parametrisation
        let mut t0 = [0.0; 3];
        let mut t1 = [0.0; 3];
        for (a, &lv) in fverts.iter().enumerate() {
            for b in 0..ndim {
                t0[b] += dnf[a][0] * x[(lv, b)];
                t1[b] += dnf[a][1] * x[(lv, b)];
            }
        }
        self.fnvec = if ndim == 2 {
            [t0[1], -t0[0], 0.0]
        } else {
            [
                t0[1] * t1[2] - t0[2] * t1[1],
                t0[2] * t1[0] - t0[0] * t1[2],
                t0[0] * t1[1] - t0[1] * t1[0],
            ]
        };
        self.sf = sf;
        Ok(())
    }

    /// Real coordinates of a volume integration point
    pub fn ip_real_coords(&self, x: &DMatrix<f64>, ip: &Ip) -> Vec<f64> {
        let sv = shape_values(self.kind, ip.r, ip.s, ip.t);
        let ndim = x.ncols();
        let mut out = vec![0.0; ndim];
        for (m, smv) in sv.iter().enumerate() {
            for i in 0..ndim {
                out[i] += smv * x[(m, i)];
            }
        }
        out
    }

    /// Radius at the last evaluated volume ip (axisymmetric formulations)
    pub fn axisym_radius(&self, x: &DMatrix<f64>) -> f64 {
        self.s.iter().enumerate().map(|(m, sv)| sv * x[(m, 0)]).sum()
    }

    /// Extrapolation matrix E (nverts × nip): least-squares pseudo-inverse
    /// of the shape-value matrix at the integration points
    pub fn extrapolator(&self, ips: &[Ip]) -> Result<DMatrix<f64>> {
        let nverts = self.kind.nverts();
        let nip = ips.len();
        let mut nmat = DMatrix::zeros(nip, nverts);
        for (k, ip) in ips.iter().enumerate() {
            let sv = shape_values(self.kind, ip.r, ip.s, ip.t);
            for m in 0..nverts {
                nmat[(k, m)] = sv[m];
            }
        }
        nmat.pseudo_inverse(1e-10)
            .map_err(|e| SolverError::Input(format!("extrapolator for cell {}: {e}", self.cid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> DMatrix<f64> {
        DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0])
    }

    #[test]
    fn partition_of_unity() {
        for kind in [
            ShapeKind::Lin2,
            ShapeKind::Tri3,
            ShapeKind::Qua4,
            ShapeKind::Qua8,
            ShapeKind::Qua9,
            ShapeKind::Hex8,
        ] {
            let (r, s, t) = (0.21, -0.34, 0.55);
            let sum: f64 = shape_values(kind, r, s, t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-13, "{kind:?}: sum = {sum}");
            for a in 0..3 {
                let dsum: f64 = shape_derivs(kind, r, s, t).iter().map(|d| d[a]).sum();
                assert!(dsum.abs() < 1e-13, "{kind:?}: dsum[{a}] = {dsum}");
            }
        }
    }

    #[test]
    fn shape_values_are_kronecker_at_nodes() {
        let nodes = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0), (0.0, -1.0)];
        for (i, &(r, s)) in nodes.iter().enumerate() {
            let v = shape_values(ShapeKind::Qua9, r, s, 0.0);
            for (j, vj) in v.iter().enumerate() {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((vj - expect).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn quadrature_integrates_area() {
        let x = unit_square();
        let (ips, _) = get_ips(ShapeKind::Qua4, 0, 0).unwrap();
        let mut scratch = ShapeScratch::new(ShapeKind::Qua4, 0);
        let mut area = 0.0;
        for ip in &ips {
            scratch.calc_at_ip(&x, ip, false).unwrap();
            area += scratch.detj * ip.w;
        }
        assert!((area - 1.0).abs() < 1e-13);
    }

    #[test]
    fn gradients_reproduce_linear_field() {
        // u = 2 + 3x - 5y on a distorted quad: G must give (3, -5)
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 2.0, 0.1, 2.2, 1.9, -0.1, 1.4]);
        let u: Vec<f64> = (0..4).map(|m| 2.0 + 3.0 * x[(m, 0)] - 5.0 * x[(m, 1)]).collect();
        let (ips, _) = get_ips(ShapeKind::Qua4, 0, 0).unwrap();
        let mut scratch = ShapeScratch::new(ShapeKind::Qua4, 0);
        for ip in &ips {
            scratch.calc_at_ip(&x, ip, true).unwrap();
            let gx: f64 = (0..4).map(|m| scratch.g[m][0] * u[m]).sum();
            let gy: f64 = (0..4).map(|m| scratch.g[m][1] * u[m]).sum();
            assert!((gx - 3.0).abs() < 1e-12);
            assert!((gy + 5.0).abs() < 1e-12);
        }
    }

    #[test]
    fn negative_jacobian_is_geometric_error() {
        // clockwise vertex ordering flips the Jacobian sign
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
        let (ips, _) = get_ips(ShapeKind::Qua4, 0, 0).unwrap();
        let mut scratch = ShapeScratch::new(ShapeKind::Qua4, 7);
        let err = scratch.calc_at_ip(&x, &ips[0], false).unwrap_err();
        match err {
            SolverError::Geometric { cid, .. } => assert_eq!(cid, 7),
            other => panic!("expected geometric error, got {other:?}"),
        }
    }

    #[test]
    fn face_normals_point_outward() {
        let x = unit_square();
        let (_, fips) = get_ips(ShapeKind::Qua4, 0, 0).unwrap();
        let mut scratch = ShapeScratch::new(ShapeKind::Qua4, 0);
        // face 0 is the bottom edge: outward normal is -y
        scratch.calc_at_face_ip(&x, &fips[0], 0).unwrap();
        assert!(scratch.fnvec[1] < 0.0);
        assert!(scratch.fnvec[0].abs() < 1e-14);
        // face 2 is the top edge: outward normal is +y
        scratch.calc_at_face_ip(&x, &fips[0], 2).unwrap();
        assert!(scratch.fnvec[1] > 0.0);
    }

    #[test]
    fn face_jacobian_is_half_edge_length() {
        // edge of length 2: |fnvec| = dX/dr with r in [-1, 1] gives 1
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 2.0, 0.0, 2.0, 1.0, 0.0, 1.0]);
        let (_, fips) = get_ips(ShapeKind::Qua4, 0, 0).unwrap();
        let mut scratch = ShapeScratch::new(ShapeKind::Qua4, 0);
        scratch.calc_at_face_ip(&x, &fips[0], 0).unwrap();
        let mag = (scratch.fnvec[0].powi(2) + scratch.fnvec[1].powi(2)).sqrt();
        assert!((mag - 1.0).abs() < 1e-13);
    }

    #[test]
    fn hex8_face_normal_is_area_weighted() {
        let x = DMatrix::from_row_slice(
            8,
            3,
            &[
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0,
            ],
        );
        let (_, fips) = get_ips(ShapeKind::Hex8, 0, 0).unwrap();
        let mut scratch = ShapeScratch::new(ShapeKind::Hex8, 0);
        // face 1 is the top (z = 1): outward +z; integrating |fn| gives the area
        let mut area = 0.0;
        for fip in &fips {
            scratch.calc_at_face_ip(&x, fip, 1).unwrap();
            assert!(scratch.fnvec[2] > 0.0);
            area += scratch.fnvec[2] * fip.w;
        }
        assert!((area - 1.0).abs() < 1e-13);
    }

    #[test]
    fn extrapolator_recovers_linear_ip_field() {
        let x = unit_square();
        let (ips, _) = get_ips(ShapeKind::Qua4, 0, 0).unwrap();
        let scratch = ShapeScratch::new(ShapeKind::Qua4, 0);
        let e = scratch.extrapolator(&ips).unwrap();
        // linear field sampled at ips extrapolates exactly to the vertices
        let helper = ShapeScratch::new(ShapeKind::Qua4, 0);
        let vals: Vec<f64> = ips
            .iter()
            .map(|ip| {
                let xc = helper.ip_real_coords(&x, ip);
                1.0 + 2.0 * xc[0] - 3.0 * xc[1]
            })
            .collect();
        for m in 0..4 {
            let vm: f64 = (0..ips.len()).map(|k| e[(m, k)] * vals[k]).sum();
            let expect = 1.0 + 2.0 * x[(m, 0)] - 3.0 * x[(m, 1)];
            assert!((vm - expect).abs() < 1e-10, "vertex {m}: {vm} vs {expect}");
        }
    }
}
