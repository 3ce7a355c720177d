//! Shared builders for the integration tests: structured meshes and
//! simulation documents.

#![allow(dead_code)]

use pfem_model::materials::{Fluid, LinElast, Material, MaterialModel, Porous, Retention};
use pfem_model::{
    ElemData, Func, FuncRegistry, MatRegistry, Mesh, Region, ShapeKind, Sim, SolverData, Stage,
    StageControl,
};

/// Structured grid of Qua4 cells over [0, lx] × [0, ly].
/// Vertex tags: -102 bottom, -103 top, -100 left, -101 right (corners
/// count as bottom/top).
pub fn grid_qua4(nx: usize, ny: usize, lx: f64, ly: f64, cell_tag: i32) -> Mesh {
    let mut mesh = Mesh::new(2);
    for j in 0..=ny {
        for i in 0..=nx {
            let x = lx * i as f64 / nx as f64;
            let y = ly * j as f64 / ny as f64;
            mesh.add_vert(border_tag(i, j, nx, ny), vec![x, y]);
        }
    }
    let v = |i: usize, j: usize| j * (nx + 1) + i;
    for j in 0..ny {
        for i in 0..nx {
            mesh.add_cell(cell_tag, ShapeKind::Qua4, vec![v(i, j), v(i + 1, j), v(i + 1, j + 1), v(i, j + 1)])
                .unwrap();
        }
    }
    mesh
}

/// Structured grid of Qua9 cells over [0, lx] × [0, ly]
pub fn grid_qua9(nx: usize, ny: usize, lx: f64, ly: f64, cell_tag: i32) -> Mesh {
    let mut mesh = Mesh::new(2);
    let (mx, my) = (2 * nx, 2 * ny);
    for j in 0..=my {
        for i in 0..=mx {
            let x = lx * i as f64 / mx as f64;
            let y = ly * j as f64 / my as f64;
            mesh.add_vert(border_tag(i, j, mx, my), vec![x, y]);
        }
    }
    let v = |i: usize, j: usize| j * (mx + 1) + i;
    for j in 0..ny {
        for i in 0..nx {
            let (a, b) = (2 * i, 2 * j);
            mesh.add_cell(
                cell_tag,
                ShapeKind::Qua9,
                vec![
                    v(a, b),
                    v(a + 2, b),
                    v(a + 2, b + 2),
                    v(a, b + 2),
                    v(a + 1, b),
                    v(a + 2, b + 1),
                    v(a + 1, b + 2),
                    v(a, b + 1),
                    v(a + 1, b + 1),
                ],
            )
            .unwrap();
        }
    }
    mesh
}

fn border_tag(i: usize, j: usize, nx: usize, ny: usize) -> i32 {
    if j == 0 {
        -102
    } else if j == ny {
        -103
    } else if i == 0 {
        -100
    } else if i == nx {
        -101
    } else {
        0
    }
}

/// A saturated-capable porous medium with unit-weight liquid scaled so
/// that a 10-high column spans 30 pressure units (γl = 3)
pub fn porous_soil() -> Material {
    Material {
        name: "soil".to_string(),
        model: MaterialModel::Porous(Porous::isotropic(
            0.3,
            2.7,
            1e-2,
            1e-1,
            Retention::BrooksCorey { lambda: 1.5, pc_ae: 0.5, sl_min: 0.05, sl_max: 0.95 },
            Fluid { rho0: 0.3, p0: 0.0, cc: 0.0 },
            Fluid { rho0: 1e-4, p0: 0.0, cc: 1e-6 },
        )),
    }
}

pub fn steel() -> Material {
    Material {
        name: "steel".to_string(),
        model: MaterialModel::LinElast(LinElast { e: 210000.0, nu: 0.3, rho: 7.85 }),
    }
}

pub fn edata(tag: i32, kind: &str, mat: &str) -> ElemData {
    ElemData {
        tag,
        kind: kind.to_string(),
        mat: mat.to_string(),
        mat_extra: String::new(),
        extra: String::new(),
        inactive: false,
        nip: 0,
        nip_face: 0,
    }
}

pub fn one_stage(tf: f64, dt_name: &str) -> Stage {
    Stage {
        name: "stage".to_string(),
        activate: vec![],
        deactivate: vec![],
        ini: None,
        ele_conds: vec![],
        face_bcs: vec![],
        node_bcs: vec![],
        control: StageControl { tf, dt: dt_name.to_string(), dtout: String::new(), skip: false },
    }
}

/// Minimal simulation scaffold with a constant Δt function "dt"
pub fn sim_scaffold(mesh: Mesh, edata: Vec<ElemData>, steady: bool, tf: f64, dt: f64) -> Sim {
    let mut funcs = FuncRegistry::new();
    funcs.insert("dt", Func::Cte { c: dt });
    funcs.insert("zero", Func::Zero);
    Sim {
        name: String::new(),
        ndim: 2,
        steady,
        axisym: false,
        pstress: false,
        regions: vec![Region { mesh, edata }],
        mats: MatRegistry::new(),
        funcs,
        stages: vec![one_stage(tf, "dt")],
        solver: SolverData {
            theta: 0.5,
            theta1: 0.5,
            theta2: 0.5,
            dt_min: 1e-10,
            tol_rel: 1e-12,
            tol_abs: 1e-10,
            it_max: 30,
            ..SolverData::default()
        },
        out_dir: String::new(),
    }
}
