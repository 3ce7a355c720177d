//! Discrete energy balance of a rod oscillator.
//!
//! With the average-acceleration integrator, zero damping and a constant
//! load, the change in kinetic plus strain energy between two converged
//! steps equals the work of the load.

mod common;

use pfem_model::materials::{LinElast, Material, MaterialModel};
use pfem_model::{ElemData, Func, NodeBc, ShapeKind};
use pfem_solver::{ElemKind, Fem};

const F: f64 = 10.0;
const DT: f64 = 0.01;

fn oscillator_sim() -> pfem_model::Sim {
    let mut mesh = pfem_model::Mesh::new(2);
    mesh.add_vert(-1, vec![0.0, 0.0]);
    mesh.add_vert(-2, vec![1.0, 0.0]);
    mesh.add_cell(-10, ShapeKind::Lin2, vec![0, 1]).unwrap();

    let edata = vec![ElemData {
        extra: "!area:1".to_string(),
        ..common::edata(-10, "rod", "soft")
    }];
    let mut sim = common::sim_scaffold(mesh, edata, false, 0.05, DT);
    sim.mats.insert(Material {
        name: "soft".to_string(),
        model: MaterialModel::LinElast(LinElast { e: 100.0, nu: 0.3, rho: 3.0 }),
    });
    sim.funcs.insert("load", Func::Cte { c: F });

    for (tags, key) in [(vec![-1], "ux"), (vec![-1], "uy"), (vec![-2], "uy")] {
        sim.stages[0].node_bcs.push(NodeBc {
            vert_tags: tags,
            key: key.to_string(),
            func: "zero".to_string(),
            extra: String::new(),
        });
    }
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-2],
        key: "fx".to_string(),
        func: "load".to_string(),
        extra: String::new(),
    });
    sim
}

fn energies(fem: &Fem) -> (f64, f64, f64) {
    let dom = &fem.domains[0];
    let (kmat, mmat, umap) = match &dom.elems[0] {
        ElemKind::Rod(rod) => (rod.stiffness().clone(), rod.mass().unwrap().clone(), rod.umap.clone()),
        _ => panic!("expected a rod"),
    };
    let u: Vec<f64> = umap.iter().map(|&r| dom.sol.y[r]).collect();
    let v: Vec<f64> = umap.iter().map(|&r| dom.sol.dydt[r]).collect();
    let n = u.len();
    let mut se = 0.0;
    let mut ke = 0.0;
    for p in 0..n {
        for q in 0..n {
            se += 0.5 * u[p] * kmat[(p, q)] * u[q];
            ke += 0.5 * v[p] * mmat[(p, q)] * v[q];
        }
    }
    // tip displacement along x, for the work of the load
    let tip_eq = dom.nodes[dom.vid2node[1].unwrap()].eq_of("ux").unwrap();
    (ke, se, dom.sol.y[tip_eq])
}

#[test]
fn energy_balance_between_converged_steps() {
    let mut fem = Fem::new(oscillator_sim()).unwrap();
    fem.set_stage(0).unwrap();

    // steps n and n+1 both satisfy the discrete equilibrium, which the
    // balance identity requires; the very first step starts from rest
    fem.step(DT).unwrap();
    let (ke1, se1, u1) = energies(&fem);
    fem.step(DT).unwrap();
    let (ke2, se2, u2) = energies(&fem);

    let work = F * (u2 - u1);
    let de = (ke2 + se2) - (ke1 + se1);
    let err = (de - work).abs() / work.abs().max(1e-12);
    assert!(err < 1e-8, "dE = {de}, W = {work}, relative error {err:.3e}");
}

#[test]
fn oscillator_moves_and_gains_energy_from_rest() {
    let mut fem = Fem::new(oscillator_sim()).unwrap();
    fem.set_stage(0).unwrap();
    fem.step(DT).unwrap();
    let (ke, se, u) = energies(&fem);
    assert!(u > 0.0);
    assert!(ke > 0.0);
    assert!(se > 0.0);
}
