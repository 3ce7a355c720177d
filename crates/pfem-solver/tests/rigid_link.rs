//! Rigid-link constraint between the tips of two parallel rods: a load on
//! one tip produces equal displacement on the other and the pair shares
//! the load.

mod common;

use pfem_model::{ElemData, Func, NodeBc, ShapeKind};
use pfem_solver::Fem;

const F: f64 = 100.0;

fn linked_sim() -> pfem_model::Sim {
    let mut mesh = pfem_model::Mesh::new(2);
    mesh.add_vert(-1, vec![0.0, 0.0]);
    mesh.add_vert(-20, vec![0.0, 1.0]);
    mesh.add_vert(-1, vec![1.0, 0.0]);
    mesh.add_vert(-30, vec![1.0, 1.0]);
    mesh.add_cell(-10, ShapeKind::Lin2, vec![0, 1]).unwrap();
    mesh.add_cell(-10, ShapeKind::Lin2, vec![2, 3]).unwrap();

    let edata = vec![ElemData {
        extra: "!area:0.1".to_string(),
        ..common::edata(-10, "rod", "steel")
    }];
    let mut sim = common::sim_scaffold(mesh, edata, true, 1.0, 1.0);
    sim.mats.insert(common::steel());
    sim.funcs.insert("load", Func::Cte { c: -F });

    // clamp the bases, keep the tips on the vertical axis
    for (tags, key) in [(vec![-1], "ux"), (vec![-1], "uy"), (vec![-20, -30], "ux")] {
        sim.stages[0].node_bcs.push(NodeBc {
            vert_tags: tags,
            key: key.to_string(),
            func: "zero".to_string(),
            extra: String::new(),
        });
    }
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-20, -30],
        key: "rigid".to_string(),
        func: "zero".to_string(),
        extra: String::new(),
    });
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-20],
        key: "fy".to_string(),
        func: "load".to_string(),
        extra: String::new(),
    });
    sim
}

#[test]
fn linked_tips_move_together_and_share_the_load() {
    let mut fem = Fem::new(linked_sim()).unwrap();
    fem.run().unwrap();

    let dom = &fem.domains[0];
    let tip_a = dom.vid2node[1].unwrap();
    let tip_b = dom.vid2node[3].unwrap();
    let uy_a = dom.sol.y[dom.nodes[tip_a].eq_of("uy").unwrap()];
    let uy_b = dom.sol.y[dom.nodes[tip_b].eq_of("uy").unwrap()];

    assert!((uy_a - uy_b).abs() < 1e-14, "linked tips differ: {uy_a} vs {uy_b}");

    // both rods carry half: uy = -F / (2 * EA/L)
    let k = 210000.0 * 0.1 / 1.0;
    let expect = -F / (2.0 * k);
    assert!(
        (uy_a - expect).abs() < 1e-12 * expect.abs().max(1.0),
        "uy = {uy_a}, expected {expect}"
    );
}
