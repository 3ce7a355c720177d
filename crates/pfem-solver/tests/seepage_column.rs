//! Transient drawdown of a hydrostatic porous column.
//!
//! A 5-element column of height 10 starts saturated with pl hydrostatic
//! from the water table at the top. The bottom pressure is drawn down by
//! a ramp; the top is held at zero. With a near-incompressible liquid the
//! pressure profile tracks the quasi-static straight line between the two
//! boundary values.

mod common;

use pfem_model::{EleCond, Func, IniLayer, IniPorous, IniSource, NodeBc};
use pfem_solver::{ElemKind, Fem};

fn column_sim(tf: f64, dt: f64) -> pfem_model::Sim {
    let mesh = common::grid_qua4(1, 5, 1.0, 10.0, -1);
    let mut sim = common::sim_scaffold(mesh, vec![common::edata(-1, "liquid", "soil")], false, tf, dt);
    sim.mats.insert(common::porous_soil());
    sim.funcs.insert("grav", Func::Cte { c: 10.0 });
    sim.funcs.insert("pbot", Func::Rmp { ca: 30.0, cb: 0.0, ta: 0.0, tb: 2000.0 });
    sim.stages[0].ele_conds.push(EleCond {
        tags: vec![-1],
        keys: vec!["g".to_string()],
        funcs: vec!["grav".to_string()],
        extra: String::new(),
    });
    sim.stages[0].ini = Some(IniSource::Porous(IniPorous {
        layers: vec![IniLayer { tags: vec![-1], k0: 0.5, surcharge: 0.0 }],
        zwater: 10.0,
        gravity: 10.0,
    }));
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-102],
        key: "pl".to_string(),
        func: "pbot".to_string(),
        extra: String::new(),
    });
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-103],
        key: "pl".to_string(),
        func: "zero".to_string(),
        extra: String::new(),
    });
    sim
}

#[test]
fn initial_state_is_hydrostatic_and_saturated() {
    let sim = column_sim(1000.0, 100.0);
    let mut fem = Fem::new(sim).unwrap();
    fem.set_stage(0).unwrap();

    let dom = &mut fem.domains[0];
    let mesh = &fem.sim.regions[0].mesh;

    // nodal pressures follow gamma_l * (zwater - z) with gamma_l = 3
    for node in &dom.nodes {
        let z = mesh.verts[node.vid].x[1];
        let pl = dom.sol.y[node.eq_of("pl").unwrap()];
        assert!((pl - 3.0 * (10.0 - z)).abs() < 1e-9, "z = {z}: pl = {pl}");
    }

    // every integration point starts at maximum saturation
    for e in &dom.elems {
        if let ElemKind::Liquid(liq) = e {
            for st in &liq.states {
                assert!((st.sl - 0.95).abs() < 1e-12);
            }
        }
    }

    // seeding makes the first residual numerically zero (the constraint
    // rows match the hydrostatic values at t = 0)
    dom.sol.dcs.beta1 = 0.02;
    dom.compute_stars();
    dom.interp_star_vars().unwrap();
    let norm = dom.assemble_rhs().unwrap();
    assert!(norm < 1e-9, "initial residual norm = {norm}");
}

#[test]
fn drawdown_tracks_quasi_static_profile() {
    let sim = column_sim(1000.0, 100.0);
    let mut fem = Fem::new(sim).unwrap();
    fem.run().unwrap();

    let dom = &fem.domains[0];
    let mesh = &fem.sim.regions[0].mesh;

    // the constrained bottom follows the ramp exactly: pbot(1000) = 15
    for node in &dom.nodes {
        let z = mesh.verts[node.vid].x[1];
        let pl = dom.sol.y[node.eq_of("pl").unwrap()];
        if z == 0.0 {
            assert!((pl - 15.0).abs() < 1e-9, "bottom pl = {pl}");
        }
        if z == 10.0 {
            assert!(pl.abs() < 1e-9, "top pl = {pl}");
        }
        // near-incompressible liquid: the profile is the straight line
        // between the boundary values
        let expect = 15.0 * (1.0 - z / 10.0);
        assert!((pl - expect).abs() < 1e-3, "z = {z}: pl = {pl}, expected {expect}");
    }

    // element states agree with the retention curve at the converged
    // pressures, and the step commit synced the backups
    for e in &dom.elems {
        if let ElemKind::Liquid(liq) = e {
            assert_eq!(liq.states, liq.states_bkp);
            for st in &liq.states {
                assert!((st.sl - 0.95).abs() < 1e-12, "column must stay saturated");
            }
        }
    }

    // constraint contract: A·y − c = 0 at the converged solution
    for (i, _row) in dom.ebcs.rows().iter().enumerate() {
        let a = dom.ebcs.a_matrix(dom.ny).to_dense();
        let mut ay = 0.0;
        for j in 0..dom.ny {
            ay += a[(i, j)] * dom.sol.y[j];
        }
        let c = dom.ebcs.rhs_at(i, dom.sol.t);
        assert!((ay - c).abs() < 1e-9, "row {i}: A·y = {ay}, c = {c}");
    }
}

#[test]
fn star_predictors_are_frozen_within_a_step() {
    let sim = column_sim(200.0, 100.0);
    let mut fem = Fem::new(sim).unwrap();
    fem.set_stage(0).unwrap();
    fem.step(100.0).unwrap();

    let dom = &mut fem.domains[0];
    let psi_before: Vec<f64> = dom.sol.psi.iter().copied().collect();
    // re-assembling with the same Y must not touch the stars
    dom.assemble_rhs().unwrap();
    dom.assemble_rhs().unwrap();
    let psi_after: Vec<f64> = dom.sol.psi.iter().copied().collect();
    assert_eq!(psi_before, psi_after);
}
