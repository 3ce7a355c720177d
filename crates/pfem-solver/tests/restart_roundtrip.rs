//! Checkpoint/restart: snapshots reload bit-for-bit into a freshly built
//! domain, and a mismatched domain is rejected.

mod common;

use pfem_model::{EleCond, Func, IniLayer, IniPorous, IniSource, NodeBc};
use pfem_solver::Fem;

fn column_sim(out_dir: &str) -> pfem_model::Sim {
    let mesh = common::grid_qua4(1, 5, 1.0, 10.0, -1);
    let mut sim =
        common::sim_scaffold(mesh, vec![common::edata(-1, "liquid", "soil")], false, 500.0, 100.0);
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
    sim.out_dir = out_dir.to_string();
    sim
}

#[test]
fn snapshots_reload_bit_for_bit() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().to_str().unwrap().to_string();

    let mut fem = Fem::new(column_sim(&out)).unwrap();
    fem.run().unwrap();
    let last_tidx = fem.tidx - 1;
    assert!(last_tidx >= 1);

    let y_ref: Vec<f64> = fem.domains[0].sol.y.iter().copied().collect();
    let dydt_ref: Vec<f64> = fem.domains[0].sol.dydt.iter().copied().collect();
    let d2_ref: Vec<f64> = fem.domains[0].sol.d2ydt2.iter().copied().collect();

    // a fresh run of the same input, importing the final snapshot
    let mut sim2 = column_sim("");
    sim2.stages[0].ini = Some(IniSource::Import {
        path: format!("{out}/dom0"),
        tidx: last_tidx,
        reset_u: false,
    });
    sim2.stages[0].control.skip = true;
    let mut fem2 = Fem::new(sim2).unwrap();
    fem2.run().unwrap();

    let dom = &fem2.domains[0];
    for i in 0..dom.ny {
        assert_eq!(dom.sol.y[i], y_ref[i], "y[{i}] differs");
        assert_eq!(dom.sol.dydt[i], dydt_ref[i], "dydt[{i}] differs");
        assert_eq!(dom.sol.d2ydt2[i], d2_ref[i], "d2ydt2[{i}] differs");
    }
}

#[test]
fn restart_into_mismatched_domain_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().to_str().unwrap().to_string();

    let mut fem = Fem::new(column_sim(&out)).unwrap();
    fem.run().unwrap();
    let last_tidx = fem.tidx - 1;

    // a wider mesh changes ny; the import must be rejected
    let mesh = common::grid_qua4(2, 5, 2.0, 10.0, -1);
    let mut sim2 =
        common::sim_scaffold(mesh, vec![common::edata(-1, "liquid", "soil")], false, 500.0, 100.0);
    sim2.mats.insert(common::porous_soil());
    sim2.stages[0].ini = Some(IniSource::Import {
        path: format!("{out}/dom0"),
        tidx: last_tidx,
        reset_u: false,
    });
    sim2.stages[0].control.skip = true;
    let mut fem2 = Fem::new(sim2).unwrap();
    assert!(fem2.run().is_err());
}

#[test]
fn reset_u_zeroes_displacements_on_import() {
    // a solid column saved with nonzero displacements reloads with
    // displacements wiped but stresses kept
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().to_str().unwrap().to_string();

    let mesh = common::grid_qua4(1, 2, 1.0, 2.0, -1);
    let mut sim =
        common::sim_scaffold(mesh, vec![common::edata(-1, "solid", "steel")], true, 1.0, 1.0);
    sim.mats.insert(common::steel());
    sim.funcs.insert("pull", Func::Cte { c: 50.0 });
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-102],
        key: "ux".to_string(),
        func: "zero".to_string(),
        extra: String::new(),
    });
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-102],
        key: "uy".to_string(),
        func: "zero".to_string(),
        extra: String::new(),
    });
    sim.stages[0].node_bcs.push(NodeBc {
        vert_tags: vec![-103],
        key: "fy".to_string(),
        func: "pull".to_string(),
        extra: String::new(),
    });
    sim.out_dir = out.clone();
    let mut fem = Fem::new(sim.clone()).unwrap();
    fem.run().unwrap();
    let last_tidx = fem.tidx - 1;
    let max_u = fem.domains[0].sol.y.amax();
    assert!(max_u > 0.0);

    let mut sim2 = sim;
    sim2.out_dir = String::new();
    sim2.stages[0].ini = Some(IniSource::Import {
        path: format!("{out}/dom0"),
        tidx: last_tidx,
        reset_u: true,
    });
    sim2.stages[0].control.skip = true;
    let mut fem2 = Fem::new(sim2).unwrap();
    fem2.run().unwrap();
    let dom = &fem2.domains[0];
    for node in &dom.nodes {
        for key in ["ux", "uy"] {
            if let Some(eq) = node.eq_of(key) {
                assert_eq!(dom.sol.y[eq], 0.0);
            }
        }
    }
}
