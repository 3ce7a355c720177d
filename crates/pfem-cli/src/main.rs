//! Command-line front-end: read a simulation document, run it, report.

use std::process::ExitCode;

use chrono::Local;

use pfem_model::Sim;
use pfem_solver::Fem;

fn usage() -> ExitCode {
    eprintln!("usage: pfem <simulation.json>");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        return usage();
    };
    if args.next().is_some() {
        return usage();
    }

    let started = Local::now();
    println!("pfem: reading {path}");

    let sim = match Sim::from_json_file(&path) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("pfem: cannot read input: {e}");
            return ExitCode::FAILURE;
        }
    };
    let name = if sim.name.is_empty() { path.clone() } else { sim.name.clone() };
    println!(
        "pfem: {} ({}D, {} region(s), {} stage(s))",
        name,
        sim.ndim,
        sim.regions.len(),
        sim.stages.len()
    );

    let mut fem = match Fem::new(sim) {
        Ok(fem) => fem,
        Err(e) => {
            eprintln!("pfem: setup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = fem.run() {
        eprintln!("pfem: run failed: {e}");
        return ExitCode::FAILURE;
    }

    let elapsed = Local::now() - started;
    println!(
        "pfem: done at t = {} ({} output(s), {} ms)",
        fem.time(),
        fem.summary.out_times.len(),
        elapsed.num_milliseconds()
    );
    if fem.sim.out_dir.is_empty() {
        // no output directory: dump the summary on stdout instead
        match serde_json::to_string(&fem.summary) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("pfem: cannot encode summary: {e}"),
        }
    } else {
        println!("pfem: results under {}", fem.sim.out_dir);
    }
    ExitCode::SUCCESS
}
