//! Transient analysis, optionally under a `.STEP` sweep.

use anyhow::Result;
use spicier_devices::Circuit;
use spicier_solver::SimulationOptions;

use crate::output::{Probe, print_results, print_statistics};

pub fn run_transient(
    circuit: &mut Circuit,
    options: &SimulationOptions,
    probes: &[Probe],
    stats: bool,
) -> Result<()> {
    println!(
        "Transient Analysis (.TRAN {:e} {:e} {:e}) with {:?}",
        options.output_interval.unwrap_or(0.0),
        options.final_time,
        options.initial_time,
        options.integration_method
    );
    println!("==========================================");
    for line in &options.step {
        println!("{}", line);
    }
    println!();

    let (out, statistics) = super::simulate(circuit, options)?;
    print_results(probes, &out);

    let points: usize = if out.step_results.is_empty() {
        out.points.len()
    } else {
        out.step_results.iter().map(|r| r.points.len()).sum()
    };
    if stats {
        print_statistics(&statistics);
    }
    println!("Transient analysis complete ({} points).", points);
    println!();
    Ok(())
}
