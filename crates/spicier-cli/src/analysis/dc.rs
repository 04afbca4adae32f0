//! DC operating point, optionally under a `.STEP` sweep.

use anyhow::Result;
use spicier_devices::Circuit;
use spicier_solver::SimulationOptions;

use crate::output::{Probe, print_results, print_statistics};

pub fn run_dc_op(
    circuit: &mut Circuit,
    options: &SimulationOptions,
    probes: &[Probe],
    stats: bool,
) -> Result<()> {
    println!("DC Operating Point Analysis");
    println!("===========================");
    for line in &options.step {
        println!("{}", line);
    }
    println!();

    let (out, statistics) = super::simulate(circuit, options)?;
    print_results(probes, &out);
    if stats {
        print_statistics(&statistics);
    }
    println!("Analysis complete.");
    println!();
    Ok(())
}
