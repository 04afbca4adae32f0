//! Analysis runners.

pub mod dc;
pub mod transient;

pub use dc::run_dc_op;
pub use transient::run_transient;

use anyhow::{Result, anyhow};
use spicier_devices::Circuit;
use spicier_solver::{AnalysisBase, RecordingOutput, Simulation, SimulationOptions};

/// Build and run the simulation, keeping everything it outputs.
fn simulate(
    circuit: &mut Circuit,
    options: &SimulationOptions,
) -> Result<(RecordingOutput, AnalysisBase)> {
    let mut sim = Simulation::new(&*circuit, options)
        .map_err(|e| anyhow!("Setup error: {}", e))?;
    let mut out = RecordingOutput::new();
    sim.run(circuit, &mut out)
        .map_err(|e| anyhow!("Simulation error: {}", e))?;
    Ok((out, sim.statistics().clone()))
}
