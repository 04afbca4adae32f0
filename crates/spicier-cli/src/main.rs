//! Spicier command-line interface.
//!
//! Runs one of the built-in circuits through the DC operating point or the
//! transient driver, optionally under `.STEP` sweeps, and prints a table.

mod analysis;
mod circuits;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use spicier_solver::{AnalysisKind, IntegrationMethodKind, SimulationOptions};

use circuits::BuiltinCircuit;

#[derive(Parser, Debug)]
#[command(name = "spicier", version, about = "Spicier time-integration core driver")]
struct Cli {
    /// Built-in circuit to simulate.
    #[arg(value_enum)]
    circuit: BuiltinCircuit,

    /// Analysis to run (op, tran); defaults to the circuit's own.
    #[arg(short, long)]
    analysis: Option<String>,

    /// Transient stop time.
    #[arg(long)]
    tstop: Option<f64>,

    /// Fixed output interval; every accepted step is printed otherwise.
    #[arg(long)]
    tstep: Option<f64>,

    /// Integration method (bdf, trap).
    #[arg(short, long)]
    method: Option<String>,

    /// JSON options file.
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// `.STEP` line; may be repeated.
    #[arg(long = "step", value_name = "LINE")]
    step: Vec<String>,

    /// Columns to print: node names or i(element).
    #[arg(long, value_delimiter = ',')]
    probe: Vec<String>,

    /// Print run statistics.
    #[arg(long)]
    stats: bool,
}

fn load_options(path: Option<&PathBuf>) -> Result<Option<SimulationOptions>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read options file: {}", path.display()))?;
    let options = serde_json::from_str(&text)
        .with_context(|| format!("invalid options file: {}", path.display()))?;
    Ok(Some(options))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut builtin = cli.circuit.build();

    let mut options = match load_options(cli.options.as_ref())? {
        Some(options) => options,
        None => SimulationOptions {
            analysis: builtin.analysis,
            final_time: builtin.tstop,
            ..Default::default()
        },
    };

    if let Some(name) = &cli.analysis {
        options.analysis =
            AnalysisKind::from_name(name).ok_or_else(|| anyhow!("unknown analysis '{}'", name))?;
    }
    if let Some(tstop) = cli.tstop {
        options.final_time = tstop;
    }
    if options.analysis == AnalysisKind::Transient && options.final_time <= options.initial_time {
        options.final_time = builtin.tstop;
    }
    if let Some(tstep) = cli.tstep {
        options.output_interval = Some(tstep);
    }
    if let Some(method) = &cli.method {
        options.integration_method = IntegrationMethodKind::from_name(method)
            .ok_or_else(|| anyhow!("unknown integration method '{}'", method))?;
    }
    options.step.extend(cli.step.iter().cloned());

    builtin
        .circuit
        .check()
        .map_err(|e| anyhow!("Circuit error: {}", e))?;
    let probe_names = if cli.probe.is_empty() {
        builtin.probes.clone()
    } else {
        cli.probe.clone()
    };
    let probes = output::resolve_probes(&builtin.circuit, &probe_names)?;

    println!("Circuit: {:?}", cli.circuit);
    println!(
        "{} nodes, {} branch currents",
        builtin.circuit.num_nodes(),
        builtin.circuit.num_branches()
    );
    println!();

    match options.analysis {
        AnalysisKind::Dcop => analysis::run_dc_op(&mut builtin.circuit, &options, &probes, cli.stats),
        AnalysisKind::Transient => {
            analysis::run_transient(&mut builtin.circuit, &options, &probes, cli.stats)
        }
        AnalysisKind::Step => Err(anyhow!(
            "step is not a main analysis; pass --step lines with op or tran"
        )),
    }
}
