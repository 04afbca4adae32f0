//! Result tables.

use anyhow::{Result, anyhow};
use nalgebra::DVector;
use spicier_devices::Circuit;
use spicier_solver::{AnalysisBase, RecordingOutput, StepResult, TimePoint};

/// A printed column: node voltage or branch current.
pub struct Probe {
    pub label: String,
    pub index: usize,
}

/// Resolve `node` and `i(element)` names against the circuit.
pub fn resolve_probes(circuit: &Circuit, names: &[String]) -> Result<Vec<Probe>> {
    names
        .iter()
        .map(|name| {
            let lower = name.to_lowercase();
            let index = if let Some(element) = lower
                .strip_prefix("i(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                circuit.branch_index(element)
            } else {
                circuit.node_index(name)
            };
            let index = index.ok_or_else(|| anyhow!("unknown probe '{}'", name))?;
            let label = if lower.starts_with("i(") {
                name.to_uppercase()
            } else {
                format!("V({})", name)
            };
            Ok(Probe { label, index })
        })
        .collect()
}

pub fn print_operating_point(probes: &[Probe], solution: &DVector<f64>) {
    for p in probes {
        println!("  {:<12} = {:>14.6e}", p.label, solution[p.index]);
    }
    println!();
}

pub fn print_waveform(probes: &[Probe], points: &[TimePoint]) {
    print!("{:>14}", "Time");
    for p in probes {
        print!("{:>14}", p.label);
    }
    println!();
    println!("{}", "-".repeat(14 * (1 + probes.len())));

    for point in points {
        print!("{:>14.6e}", point.time);
        for p in probes {
            print!("{:>14.6}", point.solution[p.index]);
        }
        println!();
    }
    println!();
}

fn print_step_header(result: &StepResult) {
    let params: Vec<String> = result
        .params
        .iter()
        .map(|(name, value)| format!("{} = {:e}", name, value))
        .collect();
    println!("Step {}: {}", result.index + 1, params.join(", "));
}

/// Print whatever the run recorded.
pub fn print_results(probes: &[Probe], out: &RecordingOutput) {
    if !out.step_results.is_empty() {
        for result in &out.step_results {
            print_step_header(result);
            if result.points.is_empty() {
                print_operating_point(probes, &result.solution);
            } else {
                print_waveform(probes, &result.points);
            }
        }
        return;
    }
    if !out.points.is_empty() {
        print_waveform(probes, &out.points);
    } else if let Some(dcop) = &out.dcop {
        print_operating_point(probes, dcop);
    }
}

pub fn print_statistics(stats: &AnalysisBase) {
    println!("Statistics");
    println!("----------");
    println!("  accepted steps      {:>10}", stats.successful_steps);
    println!("  rejected steps      {:>10}", stats.failed_steps);
    println!("  Newton iterations   {:>10}", stats.newton_iterations);
    println!("  nonlinear failures  {:>10}", stats.nonlinear_failures);
    println!("  Jacobian loads      {:>10}", stats.jacobians);
    println!("  residual loads      {:>10}", stats.residual_evaluations);
    println!("  linear solves       {:>10}", stats.linear_solves);
    println!(
        "  load / solve time   {:>10.3?} / {:.3?}",
        stats.residual_time + stats.jacobian_time,
        stats.linear_solve_time
    );
    println!();
}
