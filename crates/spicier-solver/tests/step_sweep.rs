//! `.STEP` sweeps over circuit element values.

use spicier_devices::{Circuit, Waveform};
use spicier_solver::{Error, RecordingOutput, Simulation, SimulationOptions};

fn divider() -> Circuit {
    let mut ckt = Circuit::new();
    ckt.voltage_source("V1", "in", "0", Waveform::dc(10.0))
        .resistor("R1", "in", "out", 1.0e3)
        .resistor("R2", "out", "0", 1.0e3);
    ckt
}

fn sweep(ckt: &mut Circuit, options: SimulationOptions) -> (RecordingOutput, Result<(), Error>) {
    let mut sim = Simulation::new(&*ckt, &options).unwrap();
    let mut out = RecordingOutput::new();
    let result = sim.run(ckt, &mut out);
    (out, result)
}

fn dc_steps(lines: &[&str]) -> SimulationOptions {
    SimulationOptions {
        step: lines.iter().map(|l| l.to_string()).collect(),
        ..Default::default()
    }
}

#[test]
fn resistor_list() {
    let mut ckt = divider();
    let (out, result) = sweep(&mut ckt, dc_steps(&[".STEP PARAM=R2 LIST 1k 3k"]));
    result.unwrap();

    let node = ckt.node_index("out").unwrap();
    let vout: Vec<f64> = out.step_results.iter().map(|r| r.solution[node]).collect();
    assert_eq!(vout.len(), 2);
    assert!((vout[0] - 5.0).abs() < 1e-9);
    assert!((vout[1] - 7.5).abs() < 1e-9);
    assert_eq!(out.step_results[1].params["R2"], 3.0e3);
}

#[test]
fn source_decade_sweep() {
    let mut ckt = divider();
    let (out, result) = sweep(&mut ckt, dc_steps(&[".STEP V1 DEC 1 100 1"]));
    result.unwrap();

    let node = ckt.node_index("out").unwrap();
    let pairs: Vec<(f64, f64)> = out
        .step_results
        .iter()
        .map(|r| (r.params["V1"], r.solution[node]))
        .collect();
    assert_eq!(pairs.len(), 3);
    for ((v1, vout), expected) in pairs.iter().zip([1.0, 10.0, 100.0]) {
        assert!((v1 - expected).abs() < 1e-9 * expected);
        assert!((vout - v1 / 2.0).abs() < 1e-9 * expected);
    }
}

#[test]
fn nested_sweeps_vary_first_fastest() {
    let mut ckt = divider();
    let (out, result) = sweep(
        &mut ckt,
        dc_steps(&[".STEP R2 LIST 1k 3k", ".STEP V1 LIST 2 4"]),
    );
    result.unwrap();

    let node = ckt.node_index("out").unwrap();
    let seen: Vec<(f64, f64, f64)> = out
        .step_results
        .iter()
        .map(|r| (r.params["R2"], r.params["V1"], r.solution[node]))
        .collect();
    let expected = [
        (1.0e3, 2.0, 1.0),
        (3.0e3, 2.0, 1.5),
        (1.0e3, 4.0, 2.0),
        (3.0e3, 4.0, 3.0),
    ];
    assert_eq!(seen.len(), expected.len());
    for (got, want) in seen.iter().zip(expected) {
        assert_eq!((got.0, got.1), (want.0, want.1));
        assert!((got.2 - want.2).abs() < 1e-9, "{:?} vs {:?}", got, want);
    }
    assert_eq!(
        out.step_results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
}

#[test]
fn capacitor_sweep_in_transient() {
    let mut ckt = Circuit::new();
    ckt.voltage_source("V1", "in", "0", Waveform::pulse(0.0, 1.0, 0.0, 1.0e-6, 1.0e-6, 1.0, 0.0))
        .resistor("R1", "in", "out", 1.0e3)
        .capacitor("C1", "out", "0", 1.0e-6);
    let options = SimulationOptions {
        step: vec![".STEP C1 LIN 1u 2u 1u".to_string()],
        rel_error_tol: 1.0e-4,
        abs_error_tol: 1.0e-7,
        ..SimulationOptions::transient(1.0e-3)
    };
    let (out, result) = sweep(&mut ckt, options);
    result.unwrap();

    let node = ckt.node_index("out").unwrap();
    assert_eq!(out.step_results.len(), 2);
    for (r, tau) in out.step_results.iter().zip([1.0e-3_f64, 2.0e-3]) {
        assert!(r.points.len() > 10);
        let final_time = r.points.last().unwrap().time;
        assert!((final_time - 1.0e-3).abs() < 1e-12);
        // the 1 us ramp delays the exponential by half its width
        let expected = 1.0 - (-(1.0e-3 - 0.5e-6) / tau).exp();
        assert!(
            (r.solution[node] - expected).abs() < 2e-3,
            "tau = {:e}: {} vs {}",
            tau,
            r.solution[node],
            expected
        );
    }
}

#[test]
fn unknown_element_aborts_sweep() {
    let mut ckt = divider();
    let (out, result) = sweep(&mut ckt, dc_steps(&[".STEP RX LIST 1 2"]));
    assert!(matches!(result, Err(Error::Load(_))));
    assert!(out.step_results.is_empty());
}

#[test]
fn statistics_cover_every_point() {
    let mut ckt = divider();
    let options = dc_steps(&[".STEP R2 LIN 1k 5k 1k"]);
    let mut sim = Simulation::new(&ckt, &options).unwrap();
    let mut out = RecordingOutput::new();
    sim.run(&mut ckt, &mut out).unwrap();

    assert_eq!(out.step_results.len(), 5);
    assert!(sim.statistics().newton_iterations >= 5);
    assert_eq!(sim.statistics().failed_steps, 0);
}
