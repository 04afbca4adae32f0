//! Built-in demonstration circuits.

use clap::ValueEnum;
use spicier_devices::{Circuit, DiodeModel, Waveform};
use spicier_solver::AnalysisKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuiltinCircuit {
    /// 10 V across two 1k resistors.
    Divider,
    /// 1k / 1u low-pass driven by a 1 V step.
    Rc,
    /// Series RLC ringing after a 1 V step.
    Rlc,
    /// Half-wave rectifier with a smoothing capacitor, 1 kHz sine input.
    Rectifier,
}

/// A circuit plus what to run and watch by default.
pub struct Builtin {
    pub circuit: Circuit,
    pub probes: Vec<String>,
    pub analysis: AnalysisKind,
    pub tstop: f64,
}

impl BuiltinCircuit {
    pub fn build(self) -> Builtin {
        let mut circuit = Circuit::new();
        let (probes, analysis, tstop): (&[&str], _, _) = match self {
            BuiltinCircuit::Divider => {
                circuit
                    .voltage_source("V1", "in", "0", Waveform::dc(10.0))
                    .resistor("R1", "in", "out", 1e3)
                    .resistor("R2", "out", "0", 1e3);
                (&["in", "out", "i(V1)"], AnalysisKind::Dcop, 0.0)
            }
            BuiltinCircuit::Rc => {
                circuit
                    .voltage_source(
                        "V1",
                        "in",
                        "0",
                        Waveform::pulse(0.0, 1.0, 1e-4, 1e-9, 1e-9, 1.0, 0.0),
                    )
                    .resistor("R1", "in", "out", 1e3)
                    .capacitor("C1", "out", "0", 1e-6);
                (&["in", "out"], AnalysisKind::Transient, 5e-3)
            }
            BuiltinCircuit::Rlc => {
                circuit
                    .voltage_source(
                        "V1",
                        "in",
                        "0",
                        Waveform::pulse(0.0, 1.0, 1e-5, 1e-9, 1e-9, 1.0, 0.0),
                    )
                    .resistor("R1", "in", "a", 10.0)
                    .inductor("L1", "a", "out", 1e-3)
                    .capacitor("C1", "out", "0", 1e-6);
                (&["out", "i(L1)"], AnalysisKind::Transient, 2e-3)
            }
            BuiltinCircuit::Rectifier => {
                circuit
                    .voltage_source("V1", "in", "0", Waveform::sin(0.0, 5.0, 1e3, 0.0, 0.0))
                    .diode("D1", "in", "out", DiodeModel::default())
                    .resistor("R1", "out", "0", 1e3)
                    .capacitor("C1", "out", "0", 10e-6);
                (&["in", "out"], AnalysisKind::Transient, 3e-3)
            }
        };
        Builtin {
            circuit,
            probes: probes.iter().map(|p| p.to_string()).collect(),
            analysis,
            tstop,
        }
    }
}
