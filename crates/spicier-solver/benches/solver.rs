//! Benchmarks for the linear solvers and the analysis drivers.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nalgebra::{DMatrix, DVector};
use spicier_devices::{Circuit, Waveform};
use spicier_solver::linear::{solve_dense, solve_sparse};
use spicier_solver::{AnalysisKind, NullOutput, Simulation, SimulationOptions};

/// Source driving `sections` R-C stages in series.
fn rc_ladder(sections: usize) -> Circuit {
    let mut ckt = Circuit::new();
    ckt.voltage_source(
        "V1",
        "n0",
        "0",
        Waveform::pulse(0.0, 1.0, 1e-6, 1e-9, 1e-9, 1.0, 0.0),
    );
    for i in 0..sections {
        let a = format!("n{}", i);
        let b = format!("n{}", i + 1);
        ckt.resistor(&format!("R{}", i), &a, &b, 1e3)
            .capacitor(&format!("C{}", i), &b, "0", 1e-9);
    }
    ckt
}

fn bench_solve_dense(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_dense");

    for size in [10, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, &size| {
            // diagonally dominant, so never singular
            let a = DMatrix::from_fn(size, size, |i, j| {
                if i == j {
                    (size as f64) + 1.0
                } else {
                    1.0 / ((i as f64 - j as f64).abs() + 1.0)
                }
            });
            let rhs = DVector::from_fn(size, |i, _| (i + 1) as f64);

            bencher.iter(|| solve_dense(black_box(&a), black_box(&rhs)).unwrap());
        });
    }

    group.finish();
}

fn bench_solve_sparse(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_sparse");

    for size in [50, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, &size| {
            // banded, like a ladder network
            let mut triplets = Vec::new();
            for i in 0..size {
                triplets.push((i, i, (size as f64) + 1.0));
                for &offset in &[1_usize, 2] {
                    if i + offset < size {
                        let v = 1.0 / (offset as f64 + 1.0);
                        triplets.push((i, i + offset, v));
                        triplets.push((i + offset, i, v));
                    }
                }
            }
            let rhs = DVector::from_fn(size, |i, _| (i + 1) as f64);

            bencher.iter(|| {
                solve_sparse(black_box(size), black_box(&triplets), black_box(&rhs)).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_dcop(c: &mut Criterion) {
    let mut group = c.benchmark_group("dcop_rc_ladder");
    let options = SimulationOptions::default();

    for sections in [10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(sections),
            &sections,
            |bencher, &sections| {
                let mut ckt = rc_ladder(sections);
                bencher.iter(|| {
                    let mut sim = Simulation::new(&ckt, &options).unwrap();
                    sim.run(&mut ckt, &mut NullOutput).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_transient(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_rc_ladder");
    group.sample_size(10);

    for sections in [10, 50] {
        let options = SimulationOptions {
            analysis: AnalysisKind::Transient,
            final_time: 20e-6,
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(sections),
            &sections,
            |bencher, &sections| {
                let mut ckt = rc_ladder(sections);
                bencher.iter(|| {
                    let mut sim = Simulation::new(&ckt, &options).unwrap();
                    sim.run(&mut ckt, &mut NullOutput).unwrap();
                    black_box(sim.statistics().successful_steps)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_solve_dense,
    bench_solve_sparse,
    bench_dcop,
    bench_transient
);
criterion_main!(benches);
