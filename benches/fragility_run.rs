use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use fragility::{lds, perturbation, FragilityConfig, FragilityEngine, L2Penalty, Signal};
use fragility::{SolveMethod, SolverParams};
use ndarray::Array2;

/// Stable VAR(1) with cross-coupling, 1 kHz.
fn synthetic(n_ch: usize, n_t: usize) -> Signal {
    let mut state: u64 = 0x5eed;
    let mut noise = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    };
    let mut data = Array2::zeros((n_ch, n_t));
    for t in 1..n_t {
        for c in 0..n_ch {
            let prev = data[[c, t - 1]];
            let nb = data[[(c + 1) % n_ch, t - 1]];
            data[[c, t]] = 0.6 * prev + 0.2 * nb + noise();
        }
    }
    Signal::from_array(data, 1000.0).unwrap()
}

fn bench_fit(c: &mut Criterion) {
    let sig = synthetic(32, 250);
    c.bench_function("lds::fit [32 ch × 250, pinv]", |b| {
        b.iter(|| lds::fit(black_box(&sig.data()), 1, 1e-9, SolveMethod::Pinv).unwrap())
    });
    c.bench_function("lds::fit [32 ch × 250, direct]", |b| {
        b.iter(|| lds::fit(black_box(&sig.data()), 1, 1e-9, SolveMethod::Direct).unwrap())
    });
}

fn bench_solve_all(c: &mut Criterion) {
    let sig = synthetic(32, 250);
    let model = lds::fit(&sig.data(), 1, 1e-9, SolveMethod::Pinv).unwrap();
    let params = SolverParams::default();
    c.bench_function("perturbation::solve_all [32 ch, 51 targets]", |b| {
        b.iter(|| perturbation::solve_all(black_box(&model), 32, &params))
    });
}

fn bench_run(c: &mut Criterion) {
    let sig = synthetic(16, 5000);
    let cfg = FragilityConfig { l2penalty: L2Penalty::Auto, ..FragilityConfig::default() };
    let engine = FragilityEngine::new(cfg);
    c.bench_function("engine.run [16 ch × 5000, 39 windows]", |b| {
        b.iter(|| engine.run(black_box(&sig)).unwrap())
    });
}

criterion_group!(benches, bench_fit, bench_solve_all, bench_run);
criterion_main!(benches);
