use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use reactor_core::{Calibration, CalibrationSet, DosingAlgorithm, PhEngine, voltage_to_ph};

// Probe voltages sweeping roughly pH 4..10 at 37 °C
fn voltage_sweep(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.19 - 0.38 * (i as f64) / (n as f64))
        .collect()
}

pub fn bench_conversion(c: &mut Criterion) {
    let cal = Calibration::new(-0.0585, 0.004);
    let volts = voltage_sweep(1024);
    c.bench_function("voltage_to_ph_1024", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &v in &volts {
                acc += voltage_to_ph(&cal, black_box(v)).unwrap_or(0.0);
            }
            black_box(acc)
        })
    });

    let mut set = CalibrationSet::new();
    set.insert(1, cal);
    set.insert(2, Calibration::new(-0.059, -0.002));
    c.bench_function("engine_reload_and_convert", |b| {
        b.iter_batched(
            || set.clone(),
            |s| {
                let mut engine = PhEngine::default();
                engine.reload(s);
                black_box(engine.voltage_to_ph(2, black_box(0.0177)))
            },
            BatchSize::SmallInput,
        )
    });
}

pub fn bench_dosing(c: &mut Criterion) {
    let algo = DosingAlgorithm::default();
    let errors: Vec<f64> = (0..1024).map(|i| (i as f64) * 0.005 - 0.5).collect();
    c.bench_function("calculate_steps_1024", |b| {
        b.iter(|| {
            let mut total = 0u64;
            for &e in &errors {
                total += u64::from(algo.calculate_steps(black_box(e), black_box(30.0)));
            }
            black_box(total)
        })
    });
}

criterion_group!(benches, bench_conversion, bench_dosing);
criterion_main!(benches);
