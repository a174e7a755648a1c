use criterion::{black_box, criterion_group, criterion_main, Criterion};
use immunity_core::{EntityId, Regimen, SimConfig, Table};
use immunity_engine::{simulate, ImmunitySimulator};

fn bench_convolution(c: &mut Criterion) {
    let sim = ImmunitySimulator::new(SimConfig::default()).unwrap();
    let stream: Vec<f64> = (0..365).map(|d| 1_000.0 + 10.0 * d as f64).collect();
    c.bench_function("convolve_one_year", |b| {
        b.iter(|| {
            let _ = simulate(black_box(&stream), sim.curve(), Regimen::TwoDose, 1e6);
        })
    });

    let start = chrono::NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let mut doses = Table::new(start, stream.len());
    for i in 0..32 {
        doses
            .insert_column(EntityId(format!("E{i}")), stream.clone())
            .unwrap();
    }
    c.bench_function("batch_32_entities", |b| {
        b.iter(|| {
            let _ = sim.run_batch(black_box(&doses));
        })
    });
}

criterion_group!(benches, bench_convolution);
criterion_main!(benches);
