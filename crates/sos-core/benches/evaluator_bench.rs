//! Criterion benchmarks for window ingestion and ranking.
//!
//! Run with:
//! ```bash
//! cargo bench --package sos-core --bench evaluator_bench
//! ```

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sos_core::{Classification, DetectionEvaluator, EvaluatorConfig};

const LABELS: [&str; 6] = ["fire", "scream", "siren", "glass", "dog", "music"];

fn make_batches(n: usize) -> Vec<Vec<Classification>> {
    (0..n)
        .map(|i| {
            (0..LABELS.len())
                .map(|j| {
                    let label = LABELS[(i + j) % LABELS.len()];
                    Classification::new(label, 0.69 - j as f64 * 0.1)
                })
                .collect()
        })
        .collect()
}

fn bench_full_window(c: &mut Criterion) {
    // One classifier batch every 100 ms over a 10 s window.
    let batches = make_batches(100);
    c.bench_function("evaluate_window_100_batches", |b| {
        b.iter(|| {
            let mut eval = DetectionEvaluator::new(EvaluatorConfig::default()).unwrap();
            let t0 = Instant::now();
            eval.start(t0);
            for (i, batch) in batches.iter().enumerate() {
                eval.ingest(black_box(batch), t0 + Duration::from_millis(100 * i as u64))
                    .unwrap();
            }
            eval.finish().unwrap()
        })
    });
}

criterion_group!(benches, bench_full_window);
criterion_main!(benches);
