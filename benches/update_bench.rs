// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use stream_sketches::*;

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sketch Update");
    for n in [1_000u64, 100_000].iter() {
        group.bench_function(format!("HLL4 lg_k=12 (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut sketch = HllSketch::new(12, TargetHllType::Hll4).unwrap();
                for i in 0..*n {
                    sketch.update_u64(black_box(i));
                }
                sketch.estimate()
            })
        });

        group.bench_function(format!("CPC lg_k=11 (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut sketch = CpcSketch::new(11).unwrap();
                for i in 0..*n {
                    sketch.update_u64(black_box(i));
                }
                sketch.estimate()
            })
        });

        group.bench_function(format!("Theta lg_k=12 (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut sketch = UpdateThetaSketch::new();
                for i in 0..*n {
                    sketch.update_u64(black_box(i));
                }
                sketch.estimate()
            })
        });

        group.bench_function(format!("KLL k=200 (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut sketch = KllDoubleSketch::with_seed(200, 7).unwrap();
                for i in 0..*n {
                    sketch.update(black_box(i as f64));
                }
                sketch.get_n()
            })
        });

        group.bench_function(format!("Frequent Items lg=10 (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut sketch = FrequentItemsSketch::<u64>::new(10).unwrap();
                for i in 0..*n {
                    sketch.update(black_box(&(i % 5_000)), 1);
                }
                sketch.get_total_weight()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_update);
criterion_main!(benches);
